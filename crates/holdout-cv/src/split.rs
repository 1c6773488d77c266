//! Random train/test partitions of the sample universe.
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::data_handling::SampleId;

/// Size of the training partition: `floor(fraction * n)` clamped to `[1, n]`.
pub fn train_set_size(n_samples: usize, train_fraction: f64) -> usize {
    let size = (n_samples as f64 * train_fraction).floor() as usize;
    size.clamp(1, n_samples.max(1))
}

/// RNG for one repetition. With a base seed every repetition gets its own
/// derived seed; otherwise each draw comes from entropy.
pub fn repetition_rng(base_seed: Option<u64>, repetition: usize) -> StdRng {
    match base_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(repetition as u64)),
        None => StdRng::from_entropy(),
    }
}

/// One disjoint train/test partition of the universe.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldoutSplit {
    pub train: Vec<SampleId>,
    pub test: Vec<SampleId>,
}

impl HoldoutSplit {
    /// Draw a fresh permutation of `universe` and cut it after `train_size`.
    pub fn draw<R: Rng + ?Sized>(universe: &[SampleId], train_size: usize, rng: &mut R) -> Self {
        let mut permutation = universe.to_vec();
        permutation.shuffle(rng);
        let test = permutation.split_off(train_size.min(universe.len()));
        HoldoutSplit {
            train: permutation,
            test,
        }
    }
}

/// Index-based variant used by the inner optimization loop.
pub fn shuffle_split_indices<R: Rng + ?Sized>(
    n_samples: usize,
    train_size: usize,
    rng: &mut R,
) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(rng);
    let test = indices.split_off(train_size.min(n_samples));
    (indices, test)
}
