pub mod knn;
pub mod nearest_centroid;
pub mod ridge;

pub mod estimator_trait;
pub mod factory;
