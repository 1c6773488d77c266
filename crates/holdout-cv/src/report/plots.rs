use std::path::Path;

use plotly::common::{Line, Mode};
use plotly::layout::{Axis, BarMode, Layout};
use plotly::{Bar, Histogram, Plot, Scatter};

use crate::error::{CvError, Result};

/// Overlaid histograms of a metric across repetitions, one trace per modality.
pub fn plot_metric_distribution(distributions: &[(String, Vec<f64>)], metric: &str) -> Plot {
    let mut plot = Plot::new();
    for (modality, values) in distributions {
        plot.add_trace(
            Histogram::new(values.clone())
                .name(modality)
                .opacity(0.6),
        );
    }

    let layout = Layout::new()
        .title(format!("Distribution of {} across repetitions", metric).as_str())
        .bar_mode(BarMode::Overlay)
        .x_axis(Axis::new().title(metric))
        .y_axis(Axis::new().title("Repetitions"));
    plot.set_layout(layout);

    plot
}

/// Median feature importance of one modality. Features without any
/// importance are left out.
pub fn plot_feature_importance(importance: &[Option<f64>], modality: &str) -> Plot {
    let (features, values): (Vec<String>, Vec<f64>) = importance
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (format!("f{}", i), v)))
        .unzip();

    let mut plot = Plot::new();
    plot.add_trace(Bar::new(features, values).name(modality));
    plot.set_layout(
        Layout::new()
            .title(format!("Median feature importance: {}", modality).as_str())
            .x_axis(Axis::new().title("Feature"))
            .y_axis(Axis::new().title("Importance")),
    );

    plot
}

/// Histogram of per-sample misclassification rates, one trace per modality.
pub fn plot_misclassification(rates: &[(String, Vec<f64>)]) -> Plot {
    let mut plot = Plot::new();
    for (modality, values) in rates {
        plot.add_trace(Histogram::new(values.clone()).name(modality).opacity(0.6));
    }
    plot.set_layout(
        Layout::new()
            .title("Misclassification rate per sample")
            .bar_mode(BarMode::Overlay)
            .x_axis(Axis::new().title("Fraction of test appearances misclassified"))
            .y_axis(Axis::new().title("Samples")),
    );

    plot
}

/// Pooled test predictions against their true values, with the identity line.
pub fn plot_predicted_vs_true(truth: &[f64], predicted: &[f64], modality: &str) -> Plot {
    let lo = truth
        .iter()
        .chain(predicted)
        .copied()
        .fold(f64::INFINITY, f64::min);
    let hi = truth
        .iter()
        .chain(predicted)
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(truth.to_vec(), predicted.to_vec())
            .mode(Mode::Markers)
            .name(modality),
    );
    if lo.is_finite() && hi.is_finite() {
        plot.add_trace(
            Scatter::new(vec![lo, hi], vec![lo, hi])
                .mode(Mode::Lines)
                .name("y = x")
                .line(Line::new().color("red").dash(plotly::common::DashType::Dash)),
        );
    }
    plot.set_layout(
        Layout::new()
            .title(format!("Predicted vs true: {}", modality).as_str())
            .x_axis(Axis::new().title("True"))
            .y_axis(Axis::new().title("Predicted")),
    );

    plot
}

/// Render `plot` as a standalone HTML file.
pub fn write_plot(plot: &Plot, path: &Path) -> Result<()> {
    std::fs::write(path, plot.to_html()).map_err(|e| CvError::Visualization {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
