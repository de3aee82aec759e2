//! Per-window summary statistics.
//!
//! Standard deviation is the population form: the sum of squared deviations
//! is divided by the sample count N, not N - 1. An empty window has no
//! statistics at all (`per_axis` is `None`) rather than zeros.

use std::fmt::Write as _;

use crate::windowing::{Sample, Window};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl AxisStats {
    /// `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|v| {
                let delta = v - mean;
                delta * delta
            })
            .sum::<f64>()
            / n;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Some(Self {
            mean,
            std: variance.sqrt(),
            min,
            max,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedMetrics {
    pub count: usize,
    /// One entry per axis; `None` when there were no samples.
    pub per_axis: Option<Vec<AxisStats>>,
    pub magnitude: Vec<f64>,
}

impl DerivedMetrics {
    pub fn from_window(window: &Window) -> Self {
        Self::compute(window.samples())
    }

    pub fn compute(samples: &[Sample]) -> Self {
        let magnitude: Vec<f64> = samples.iter().map(Sample::magnitude).collect();
        let per_axis = samples.first().map(|first| {
            (0..first.num_axes())
                .filter_map(|axis| {
                    let column: Vec<f64> = samples
                        .iter()
                        .filter_map(|s| s.axes().get(axis).copied())
                        .collect();
                    AxisStats::from_values(&column)
                })
                .collect()
        });
        Self {
            count: samples.len(),
            per_axis,
            magnitude,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.per_axis.is_some()
    }

    pub fn axis(&self, index: usize) -> Option<&AxisStats> {
        self.per_axis.as_ref().and_then(|axes| axes.get(index))
    }

    pub fn means(&self) -> Option<Vec<f64>> {
        self.per_axis
            .as_ref()
            .map(|axes| axes.iter().map(|a| a.mean).collect())
    }

    pub fn magnitude_stats(&self) -> Option<AxisStats> {
        AxisStats::from_values(&self.magnitude)
    }

    /// One-line text summary, e.g. `n=3 x: mean=0.333 std=0.471 ...`.
    pub fn summary(&self, axis_names: &[String]) -> String {
        let Some(axes) = &self.per_axis else {
            return format!("n={} (statistics undefined)", self.count);
        };
        let mut out = format!("n={}", self.count);
        for (idx, stats) in axes.iter().enumerate() {
            let name = axis_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("a{idx}"));
            let _ = write!(
                out,
                " | {name}: mean={:.3} std={:.3} min={:.3} max={:.3}",
                stats.mean, stats.std, stats.min, stats.max
            );
        }
        if let Some(mag) = self.magnitude_stats() {
            let _ = write!(out, " | |a|: mean={:.3} max={:.3}", mag.mean, mag.max);
        }
        out
    }
}
