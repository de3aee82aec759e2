// src/analysis.rs
//! Posture-session analysis over a captured recording.
//!
//! The baseline is the mean of the first few readings of one axis (in time
//! order). Every reading further than `delta` from the baseline, either way,
//! counts as a slouch.

use std::fmt;
use std::fmt::Write as _;

use crate::windowing::{AxisStats, DerivedMetrics, Sample};

pub const DEFAULT_BASELINE_COUNT: usize = 10;
pub const DEFAULT_SLOUCH_DELTA: f64 = 8.0;
/// Axis analysed when none is named and the recording has one of this name.
pub const DEFAULT_AXIS: &str = "pitch_deg";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Posture {
    Ok,
    Slouch,
}

impl fmt::Display for Posture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Posture::Ok => write!(f, "OK"),
            Posture::Slouch => write!(f, "SLOUCH"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub axis: String,
    pub baseline: f64,
    pub delta: f64,
    pub duration_min: f64,
    pub slouch_pct: f64,
    pub stats: AxisStats,
    /// Readings sorted by timestamp, paired with their posture.
    pub readings: Vec<(Sample, Posture)>,
}

impl SessionReport {
    pub fn slouch_count(&self) -> usize {
        self.readings
            .iter()
            .filter(|(_, posture)| *posture == Posture::Slouch)
            .count()
    }

    pub fn upper(&self) -> f64 {
        self.baseline + self.delta
    }

    pub fn lower(&self) -> f64 {
        self.baseline - self.delta
    }

    /// Text written to the session summary file.
    pub fn summary_text(&self) -> String {
        let axis = &self.axis;
        let mut out = String::new();
        let _ = writeln!(out, "Duration (min): {:.1}", self.duration_min);
        let _ = writeln!(out, "Slouching (%): {:.3}", self.slouch_pct);
        let _ = writeln!(out, "Baseline {axis}: {:.1}", self.baseline);
        let _ = writeln!(
            out,
            "{axis} range: {:.1} to {:.1}",
            self.stats.min, self.stats.max
        );
        let _ = writeln!(out, "Average {axis}: {:.1}", self.stats.mean);
        out
    }
}

/// Labels every reading of axis `axis` against a baseline taken from the
/// first `baseline_count` readings. `None` when there are no readings.
pub fn analyze_session(
    samples: &[Sample],
    axis: usize,
    axis_name: &str,
    baseline_count: usize,
    delta: f64,
) -> Option<SessionReport> {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(Sample::timestamp);
    let metrics = DerivedMetrics::compute(&sorted);
    let stats = *metrics.axis(axis)?;

    let values: Vec<f64> = sorted
        .iter()
        .map(|s| s.axes().get(axis).copied().unwrap_or(f64::NAN))
        .collect();
    let head = &values[..baseline_count.max(1).min(values.len())];
    let baseline = head.iter().sum::<f64>() / head.len() as f64;

    let readings: Vec<(Sample, Posture)> = sorted
        .into_iter()
        .zip(&values)
        .map(|(sample, &value)| {
            let posture = if (value - baseline).abs() > delta {
                Posture::Slouch
            } else {
                Posture::Ok
            };
            (sample, posture)
        })
        .collect();

    let duration_min = match (readings.first(), readings.last()) {
        (Some((first, _)), Some((last, _))) => {
            (last.timestamp() - first.timestamp()).num_milliseconds() as f64 / 60_000.0
        }
        _ => 0.0,
    };
    let slouches = readings
        .iter()
        .filter(|(_, posture)| *posture == Posture::Slouch)
        .count();
    Some(SessionReport {
        axis: axis_name.to_string(),
        baseline,
        delta,
        duration_min,
        slouch_pct: slouches as f64 * 100.0 / readings.len() as f64,
        stats,
        readings,
    })
}
