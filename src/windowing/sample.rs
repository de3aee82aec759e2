use chrono::{DateTime, Local};

use crate::windowing::SampleError;

/// One timestamped multi-axis sensor reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    timestamp: DateTime<Local>,
    axes: Vec<f64>,
    label: Option<String>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Local>, axes: Vec<f64>) -> Self {
        Self {
            timestamp,
            axes,
            label: None,
        }
    }

    /// Sample stamped with the current local time.
    pub fn now(axes: Vec<f64>) -> Self {
        Self::new(Local::now(), axes)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn axes(&self) -> &[f64] {
        &self.axes
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Euclidean norm of the axis vector.
    pub fn magnitude(&self) -> f64 {
        self.axes.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn validate(&self) -> Result<(), SampleError> {
        if self.axes.is_empty() {
            return Err(SampleError::NoAxes);
        }
        if let Some((index, &value)) = self.axes.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(SampleError::NonFinite { index, value });
        }
        Ok(())
    }
}

/// Fixed-size, immutable run of consecutive samples taken from the head of
/// the rolling buffer. `seq` starts at 0 and increases by one per window.
#[derive(Clone, Debug)]
pub struct Window {
    seq: u64,
    samples: Vec<Sample>,
}

impl Window {
    pub fn new(seq: u64, samples: Vec<Sample>) -> Self {
        Self { seq, samples }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_axes(&self) -> usize {
        self.samples.first().map(Sample::num_axes).unwrap_or(0)
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Local>> {
        self.samples.first().map(Sample::timestamp)
    }
}
