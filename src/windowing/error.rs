use thiserror::Error;

/// Rejected at construction time; never raised once ingestion has started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
    #[error("window size must be greater than zero")]
    ZeroWindowSize,
    #[error("window size {window_size} exceeds buffer capacity {capacity}; no window could ever complete")]
    WindowExceedsCapacity { window_size: usize, capacity: usize },
    #[error("sink timeout must be greater than zero")]
    ZeroSinkTimeout,
    #[error("sample rate must be a finite number greater than zero, got {0}")]
    InvalidSampleRate(f64),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sample source exhausted")]
    Exhausted,
    /// Nothing arrived within the read timeout. Not an error for the caller:
    /// it gets a chance to check its stop conditions and ask again.
    #[error("no sample within the read timeout")]
    Idle,
    #[error("sample source failed: {0}")]
    Failure(String),
    #[error("sample source i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sample source csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl SourceError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, SourceError::Exhausted)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SourceError::Idle)
    }
}

/// Recoverable: the sample is dropped, the buffer is untouched.
#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("malformed sample: no axis values")]
    NoAxes,
    #[error("malformed sample: axis {index} is not a finite number ({value})")]
    NonFinite { index: usize, value: f64 },
    #[error("malformed sample: axis count mismatch: expected {expected}, got {actual}")]
    AxisMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to render chart: {0}")]
    Plot(String),
    #[error("{0}")]
    Other(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for SinkError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        SinkError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for SinkError {
    fn from(value: image::ImageError) -> Self {
        SinkError::Plot(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
}
