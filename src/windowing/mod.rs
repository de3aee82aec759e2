// src/windowing/mod.rs
pub mod buffer;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod sample;
pub mod sinks;
pub mod source;

pub use buffer::{Ingest, WindowBuffer};
pub use consumer::{Ack, Sink, SinkFailure, SinkFailureReason, WindowConsumer};
pub use error::{ConfigError, PipelineError, SampleError, SinkError, SourceError};
pub use metrics::{AxisStats, DerivedMetrics};
pub use pipeline::{Pipeline, PipelineState, RunLimits, RunSummary, TickOutcome};
pub use plot::{
    render_axes_png, render_chart_png, render_magnitude_png, render_samples_png, PlotStyle,
};
pub use sample::{Sample, Window};
pub use sinks::{ChartSink, CsvSink, MetricsLogSink};
pub use source::{
    parse_timestamp, Activity, FallbackSource, ManualSource, ReplaySource, SampleSource,
    SimulatedSource,
};
