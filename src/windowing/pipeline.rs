use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::windowing::{
    Ack, ConfigError, Ingest, PipelineError, SampleError, SampleSource, SourceError,
    WindowBuffer, WindowConsumer,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Ingesting,
    WindowReady,
    Consuming,
    Stopped,
    Failed,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The source had nothing within its read timeout.
    Idle,
    Pending,
    Consumed(Ack),
    Rejected(SampleError),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RunLimits {
    pub max_samples: Option<u64>,
    pub max_windows: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub samples: u64,
    pub rejected: u64,
    pub windows: u64,
    /// Windows where at least one sink failed.
    pub degraded_windows: u64,
    pub exhausted: bool,
}

/// Drives source -> buffer -> consumer one tick at a time.
pub struct Pipeline<S: SampleSource> {
    source: S,
    buffer: WindowBuffer,
    consumer: WindowConsumer,
    state: PipelineState,
    drain_timeout: Duration,
    summary: RunSummary,
    pause: Option<Arc<AtomicBool>>,
}

impl<S: SampleSource> Pipeline<S> {
    pub fn new(source: S, config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            buffer: WindowBuffer::from_config(config)?,
            consumer: WindowConsumer::from_config(config),
            state: PipelineState::Idle,
            drain_timeout: config.drain_timeout(),
            summary: RunSummary::default(),
            pause: None,
        })
    }

    /// Extraction follows `flag` between ticks: while it is set, samples are
    /// still buffered (and evicted at capacity) but no window is cut.
    pub fn with_pause_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.pause = Some(flag);
        self
    }

    pub fn consumer_mut(&mut self) -> &mut WindowConsumer {
        &mut self.consumer
    }

    pub fn consumer(&self) -> &WindowConsumer {
        &self.consumer
    }

    pub fn buffer(&self) -> &WindowBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut WindowBuffer {
        &mut self.buffer
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            debug!("pipeline {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn tick(&mut self) -> Result<TickOutcome, PipelineError> {
        self.transition(PipelineState::Ingesting);
        let sample = match self.source.next_sample() {
            Ok(sample) => sample,
            Err(SourceError::Idle) => return Ok(TickOutcome::Idle),
            Err(err) => {
                self.transition(if err.is_exhausted() {
                    PipelineState::Stopped
                } else {
                    PipelineState::Failed
                });
                return Err(err.into());
            }
        };
        self.summary.samples += 1;
        match self.buffer.ingest(sample) {
            Err(err) => {
                self.summary.rejected += 1;
                warn!("rejected sample: {err}");
                Ok(TickOutcome::Rejected(err))
            }
            Ok(Ingest::Pending) => Ok(TickOutcome::Pending),
            Ok(Ingest::WindowReady(window)) => {
                self.transition(PipelineState::WindowReady);
                self.transition(PipelineState::Consuming);
                let ack = self.consumer.handle(window);
                self.summary.windows += 1;
                if !ack.is_delivered() {
                    self.summary.degraded_windows += 1;
                }
                self.transition(PipelineState::Ingesting);
                Ok(TickOutcome::Consumed(ack))
            }
        }
    }

    /// Ticks until `stop` is set, a limit is reached or the source runs dry.
    ///
    /// A failing source ends the run with an error; the buffer keeps whatever
    /// was not yet windowed so it can be inspected afterwards.
    pub fn run(&mut self, stop: &AtomicBool, limits: RunLimits) -> Result<RunSummary, PipelineError> {
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested");
                break;
            }
            if limits.max_samples.is_some_and(|max| self.summary.samples >= max)
                || limits.max_windows.is_some_and(|max| self.summary.windows >= max)
            {
                info!("run limit reached");
                break;
            }
            self.sync_pause();
            match self.tick() {
                Ok(_) => {}
                Err(PipelineError::Source(SourceError::Exhausted)) => {
                    info!("source exhausted after {} samples", self.summary.samples);
                    self.summary.exhausted = true;
                    break;
                }
                Err(err) => {
                    error!("{err}; {} samples left in buffer", self.buffer.len());
                    return Err(err);
                }
            }
        }
        self.transition(PipelineState::Stopped);
        Ok(self.summary)
    }

    fn sync_pause(&mut self) {
        let Some(flag) = &self.pause else {
            return;
        };
        let paused = flag.load(Ordering::Relaxed);
        if paused != self.buffer.is_paused() {
            info!("window extraction {}", if paused { "paused" } else { "resumed" });
            self.buffer.set_paused(paused);
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "samples_in_buffer={} | window_size={} | windows={} | evicted={}",
            self.buffer.len(),
            self.buffer.window_size(),
            self.buffer.windows_extracted(),
            self.buffer.evicted_total()
        )
    }

    /// Drains in-flight sink writes and returns the names of sinks that did
    /// not finish in time.
    pub fn shutdown(self) -> Vec<String> {
        self.consumer.shutdown(self.drain_timeout)
    }
}
