use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::PipelineConfig;
use crate::windowing::{DerivedMetrics, SinkError, Window};

/// Downstream consumer of finished windows (file writer, chart renderer, ...).
///
/// Each registered sink runs on its own worker thread, so `write` may block;
/// the consumer stops waiting after the configured sink timeout.
pub trait Sink: Send {
    fn name(&self) -> &str;
    fn write(&mut self, window: &Window, metrics: &DerivedMetrics) -> Result<(), SinkError>;
}

#[derive(Debug)]
pub enum SinkFailureReason {
    Failed(SinkError),
    TimedOut(Duration),
    /// Still writing an earlier window.
    Busy,
    /// Worker thread is gone (the sink panicked).
    Crashed,
}

impl fmt::Display for SinkFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkFailureReason::Failed(err) => write!(f, "{err}"),
            SinkFailureReason::TimedOut(after) => write!(f, "timed out after {after:?}"),
            SinkFailureReason::Busy => write!(f, "still busy with a previous window"),
            SinkFailureReason::Crashed => write!(f, "worker thread terminated"),
        }
    }
}

#[derive(Debug)]
pub struct SinkFailure {
    pub sink: String,
    pub reason: SinkFailureReason,
}

/// Outcome of [`WindowConsumer::handle`]. Failures are never fatal to the caller.
#[derive(Debug)]
pub enum Ack {
    Delivered,
    SinkFailure(Vec<SinkFailure>),
}

impl Ack {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Ack::Delivered)
    }

    pub fn failed_sinks(&self) -> Vec<&str> {
        match self {
            Ack::Delivered => Vec::new(),
            Ack::SinkFailure(failures) => failures.iter().map(|f| f.sink.as_str()).collect(),
        }
    }
}

type Job = (Arc<Window>, Arc<DerivedMetrics>);

struct SinkWorker {
    name: String,
    jobs: Option<Sender<Job>>,
    results: Receiver<Result<(), SinkError>>,
    in_flight: bool,
    thread: Option<JoinHandle<()>>,
}

impl SinkWorker {
    fn spawn(mut sink: Box<dyn Sink>) -> Result<Self, SinkError> {
        let name = sink.name().to_owned();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                for (window, metrics) in job_rx {
                    let result = sink.write(&window, &metrics);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            name,
            jobs: Some(job_tx),
            results: result_rx,
            in_flight: false,
            thread: Some(thread),
        })
    }

    /// Picks up the result of a write that outlived its timeout.
    fn collect_late(&mut self) -> Result<(), SinkFailureReason> {
        if !self.in_flight {
            return Ok(());
        }
        match self.results.try_recv() {
            Ok(result) => {
                self.in_flight = false;
                if let Err(err) = result {
                    warn!("sink '{}' late write failed: {err}", self.name);
                } else {
                    debug!("sink '{}' finished a late write", self.name);
                }
                Ok(())
            }
            Err(TryRecvError::Empty) => Err(SinkFailureReason::Busy),
            Err(TryRecvError::Disconnected) => Err(SinkFailureReason::Crashed),
        }
    }

    fn dispatch(&mut self, job: Job, timeout: Duration) -> Result<(), SinkFailureReason> {
        self.collect_late()?;
        let jobs = self.jobs.as_ref().ok_or(SinkFailureReason::Crashed)?;
        if jobs.send(job).is_err() {
            return Err(SinkFailureReason::Crashed);
        }
        self.in_flight = true;
        match self.results.recv_timeout(timeout) {
            Ok(result) => {
                self.in_flight = false;
                result.map_err(SinkFailureReason::Failed)
            }
            Err(RecvTimeoutError::Timeout) => Err(SinkFailureReason::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = false;
                Err(SinkFailureReason::Crashed)
            }
        }
    }

    /// Closes the job queue and waits for an in-flight write until `deadline`.
    /// Returns false if the worker had to be left running.
    fn finish(mut self, deadline: Instant) -> bool {
        self.jobs.take();
        if self.in_flight {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(RecvTimeoutError::Timeout) = self.results.recv_timeout(remaining) {
                return false;
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("sink '{}' worker panicked", self.name);
            }
        }
        true
    }
}

/// Computes metrics for each finished window and forwards both to the
/// registered sinks, one after another in registration order.
pub struct WindowConsumer {
    workers: Vec<SinkWorker>,
    sink_timeout: Duration,
    last: Option<Job>,
    handled: u64,
}

impl WindowConsumer {
    pub fn new(sink_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            sink_timeout,
            last: None,
            handled: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.sink_timeout())
    }

    pub fn register(&mut self, sink: impl Sink + 'static) -> Result<(), SinkError> {
        self.register_boxed(Box::new(sink))
    }

    pub fn register_boxed(&mut self, sink: Box<dyn Sink>) -> Result<(), SinkError> {
        let worker = SinkWorker::spawn(sink)?;
        debug!("registered sink '{}'", worker.name);
        self.workers.push(worker);
        Ok(())
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn windows_handled(&self) -> u64 {
        self.handled
    }

    pub fn handle(&mut self, window: Window) -> Ack {
        let metrics = Arc::new(DerivedMetrics::from_window(&window));
        let window = Arc::new(window);
        let mut failures = Vec::new();
        for worker in &mut self.workers {
            let job = (Arc::clone(&window), Arc::clone(&metrics));
            if let Err(reason) = worker.dispatch(job, self.sink_timeout) {
                warn!(
                    "sink '{}' failed on window #{}: {reason}",
                    worker.name,
                    window.seq()
                );
                failures.push(SinkFailure {
                    sink: worker.name.clone(),
                    reason,
                });
            }
        }
        self.handled += 1;
        self.last = Some((window, metrics));
        if failures.is_empty() {
            Ack::Delivered
        } else {
            Ack::SinkFailure(failures)
        }
    }

    /// Most recently handled window, kept for redisplay only.
    pub fn last(&self) -> Option<(&Window, &DerivedMetrics)> {
        self.last
            .as_ref()
            .map(|(window, metrics)| (window.as_ref(), metrics.as_ref()))
    }

    /// Lets in-flight writes finish for up to `drain_timeout`, then stops every
    /// worker. Returns the names of sinks that were still writing.
    pub fn shutdown(self, drain_timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + drain_timeout;
        let mut unfinished = Vec::new();
        for worker in self.workers {
            let name = worker.name.clone();
            if !worker.finish(deadline) {
                warn!("sink '{name}' did not finish within {drain_timeout:?}");
                unfinished.push(name);
            }
        }
        unfinished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windowing::Sample;
    use std::sync::Mutex;

    struct RecordingSink {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }
        fn write(&mut self, window: &Window, metrics: &DerivedMetrics) -> Result<(), SinkError> {
            self.log.lock().unwrap().push(format!(
                "{}:{}:{}",
                self.name,
                window.seq(),
                metrics.count
            ));
            Ok(())
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "sink1"
        }
        fn write(&mut self, _: &Window, _: &DerivedMetrics) -> Result<(), SinkError> {
            Err(SinkError::Other("storage unavailable".into()))
        }
    }

    struct SlowSink(Duration);

    impl Sink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }
        fn write(&mut self, _: &Window, _: &DerivedMetrics) -> Result<(), SinkError> {
            thread::sleep(self.0);
            Ok(())
        }
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn name(&self) -> &str {
            "panicky"
        }
        fn write(&mut self, _: &Window, _: &DerivedMetrics) -> Result<(), SinkError> {
            panic!("sink bug");
        }
    }

    fn window(seq: u64) -> Window {
        Window::new(
            seq,
            vec![
                Sample::now(vec![1.0, 0.0, 0.0]),
                Sample::now(vec![0.0, 1.0, 0.0]),
            ],
        )
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> RecordingSink {
        RecordingSink {
            name: name.into(),
            log: Arc::clone(log),
        }
    }

    #[test]
    fn failing_sink_does_not_skip_the_next_one() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = WindowConsumer::new(Duration::from_secs(2));
        consumer.register(FailingSink).unwrap();
        consumer.register(recorder("sink2", &log)).unwrap();

        let ack = consumer.handle(window(0));
        assert_eq!(ack.failed_sinks(), vec!["sink1"]);
        assert_eq!(*log.lock().unwrap(), vec!["sink2:0:2".to_string()]);
        assert!(consumer.shutdown(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn sinks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = WindowConsumer::new(Duration::from_secs(2));
        for name in ["a", "b", "c"] {
            consumer.register(recorder(name, &log)).unwrap();
        }
        assert!(consumer.handle(window(0)).is_delivered());
        assert!(consumer.handle(window(1)).is_delivered());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:0:2", "b:0:2", "c:0:2", "a:1:2", "b:1:2", "c:1:2"]
        );
        assert_eq!(consumer.sink_names(), vec!["a", "b", "c"]);
        assert_eq!(consumer.windows_handled(), 2);
    }

    #[test]
    fn hung_sink_times_out_then_reports_busy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut consumer = WindowConsumer::new(Duration::from_millis(50));
        consumer.register(SlowSink(Duration::from_millis(400))).unwrap();
        consumer.register(recorder("fast", &log)).unwrap();

        let started = Instant::now();
        let first = consumer.handle(window(0));
        let Ack::SinkFailure(failures) = first else {
            panic!("slow sink should have timed out");
        };
        assert!(matches!(failures[0].reason, SinkFailureReason::TimedOut(_)));

        let second = consumer.handle(window(1));
        let Ack::SinkFailure(failures) = second else {
            panic!("slow sink should still be busy");
        };
        assert!(matches!(failures[0].reason, SinkFailureReason::Busy));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(log.lock().unwrap().len(), 2);

        // the in-flight write is allowed to finish
        assert!(consumer.shutdown(Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn drain_gives_up_on_sinks_past_the_deadline() {
        let mut consumer = WindowConsumer::new(Duration::from_millis(10));
        consumer.register(SlowSink(Duration::from_millis(500))).unwrap();
        assert!(!consumer.handle(window(0)).is_delivered());
        let unfinished = consumer.shutdown(Duration::from_millis(20));
        assert_eq!(unfinished, vec!["slow".to_string()]);
    }

    #[test]
    fn panicking_sink_is_reported_as_crashed() {
        let mut consumer = WindowConsumer::new(Duration::from_secs(2));
        consumer.register(PanickingSink).unwrap();
        let Ack::SinkFailure(failures) = consumer.handle(window(0)) else {
            panic!("expected failure");
        };
        assert!(matches!(failures[0].reason, SinkFailureReason::Crashed));
        let Ack::SinkFailure(failures) = consumer.handle(window(1)) else {
            panic!("expected failure");
        };
        assert!(matches!(failures[0].reason, SinkFailureReason::Crashed));
    }

    #[test]
    fn empty_window_is_handled_with_undefined_metrics() {
        let mut consumer = WindowConsumer::new(Duration::from_secs(1));
        assert!(consumer.handle(Window::new(7, Vec::new())).is_delivered());
        let (window, metrics) = consumer.last().unwrap();
        assert_eq!(window.seq(), 7);
        assert!(!metrics.is_defined());
    }
}
