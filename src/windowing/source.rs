use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::windowing::{ConfigError, Sample, SourceError};

/// Anything that can yield samples one at a time.
///
/// `next_sample` may block until a sample is available. `SourceError::Exhausted`
/// ends a run cleanly; every other error is fatal to the driving loop.
pub trait SampleSource {
    fn next_sample(&mut self) -> Result<Sample, SourceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        (**self).next_sample()
    }
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Sample>,
}

impl ManualSource {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }
}

impl SampleSource for ManualSource {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        self.queue.pop_front().ok_or(SourceError::Exhausted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Walk,
    Jog,
    Jump,
}

impl Activity {
    const ALL: [Activity; 4] = [Activity::Idle, Activity::Walk, Activity::Jog, Activity::Jump];

    fn segment_secs(self) -> f64 {
        match self {
            Activity::Idle => 6.0,
            Activity::Walk => 10.0,
            Activity::Jog => 8.0,
            Activity::Jump => 5.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Idle => "idle",
            Activity::Walk => "walk",
            Activity::Jog => "jog",
            Activity::Jump => "jump",
        }
    }
}

/// Synthetic three-axis accelerometer (units of g) cycling through activity
/// segments. Deterministic for a given seed; timestamps advance by one
/// sample period from the moment the source was created.
pub struct SimulatedSource {
    rng: StdRng,
    t: f64,
    dt: f64,
    activity: Activity,
    segment_end: f64,
    origin: DateTime<Local>,
    realtime: bool,
}

impl SimulatedSource {
    pub fn new(seed: u64, sample_rate_hz: f64) -> Result<Self, ConfigError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(sample_rate_hz));
        }
        let mut source = Self {
            rng: StdRng::seed_from_u64(seed),
            t: 0.0,
            dt: 1.0 / sample_rate_hz,
            activity: Activity::Idle,
            segment_end: 0.0,
            origin: Local::now(),
            realtime: false,
        };
        source.schedule_next();
        Ok(source)
    }

    /// Sleep one sample period per call, like a device would.
    pub fn realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    fn schedule_next(&mut self) {
        self.activity = Activity::ALL[self.rng.gen_range(0..Activity::ALL.len())];
        self.segment_end = self.t + self.activity.segment_secs();
    }

    /// Box-Muller normal deviate with mean 0.
    fn gauss(&mut self, sigma: f64) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        sigma * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    fn step(&mut self) -> Result<Sample, SourceError> {
        if self.t >= self.segment_end {
            self.schedule_next();
        }
        let t = self.t;
        let phase = |freq: f64| std::f64::consts::TAU * freq * t;
        let (mut ax, mut ay, mut az) = (0.0, 0.0, 1.0);
        match self.activity {
            Activity::Idle => {
                ax += self.gauss(0.01);
                ay += self.gauss(0.01);
                az += self.gauss(0.01);
            }
            Activity::Walk => {
                ax += 0.15 * phase(1.8).sin() + self.gauss(0.02);
                ay += 0.10 * phase(1.8).cos() + self.gauss(0.02);
                az += 0.08 * (phase(1.8) + 0.7).sin() + self.gauss(0.02);
            }
            Activity::Jog => {
                ax += 0.35 * phase(3.0).sin() + self.gauss(0.03);
                ay += 0.25 * phase(3.0).cos() + self.gauss(0.03);
                az += 0.20 * (phase(3.0) + 0.5).sin() + self.gauss(0.03);
            }
            Activity::Jump => {
                if (t * 2.0) as i64 % 3 == 0 {
                    az += 0.8 + self.gauss(0.05);
                }
                ax += self.gauss(0.05);
                ay += self.gauss(0.05);
            }
        }
        let offset = chrono::Duration::microseconds((t * 1e6).round() as i64);
        let timestamp = self
            .origin
            .checked_add_signed(offset)
            .ok_or_else(|| SourceError::Failure(format!("simulated clock overflowed at t={t}s")))?;
        self.t += self.dt;
        Ok(Sample::new(timestamp, vec![ax, ay, az]).with_label(self.activity.as_str()))
    }
}

impl SampleSource for SimulatedSource {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        if self.realtime {
            thread::sleep(Duration::from_secs_f64(self.dt));
        }
        self.step()
    }
}

const TIMESTAMP_COLUMNS: [&str; 5] = ["time", "timestamp", "timestamp_iso", "ts", "datetime"];
const IGNORED_COLUMNS: [&str; 1] = ["date"];

/// Parses RFC 3339 or naive ISO-8601 timestamps (naive ones are local time).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Local));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}

/// Which CSV columns hold the timestamp, label and axis values.
#[derive(Clone, Debug)]
struct ColumnLayout {
    timestamp: Option<usize>,
    label: Option<usize>,
    axes: Vec<usize>,
    axis_names: Vec<String>,
}

impl ColumnLayout {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut layout = ColumnLayout {
            timestamp: None,
            label: None,
            axes: Vec::new(),
            axis_names: Vec::new(),
        };
        for (idx, raw) in headers.iter().enumerate() {
            let name = raw.trim().to_lowercase();
            if layout.timestamp.is_none() && TIMESTAMP_COLUMNS.contains(&name.as_str()) {
                layout.timestamp = Some(idx);
            } else if name == "label" {
                layout.label = Some(idx);
            } else if !IGNORED_COLUMNS.contains(&name.as_str()) {
                layout.axes.push(idx);
                layout.axis_names.push(name);
            }
        }
        layout
    }

    fn parse(&self, record: &csv::StringRecord) -> Option<Sample> {
        let axes = self
            .axes
            .iter()
            .map(|&idx| record.get(idx)?.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;
        if axes.is_empty() {
            return None;
        }
        let timestamp = self
            .timestamp
            .and_then(|idx| record.get(idx))
            .and_then(parse_timestamp)
            .unwrap_or_else(Local::now);
        let sample = Sample::new(timestamp, axes);
        Some(match self.label.and_then(|idx| record.get(idx)) {
            Some(label) if !label.trim().is_empty() => sample.with_label(label.trim()),
            _ => sample,
        })
    }
}

/// Plays back a previously captured sensor CSV, one row per sample.
/// Rows that do not parse are skipped and never reach the buffer.
pub struct ReplaySource<R> {
    reader: csv::Reader<R>,
    layout: ColumnLayout,
    record: csv::StringRecord,
    skipped: u64,
}

impl ReplaySource<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            SourceError::Failure(format!("cannot open replay file {}: {err}", path.display()))
        })?;
        Self::from_reader(file)
    }
}

impl<R: Read> ReplaySource<R> {
    pub fn from_reader(reader: R) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let layout = ColumnLayout::from_headers(reader.headers()?);
        if layout.axes.is_empty() {
            return Err(SourceError::Failure(
                "replay file has no axis columns".into(),
            ));
        }
        Ok(Self {
            reader,
            layout,
            record: csv::StringRecord::new(),
            skipped: 0,
        })
    }

    pub fn axis_names(&self) -> &[String] {
        &self.layout.axis_names
    }

    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    /// Reads every remaining row.
    pub fn read_all(&mut self) -> Result<Vec<Sample>, SourceError> {
        let mut samples = Vec::new();
        loop {
            match self.next_sample() {
                Ok(sample) => samples.push(sample),
                Err(SourceError::Exhausted) => return Ok(samples),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R: Read> SampleSource for ReplaySource<R> {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        loop {
            if !self.reader.read_record(&mut self.record)? {
                return Err(SourceError::Exhausted);
            }
            if let Some(sample) = self.layout.parse(&self.record) {
                return Ok(sample);
            }
            self.skipped += 1;
            debug!("skipping malformed replay row {:?}", self.record);
        }
    }
}

/// Serves a sample from `fallback` whenever `primary` fails.
/// Exhaustion and idle timeouts of the primary are passed through unchanged.
pub struct FallbackSource<P, F> {
    primary: P,
    fallback: F,
    fallbacks: u64,
}

impl<P: SampleSource, F: SampleSource> FallbackSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            fallbacks: 0,
        }
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }
}

impl<P: SampleSource, F: SampleSource> SampleSource for FallbackSource<P, F> {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        match self.primary.next_sample() {
            Ok(sample) => Ok(sample),
            Err(err) if err.is_exhausted() || err.is_idle() => Err(err),
            Err(err) => {
                self.fallbacks += 1;
                warn!("primary source failed ({err}); using fallback sample");
                self.fallback.next_sample()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSource;

    impl SampleSource for BrokenSource {
        fn next_sample(&mut self) -> Result<Sample, SourceError> {
            Err(SourceError::Failure("link down".into()))
        }
    }

    #[test]
    fn manual_source_drains_then_reports_exhaustion() {
        let mut source = ManualSource::new(vec![Sample::now(vec![1.0])]);
        assert!(source.next_sample().is_ok());
        assert!(source.next_sample().unwrap_err().is_exhausted());
    }

    #[test]
    fn simulation_is_reproducible_for_a_seed() {
        let mut a = SimulatedSource::new(42, 20.0).unwrap();
        let mut b = SimulatedSource::new(42, 20.0).unwrap();
        for _ in 0..200 {
            let (sa, sb) = (a.next_sample().unwrap(), b.next_sample().unwrap());
            assert_eq!(sa.axes(), sb.axes());
            assert_eq!(sa.label(), sb.label());
            assert_eq!(sa.num_axes(), 3);
            assert!(sa.validate().is_ok());
        }
    }

    #[test]
    fn simulation_rejects_unusable_sample_rates() {
        for rate in [0.0, -20.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                SimulatedSource::new(42, rate),
                Err(ConfigError::InvalidSampleRate(_))
            ));
        }
        let mut slow = SimulatedSource::new(42, 1e-6).unwrap();
        assert!(slow.next_sample().is_ok());
        assert!(slow.next_sample().is_ok());
    }

    #[test]
    fn simulated_timestamps_advance_by_one_period() {
        let mut source = SimulatedSource::new(1, 20.0).unwrap();
        let first = source.next_sample().unwrap();
        let second = source.next_sample().unwrap();
        let gap = second.timestamp() - first.timestamp();
        assert_eq!(gap.num_milliseconds(), 50);
    }

    #[test]
    fn replay_detects_columns_and_skips_bad_rows() {
        let data = "\
timestamp,x,y,z,label
2025-08-15T09:30:00,1.0,2.0,3.0,walk
2025-08-15T09:30:01,oops,2.0,3.0,walk
2025-08-15T09:30:02,4.0,5.0
2025-08-15T09:30:03,-1.5,0,0.25,
";
        let mut source = ReplaySource::from_reader(data.as_bytes()).unwrap();
        assert_eq!(source.axis_names(), ["x", "y", "z"]);
        let samples = source.read_all().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].axes(), [1.0, 2.0, 3.0]);
        assert_eq!(samples[0].label(), Some("walk"));
        assert_eq!(samples[1].label(), None);
        assert_eq!(
            samples[1].timestamp().naive_local().to_string(),
            "2025-08-15 09:30:03"
        );
        assert_eq!(source.skipped_rows(), 2);
    }

    #[test]
    fn replay_without_axis_columns_is_rejected() {
        let data = "time,label\n2025-01-01T00:00:00,idle\n";
        assert!(ReplaySource::from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn fallback_covers_failures_but_not_exhaustion() {
        let mut source =
            FallbackSource::new(BrokenSource, ManualSource::new(vec![Sample::now(vec![9.0])]));
        assert_eq!(source.next_sample().unwrap().axes(), [9.0]);
        assert_eq!(source.fallbacks(), 1);
        // fallback itself is now empty
        assert!(source.next_sample().unwrap_err().is_exhausted());

        let simulator = SimulatedSource::new(0, 10.0).unwrap();
        let mut done = FallbackSource::new(ManualSource::new(Vec::<Sample>::new()), simulator);
        assert!(done.next_sample().unwrap_err().is_exhausted());
        assert_eq!(done.fallbacks(), 0);
    }

    #[test]
    fn parses_common_timestamp_shapes() {
        assert!(parse_timestamp("2025-08-15T09:30:00+00:00").is_some());
        assert!(parse_timestamp("2025-08-15T09:30:00.250").is_some());
        assert!(parse_timestamp("2025-08-15 09:30:00").is_some());
        assert!(parse_timestamp("12345").is_none());
    }
}
