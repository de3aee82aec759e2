// src/recorder.rs
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::info;

use crate::windowing::{Sample, SampleSource, SinkError, SourceError};

/// Appends accepted feed samples to a CSV file: ISO timestamp, then the axis
/// values. Every row is flushed as soon as it is written.
pub struct CsvRecorder {
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
    rows: u64,
}

impl CsvRecorder {
    pub fn create(path: impl AsRef<Path>, axis_names: &[String]) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&path)?;
        let mut header = vec!["timestamp"];
        header.extend(axis_names.iter().map(String::as_str));
        writer.write_record(&header)?;
        writer.flush()?;
        info!("recording started: {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path,
            rows: 0,
        })
    }

    pub fn write_sample(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let Some(writer) = &mut self.writer else {
            return Err(SinkError::Other("recorder already stopped".into()));
        };
        let mut row = vec![sample
            .timestamp()
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string()];
        row.extend(sample.axes().iter().map(|v| v.to_string()));
        writer.write_record(&row)?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("recording saved: {} ({} rows)", self.path.display(), self.rows);
        }
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Copies samples from `source` into `recorder` until the source runs dry,
/// `stop` is set, or `deadline` passes. Returns the number of rows written.
pub fn record_feed<S: SampleSource>(
    source: &mut S,
    recorder: &mut CsvRecorder,
    stop: &AtomicBool,
    deadline: Option<Instant>,
) -> anyhow::Result<u64> {
    let start_rows = recorder.rows();
    while !stop.load(Ordering::Relaxed) && deadline.map_or(true, |d| Instant::now() < d) {
        match source.next_sample() {
            Ok(sample) => recorder.write_sample(&sample)?,
            Err(SourceError::Idle) => continue,
            Err(SourceError::Exhausted) => break,
            Err(err) => return Err(err.into()),
        }
    }
    recorder.stop()?;
    Ok(recorder.rows() - start_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{LineParser, LineSource};
    use crate::windowing::ManualSource;
    use std::io::{self, BufReader, Read};
    use std::time::Duration;

    struct SilentPort;

    impl Read for SilentPort {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
        }
    }

    #[test]
    fn records_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.csv");
        let names = vec!["temp_c".to_string(), "hum_pct".to_string()];
        let mut recorder = CsvRecorder::create(&path, &names).unwrap();
        let mut source = ManualSource::new(vec![
            Sample::now(vec![25.2, 52.1]),
            Sample::now(vec![25.3, 51.9]),
        ]);
        let written = record_feed(&mut source, &mut recorder, &AtomicBool::new(false), None).unwrap();
        assert_eq!(written, 2);
        assert!(!recorder.is_recording());

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,temp_c,hum_pct");
        assert!(lines[1].ends_with(",25.2,52.1"));
        assert!(lines[2].contains('T'));
        assert!(recorder.write_sample(&Sample::now(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn stop_flag_prevents_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = CsvRecorder::create(dir.path().join("a.csv"), &["x".to_string()]).unwrap();
        let mut source = ManualSource::new(vec![Sample::now(vec![1.0])]);
        let written = record_feed(&mut source, &mut recorder, &AtomicBool::new(true), None).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn silent_feed_still_honours_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = CsvRecorder::create(dir.path().join("quiet.csv"), &["x".to_string()]).unwrap();
        let mut source = LineSource::new(BufReader::new(SilentPort), LineParser::new(1, false));
        let started = Instant::now();
        let deadline = Some(started + Duration::from_millis(100));
        let written = record_feed(&mut source, &mut recorder, &AtomicBool::new(false), deadline).unwrap();
        assert_eq!(written, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!recorder.is_recording());
    }
}
