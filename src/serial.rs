// src/serial.rs
use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use log::debug;
use serialport::{SerialPort, SerialPortType};

use crate::config::SerialConfig;
use crate::windowing::{parse_timestamp, Sample, SampleSource, SourceError};

/// Turns one comma-separated feed line into a sample.
///
/// Accepted shapes, with `axes` = K:
/// - K numeric fields, stamped with the current time;
/// - K + 1 fields whose first field is an ISO-8601 timestamp;
/// - K + 1 numeric fields when `timestamp_prefix` is set: the leading device
///   counter is replaced with the current time.
///
/// Anything else (headers, blank lines, wrong field counts, non-numeric
/// values) is discarded.
#[derive(Clone, Copy, Debug)]
pub struct LineParser {
    axes: usize,
    timestamp_prefix: bool,
}

impl LineParser {
    pub fn new(axes: usize, timestamp_prefix: bool) -> Self {
        Self {
            axes,
            timestamp_prefix,
        }
    }

    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.axes, config.timestamp_prefix)
    }

    pub fn axes(&self) -> usize {
        self.axes
    }

    pub fn parse(&self, line: &str) -> Option<Sample> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let (timestamp, values) = if fields.len() == self.axes {
            (Local::now(), &fields[..])
        } else if fields.len() == self.axes + 1 {
            let stamp = match parse_timestamp(fields[0]) {
                Some(stamp) => stamp,
                None if self.timestamp_prefix && fields[0].parse::<f64>().is_ok() => Local::now(),
                None => return None,
            };
            (stamp, &fields[1..])
        } else {
            return None;
        };
        let axes = values
            .iter()
            .map(|v| v.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect::<Option<Vec<f64>>>()?;
        Some(Sample::new(timestamp, axes))
    }
}

/// Sample source over any line-oriented reader.
///
/// A read timeout ends the call with `SourceError::Idle`. Bytes of a line
/// that was cut off by the timeout stay buffered until its newline arrives.
pub struct LineSource<R> {
    reader: R,
    parser: LineParser,
    line: Vec<u8>,
    discarded: u64,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R, parser: LineParser) -> Self {
        Self {
            reader,
            parser,
            line: Vec::new(),
            discarded: 0,
        }
    }

    pub fn discarded_lines(&self) -> u64 {
        self.discarded
    }
}

impl<R: BufRead> SampleSource for LineSource<R> {
    fn next_sample(&mut self) -> Result<Sample, SourceError> {
        loop {
            match self.reader.read_until(b'\n', &mut self.line) {
                // a tail without newline at end of input is still a line
                Ok(0) if self.line.is_empty() => return Err(SourceError::Exhausted),
                Ok(_) => {}
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(SourceError::Idle);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SourceError::Failure(format!("read failed: {err}"))),
            }
            let text = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            match self.parser.parse(&text) {
                Some(sample) => return Ok(sample),
                None => {
                    self.discarded += 1;
                    debug!("discarding feed line {:?}", text.trim());
                }
            }
        }
    }
}

pub type SerialSource = LineSource<BufReader<Box<dyn SerialPort>>>;

pub fn open_port(port: &str, config: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    serialport::new(port, config.baud)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()
        .with_context(|| format!("failed to open serial port {port} @ {} baud", config.baud))
}

/// Opens the configured port as a live sample source.
pub fn open_source(port: &str, config: &SerialConfig) -> Result<SerialSource> {
    let handle = open_port(port, config)?;
    Ok(LineSource::new(
        BufReader::new(handle),
        LineParser::from_config(config),
    ))
}

/// Names and descriptions of the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => format!(
                "{} (USB {:04x}:{:04x}{})",
                port.port_name,
                info.vid,
                info.pid,
                info.product.map(|p| format!(" {p}")).unwrap_or_default()
            ),
            SerialPortType::BluetoothPort => format!("{} (bluetooth)", port.port_name),
            SerialPortType::PciPort => format!("{} (pci)", port.port_name),
            SerialPortType::Unknown => port.port_name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Cursor, Read};

    /// Reader that replays a fixed sequence of chunks and timeouts.
    struct ScriptedPort(VecDeque<Option<&'static [u8]>>);

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::Error::new(ErrorKind::TimedOut, "read timed out")),
                None => Ok(0),
            }
        }
    }

    fn scripted(
        steps: Vec<Option<&'static [u8]>>,
        axes: usize,
    ) -> LineSource<BufReader<ScriptedPort>> {
        LineSource::new(
            BufReader::new(ScriptedPort(steps.into())),
            LineParser::new(axes, false),
        )
    }

    #[test]
    fn parses_plain_and_timestamped_lines() {
        let parser = LineParser::new(3, false);
        let sample = parser.parse("0.1, -0.2, 0.98\r\n").unwrap();
        assert_eq!(sample.axes(), [0.1, -0.2, 0.98]);

        let stamped = parser.parse("2025-08-15T09:30:00,1,2,3").unwrap();
        assert_eq!(
            stamped.timestamp().naive_local().to_string(),
            "2025-08-15 09:30:00"
        );
        assert_eq!(stamped.axes(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn device_counter_prefix_needs_the_flag() {
        assert!(LineParser::new(3, false).parse("1200,1,2,3").is_none());
        let sample = LineParser::new(3, true).parse("1200,1,2,3").unwrap();
        assert_eq!(sample.axes(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn rejects_headers_wrong_counts_and_garbage() {
        let parser = LineParser::new(3, true);
        assert!(parser.parse("time,x,y,z").is_none());
        assert!(parser.parse("").is_none());
        assert!(parser.parse("1,2").is_none());
        assert!(parser.parse("1,2,3,4,5").is_none());
        assert!(parser.parse("1,abc,3").is_none());
        assert!(parser.parse("1,NaN,3").is_none());
    }

    #[test]
    fn line_source_skips_noise_until_exhausted() {
        let feed: &[u8] = b"booting...\ntime,x,y\n1.5,2.5\n\xff\n3,4\n";
        let mut source = LineSource::new(Cursor::new(feed), LineParser::new(2, false));
        assert_eq!(source.next_sample().unwrap().axes(), [1.5, 2.5]);
        assert_eq!(source.next_sample().unwrap().axes(), [3.0, 4.0]);
        assert!(source.next_sample().unwrap_err().is_exhausted());
        assert_eq!(source.discarded_lines(), 3);
    }

    #[test]
    fn line_cut_by_timeout_is_completed_not_split() {
        let steps = vec![Some(&b"1.2"[..]), None, Some(&b"34,5.6,7.8\n"[..])];
        let mut source = scripted(steps, 3);
        assert!(source.next_sample().unwrap_err().is_idle());
        assert_eq!(source.next_sample().unwrap().axes(), [1.234, 5.6, 7.8]);
        assert!(source.next_sample().unwrap_err().is_exhausted());
        assert_eq!(source.discarded_lines(), 0);
    }

    #[test]
    fn quiet_device_reports_idle_each_call() {
        let mut source = scripted(vec![None, None, Some(&b"1,2\n"[..])], 2);
        assert!(source.next_sample().unwrap_err().is_idle());
        assert!(source.next_sample().unwrap_err().is_idle());
        assert_eq!(source.next_sample().unwrap().axes(), [1.0, 2.0]);
    }

    #[test]
    fn unterminated_last_line_is_still_parsed() {
        let feed: &[u8] = b"1,2\n3,4";
        let mut source = LineSource::new(Cursor::new(feed), LineParser::new(2, false));
        assert_eq!(source.next_sample().unwrap().axes(), [1.0, 2.0]);
        assert_eq!(source.next_sample().unwrap().axes(), [3.0, 4.0]);
        assert!(source.next_sample().unwrap_err().is_exhausted());
    }
}
