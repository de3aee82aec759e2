use std::collections::VecDeque;

use log::{info, warn};

use crate::config::PipelineConfig;
use crate::windowing::{ConfigError, Sample, SampleError, Window};

/// Result of a single `ingest` call.
#[derive(Debug)]
pub enum Ingest {
    WindowReady(Window),
    Pending,
}

impl Ingest {
    pub fn is_ready(&self) -> bool {
        matches!(self, Ingest::WindowReady(_))
    }
}

/// Capacity-bounded rolling buffer that hands out fixed-size windows from its head.
///
/// Appends go to the tail. Once the buffer holds more than `capacity`
/// samples the oldest ones are dropped. As soon as `window_size` samples are
/// buffered (and extraction is not paused) the oldest `window_size` samples
/// leave the buffer as one [`Window`].
pub struct WindowBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    window_size: usize,
    num_axes: Option<usize>,
    paused: bool,
    next_seq: u64,
    evicted_total: u64,
    evicting: bool,
}

impl WindowBuffer {
    pub fn new(capacity: usize, window_size: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if window_size == 0 {
            return Err(ConfigError::ZeroWindowSize);
        }
        if window_size > capacity {
            return Err(ConfigError::WindowExceedsCapacity {
                window_size,
                capacity,
            });
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
            window_size,
            num_axes: None,
            paused: false,
            next_seq: 0,
            evicted_total: 0,
            evicting: false,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(config.capacity, config.window_size)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Axis count locked in by the first accepted sample.
    pub fn num_axes(&self) -> Option<usize> {
        self.num_axes
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn windows_extracted(&self) -> u64 {
        self.next_seq
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// While paused, samples keep arriving and capacity eviction applies, but
    /// no window is extracted.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn ingest(&mut self, sample: Sample) -> Result<Ingest, SampleError> {
        sample.validate()?;
        match self.num_axes {
            Some(expected) if expected != sample.num_axes() => {
                return Err(SampleError::AxisMismatch {
                    expected,
                    actual: sample.num_axes(),
                });
            }
            Some(_) => {}
            None => self.num_axes = Some(sample.num_axes()),
        }

        self.samples.push_back(sample);
        let mut evicted = 0u64;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            if !self.evicting {
                warn!(
                    "rolling buffer full (capacity {}); dropping oldest samples",
                    self.capacity
                );
            }
            self.evicted_total += evicted;
        }
        self.evicting = evicted > 0;

        if self.paused || self.samples.len() < self.window_size {
            return Ok(Ingest::Pending);
        }
        let window = Window::new(
            self.next_seq,
            self.samples.drain(..self.window_size).collect(),
        );
        self.next_seq += 1;
        info!(
            "window #{} extracted ({} samples, {} left in buffer)",
            window.seq(),
            window.len(),
            self.samples.len()
        );
        Ok(Ingest::WindowReady(window))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Copy of the newest `count` buffered samples, oldest first.
    pub fn recent(&self, count: usize) -> Vec<Sample> {
        self.samples
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(v: f64) -> Sample {
        Sample::now(vec![v, 0.0, 0.0])
    }

    fn first_axis(samples: &[Sample]) -> Vec<f64> {
        samples.iter().map(|s| s.axes()[0]).collect()
    }

    #[test]
    fn rejects_window_larger_than_capacity() {
        let err = WindowBuffer::new(1000, 2000).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::WindowExceedsCapacity {
                window_size: 2000,
                capacity: 1000
            }
        ));
        assert!(matches!(
            WindowBuffer::new(0, 0).err().unwrap(),
            ConfigError::ZeroCapacity
        ));
        assert!(matches!(
            WindowBuffer::new(10, 0).err().unwrap(),
            ConfigError::ZeroWindowSize
        ));
    }

    #[test]
    fn window_completes_after_exactly_n_ingests() {
        let mut buffer = WindowBuffer::new(10, 4).unwrap();
        for i in 0..3 {
            assert!(!buffer.ingest(sample(i as f64)).unwrap().is_ready());
        }
        let Ingest::WindowReady(window) = buffer.ingest(sample(3.0)).unwrap() else {
            panic!("expected a window after the fourth sample");
        };
        assert_eq!(window.seq(), 0);
        assert_eq!(first_axis(window.samples()), vec![0.0, 1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.windows_extracted(), 1);
    }

    #[test]
    fn windows_are_disjoint_and_cover_every_sample() {
        let mut buffer = WindowBuffer::new(8, 3).unwrap();
        let mut seen = Vec::new();
        for i in 0..10 {
            if let Ingest::WindowReady(window) = buffer.ingest(sample(i as f64)).unwrap() {
                seen.extend(first_axis(window.samples()));
            }
        }
        assert_eq!(seen, (0..9).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(first_axis(&buffer.recent(10)), vec![9.0]);
    }

    #[test]
    fn capacity_is_never_exceeded_while_paused() {
        let mut buffer = WindowBuffer::new(5, 2).unwrap();
        buffer.set_paused(true);
        for i in 0..12 {
            assert!(!buffer.ingest(sample(i as f64)).unwrap().is_ready());
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.evicted_total(), 7);
        assert_eq!(first_axis(&buffer.recent(5)), vec![7.0, 8.0, 9.0, 10.0, 11.0]);

        // Eviction happens before extraction, so sample 7 is dropped first.
        buffer.set_paused(false);
        let Ingest::WindowReady(first) = buffer.ingest(sample(12.0)).unwrap() else {
            panic!("expected backlog window");
        };
        assert_eq!(first_axis(first.samples()), vec![8.0, 9.0]);
        assert_eq!(buffer.evicted_total(), 8);
        let Ingest::WindowReady(second) = buffer.ingest(sample(13.0)).unwrap() else {
            panic!("expected second backlog window");
        };
        assert_eq!(first_axis(second.samples()), vec![10.0, 11.0]);
        assert_eq!(second.seq(), 1);
        assert_eq!(first_axis(&buffer.recent(5)), vec![12.0, 13.0]);
    }

    #[test]
    fn malformed_samples_are_not_buffered() {
        let mut buffer = WindowBuffer::new(10, 5).unwrap();
        buffer.ingest(sample(1.0)).unwrap();
        let err = buffer.ingest(Sample::now(vec![1.0, 2.0])).unwrap_err();
        assert_eq!(
            err,
            SampleError::AxisMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert!(buffer
            .ingest(Sample::now(vec![f64::INFINITY, 0.0, 0.0]))
            .is_err());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn out_of_order_timestamps_are_kept_in_arrival_order() {
        let mut buffer = WindowBuffer::new(4, 2).unwrap();
        let later = Sample::now(vec![1.0]);
        let earlier = Sample::new(later.timestamp() - chrono::Duration::seconds(5), vec![2.0]);
        buffer.ingest(later.clone()).unwrap();
        let Ingest::WindowReady(window) = buffer.ingest(earlier.clone()).unwrap() else {
            panic!("expected a window");
        };
        assert_eq!(window.samples(), &[later, earlier]);
    }

    #[test]
    fn inspection_never_returns_extracted_samples() {
        let mut buffer = WindowBuffer::new(6, 2).unwrap();
        buffer.ingest(sample(0.0)).unwrap();
        assert!(buffer.ingest(sample(1.0)).unwrap().is_ready());
        buffer.ingest(sample(2.0)).unwrap();
        assert_eq!(first_axis(&buffer.recent(10)), vec![2.0]);
        assert_eq!(buffer.iter().count(), 1);
        assert_eq!(buffer.windows_extracted(), 1);
    }
}
