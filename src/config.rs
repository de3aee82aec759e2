// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::windowing::ConfigError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rolling buffer capacity C.
    pub capacity: usize,
    /// Window size N, must not exceed C.
    pub window_size: usize,
    pub sink_timeout_ms: u64,
    /// How long shutdown waits for in-flight sink writes.
    pub drain_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            window_size: 1_000,
            sink_timeout_ms: 3_000,
            drain_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindowSize);
        }
        if self.window_size > self.capacity {
            return Err(ConfigError::WindowExceedsCapacity {
                window_size: self.window_size,
                capacity: self.capacity,
            });
        }
        if self.sink_timeout_ms == 0 {
            return Err(ConfigError::ZeroSinkTimeout);
        }
        Ok(())
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub data_dir: PathBuf,
    pub graph_dir: PathBuf,
    pub axis_names: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            graph_dir: PathBuf::from("graphs"),
            axis_names: vec!["x".into(), "y".into(), "z".into()],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// Number of numeric fields per line.
    pub axes: usize,
    /// Lines carry a leading timestamp or device counter field.
    pub timestamp_prefix: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            read_timeout_ms: 1_000,
            axes: 3,
            timestamp_prefix: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub sample_rate_hz: f64,
    pub realtime: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            sample_rate_hz: 20.0,
            realtime: false,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate_hz));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub serial: SerialConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.simulation.validate()
    }

    /// Loads `path` if given, otherwise starts from the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
