// src/types.rs
use std::fmt;

use clap::ValueEnum;

/// Where samples come from.
#[derive(PartialEq, Eq, Clone, Copy, Debug, ValueEnum)]
pub enum SourceMode {
    /// Comma-separated lines from a serial-attached board.
    Live,
    /// Seeded activity simulator.
    #[value(name = "sim", alias = "simulated")]
    Simulated,
    /// Previously captured CSV file.
    Replay,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Live => write!(f, "LIVE"),
            SourceMode::Simulated => write!(f, "SIMULATION"),
            SourceMode::Replay => write!(f, "REPLAY"),
        }
    }
}

/// How `browse` draws a page of samples.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, ValueEnum)]
pub enum ChartType {
    /// One trace per axis over the sample index.
    #[default]
    Line,
    /// Unconnected points per axis.
    Scatter,
    /// Value distribution per axis, overlaid.
    Hist,
    /// Min, quartiles, median and max per axis.
    Box,
}
