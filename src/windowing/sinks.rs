use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info};

use crate::windowing::plot::{render_axes_png, render_magnitude_png, PlotStyle};
use crate::windowing::{DerivedMetrics, Sink, SinkError, Window};

/// `<prefix>_<YYYYmmdd_HHMMSS>_<seq>`, stamped with the window's first sample.
fn artifact_stem(prefix: &str, window: &Window) -> String {
    let stamp = window.first_timestamp().unwrap_or_else(Local::now);
    format!(
        "{prefix}_{}_{:04}",
        stamp.format("%Y%m%d_%H%M%S"),
        window.seq()
    )
}

fn axis_name(names: &[String], idx: usize) -> String {
    names.get(idx).cloned().unwrap_or_else(|| format!("a{idx}"))
}

/// Writes every window to its own CSV file, one row per sample.
pub struct CsvSink {
    dir: PathBuf,
    axis_names: Vec<String>,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>, axis_names: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            axis_names,
        }
    }

    fn write_file(&self, path: &Path, window: &Window) -> Result<(), SinkError> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["timestamp".to_string()];
        header.extend((0..window.num_axes()).map(|i| axis_name(&self.axis_names, i)));
        header.push("label".to_string());
        writer.write_record(&header)?;
        for sample in window.samples() {
            let mut row = Vec::with_capacity(header.len());
            row.push(sample.timestamp().to_rfc3339());
            row.extend(sample.axes().iter().map(|v| v.to_string()));
            row.push(sample.label().unwrap_or_default().to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn write(&mut self, window: &Window, _metrics: &DerivedMetrics) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.csv", artifact_stem("activity", window)));
        self.write_file(&path, window)?;
        debug!("wrote {}", path.display());
        Ok(())
    }
}

/// Renders an axes chart and a magnitude chart per window as PNG files.
pub struct ChartSink {
    dir: PathBuf,
    axis_names: Vec<String>,
    style: PlotStyle,
}

impl ChartSink {
    pub fn new(dir: impl Into<PathBuf>, axis_names: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            axis_names,
            style: PlotStyle::default(),
        }
    }

    pub fn with_style(mut self, style: PlotStyle) -> Self {
        self.style = style;
        self
    }

    /// Falls back to an unannotated chart when text rendering is unavailable.
    fn render(
        &self,
        draw: impl Fn(&PlotStyle) -> Result<Vec<u8>, SinkError>,
    ) -> Result<Vec<u8>, SinkError> {
        match draw(&self.style) {
            Err(SinkError::Plot(reason)) if self.style.annotate => {
                debug!("annotated chart failed ({reason}); rendering without text");
                let bare = PlotStyle {
                    annotate: false,
                    ..self.style.clone()
                };
                draw(&bare)
            }
            other => other,
        }
    }
}

impl Sink for ChartSink {
    fn name(&self) -> &str {
        "chart"
    }

    fn write(&mut self, window: &Window, metrics: &DerivedMetrics) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir)?;
        let axes = self.render(|style| render_axes_png(window.samples(), &self.axis_names, style))?;
        let magnitude = self.render(|style| render_magnitude_png(metrics, style))?;
        let axes_path = self.dir.join(format!("{}.png", artifact_stem("xyz", window)));
        let magnitude_path = self
            .dir
            .join(format!("{}.png", artifact_stem("magnitude", window)));
        fs::write(&axes_path, axes)?;
        fs::write(&magnitude_path, magnitude)?;
        debug!(
            "wrote {} and {}",
            axes_path.display(),
            magnitude_path.display()
        );
        Ok(())
    }
}

/// Logs the metrics summary of every window.
pub struct MetricsLogSink {
    axis_names: Vec<String>,
}

impl MetricsLogSink {
    pub fn new(axis_names: Vec<String>) -> Self {
        Self { axis_names }
    }
}

impl Sink for MetricsLogSink {
    fn name(&self) -> &str {
        "metrics-log"
    }

    fn write(&mut self, window: &Window, metrics: &DerivedMetrics) -> Result<(), SinkError> {
        info!(
            "window #{}: {}",
            window.seq(),
            metrics.summary(&self.axis_names)
        );
        Ok(())
    }
}
