use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::types::ChartType;
use crate::windowing::{DerivedMetrics, Sample, SinkError};

const HIST_BINS: usize = 20;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    /// Series colours, cycled. White is used when empty.
    pub palette: Vec<RGBColor>,
    /// Captions, axis labels and legend. These need a system font.
    pub annotate: bool,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 400,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
            annotate: true,
        }
    }
}

impl PlotStyle {
    pub fn bare() -> Self {
        Self {
            annotate: false,
            ..Self::default()
        }
    }

    fn color(&self, idx: usize) -> RGBColor {
        if self.palette.is_empty() {
            WHITE
        } else {
            self.palette[idx % self.palette.len()]
        }
    }
}

/// One line chart with a trace per axis.
pub fn render_axes_png(
    samples: &[Sample],
    axis_names: &[String],
    style: &PlotStyle,
) -> Result<Vec<u8>, SinkError> {
    render_samples_png(samples, axis_names, ChartType::Line, style)
}

pub fn render_samples_png(
    samples: &[Sample],
    axis_names: &[String],
    kind: ChartType,
    style: &PlotStyle,
) -> Result<Vec<u8>, SinkError> {
    let num_axes = samples.first().map(Sample::num_axes).unwrap_or(0);
    let series: Vec<(String, Vec<f32>)> = (0..num_axes)
        .map(|axis| {
            let name = axis_names
                .get(axis)
                .cloned()
                .unwrap_or_else(|| format!("a{axis}"));
            let values = samples
                .iter()
                .map(|s| s.axes().get(axis).copied().unwrap_or(0.0) as f32)
                .collect();
            (name, values)
        })
        .collect();
    render_chart_png(&format!("axes (N={})", samples.len()), &series, kind, style)
}

pub fn render_magnitude_png(metrics: &DerivedMetrics, style: &PlotStyle) -> Result<Vec<u8>, SinkError> {
    let values = metrics.magnitude.iter().map(|&v| v as f32).collect();
    render_chart_png(
        &format!("magnitude |a| (N={})", metrics.count),
        &[("|a|".to_string(), values)],
        ChartType::Line,
        style,
    )
}

/// Padded (min, max) over every value of every series.
fn value_bounds(series: &[(String, Vec<f32>)]) -> (f32, f32) {
    let (lo, hi) = series
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if (hi - lo).abs() < f32::EPSILON {
        (lo - 1.0, hi + 1.0)
    } else {
        let pad = (hi - lo) * 0.05;
        (lo - pad, hi + pad)
    }
}

/// Counts of `values` in `bins` equal-width bins spanning `lo..hi`.
/// Values at or past the edges land in the first or last bin.
fn histogram(values: &[f32], lo: f32, hi: f32, bins: usize) -> Vec<usize> {
    let mut counts = vec![0; bins];
    let width = (hi - lo) / bins as f32;
    for &v in values {
        let idx = ((v - lo) / width).floor().max(0.0) as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    counts
}

/// Min, lower quartile, median, upper quartile and max, with linear
/// interpolation between order statistics.
fn five_numbers(values: &[f32]) -> Option<[f32; 5]> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let quantile = |q: f32| {
        let pos = q * (sorted.len() - 1) as f32;
        let below = pos.floor() as usize;
        let above = pos.ceil() as usize;
        sorted[below] + (sorted[above] - sorted[below]) * (pos - below as f32)
    };
    Some([
        sorted[0],
        quantile(0.25),
        quantile(0.5),
        quantile(0.75),
        sorted[sorted.len() - 1],
    ])
}

/// Renders `series` as `kind` into a PNG.
pub fn render_chart_png(
    title: &str,
    series: &[(String, Vec<f32>)],
    kind: ChartType,
    style: &PlotStyle,
) -> Result<Vec<u8>, SinkError> {
    let len = series.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    if len == 0 {
        return Err(SinkError::Plot("nothing to plot".into()));
    }
    let (lo, hi) = value_bounds(series);
    let bin_width = (hi - lo) / HIST_BINS as f32;
    let counts: Vec<Vec<usize>> = match kind {
        ChartType::Hist => series
            .iter()
            .map(|(_, v)| histogram(v, lo, hi, HIST_BINS))
            .collect(),
        _ => Vec::new(),
    };
    let (x_range, y_range) = match kind {
        ChartType::Line | ChartType::Scatter => (0f32..len.max(2) as f32 - 1.0, lo..hi),
        ChartType::Hist => {
            let peak = counts.iter().flatten().copied().max().unwrap_or(0);
            (lo..hi, 0f32..(peak as f32 * 1.1).max(1.0))
        }
        ChartType::Box => (-0.5f32..series.len() as f32 - 0.5, lo..hi),
    };

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;

        let mut builder = ChartBuilder::on(&root);
        builder.margin(10);
        if style.annotate {
            builder
                .caption(title, ("sans-serif", 20).into_font().color(&WHITE))
                .set_label_area_size(LabelAreaPosition::Left, 45)
                .set_label_area_size(LabelAreaPosition::Bottom, 40);
        }
        let mut chart = builder.build_cartesian_2d(x_range, y_range)?;
        if style.annotate {
            chart
                .configure_mesh()
                .light_line_style(&WHITE.mix(0.1))
                .draw()?;
        }
        for (idx, (name, values)) in series.iter().enumerate() {
            let color = style.color(idx);
            let points = values.iter().enumerate().map(|(i, v)| (i as f32, *v));
            let anno = match kind {
                ChartType::Line => chart.draw_series(LineSeries::new(points, &color))?,
                ChartType::Scatter => chart.draw_series(
                    points.map(|(x, y)| Circle::new((x, y), 2, color.filled())),
                )?,
                ChartType::Hist => {
                    chart.draw_series(counts[idx].iter().enumerate().map(|(bin, &count)| {
                        let x0 = lo + bin as f32 * bin_width;
                        Rectangle::new(
                            [(x0, 0.0), (x0 + bin_width, count as f32)],
                            color.mix(0.5).filled(),
                        )
                    }))?
                }
                ChartType::Box => {
                    let Some([min, q1, median, q3, max]) = five_numbers(values) else {
                        continue;
                    };
                    let x = idx as f32;
                    chart.draw_series(
                        [
                            vec![(x - 0.3, median), (x + 0.3, median)],
                            vec![(x, q3), (x, max)],
                            vec![(x, q1), (x, min)],
                            vec![(x - 0.15, max), (x + 0.15, max)],
                            vec![(x - 0.15, min), (x + 0.15, min)],
                        ]
                        .into_iter()
                        .map(|path| PathElement::new(path, color.stroke_width(2))),
                    )?;
                    chart.draw_series(std::iter::once(Rectangle::new(
                        [(x - 0.3, q1), (x + 0.3, q3)],
                        color.stroke_width(2),
                    )))?
                }
            };
            anno.label(name.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        }
        if style.annotate {
            chart
                .configure_series_labels()
                .border_style(&WHITE.mix(0.2))
                .background_style(&style.background)
                .draw()?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, SinkError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| SinkError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
