// src/main.rs
mod analysis;
mod config;
mod dashboard;
mod recorder;
mod serial;
mod types;
mod windowing;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};

use crate::config::AppConfig;
use crate::dashboard::{PageEvent, PageState};
use crate::recorder::CsvRecorder;
use crate::types::{ChartType, SourceMode};
use crate::windowing::{
    ChartSink, CsvSink, FallbackSource, MetricsLogSink, Pipeline, PlotStyle, ReplaySource,
    RunLimits, SampleSource, SimulatedSource, SinkError,
};

#[derive(Parser)]
#[command(name = "sensorwin", version, about = "Windowed sensor-sample capture and summaries")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// JSON config file; command-line flags take precedence.
    #[arg(long, global = true, env = "SENSORWIN_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest samples, cut them into windows and write CSV/PNG artifacts.
    Run(RunArgs),
    /// Log a serial feed straight to a CSV file.
    Log(LogArgs),
    /// Page through a captured CSV and print per-page statistics.
    Browse(BrowseArgs),
    /// Baseline one axis of a captured session and report slouch KPIs.
    Analyze(AnalyzeArgs),
    /// List available serial ports.
    Ports,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, value_enum, default_value_t = SourceMode::Simulated)]
    source: SourceMode,
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// CSV file for `--source replay`.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Substitute simulated samples when the live feed fails.
    #[arg(long)]
    fallback_sim: bool,
    #[arg(long)]
    capacity: Option<usize>,
    #[arg(long)]
    window_size: Option<usize>,
    #[arg(long)]
    sink_timeout_ms: Option<u64>,
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    graph_dir: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Pace the simulator at its sample rate.
    #[arg(long)]
    realtime: bool,
    #[arg(long)]
    max_samples: Option<u64>,
    #[arg(long)]
    max_windows: Option<u64>,
    /// Skip PNG rendering.
    #[arg(long)]
    no_charts: bool,
}

#[derive(Args)]
struct LogArgs {
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    #[arg(long, default_value = "sensor_data.csv")]
    out: PathBuf,
    /// Numeric fields per line.
    #[arg(long)]
    axes: Option<usize>,
    /// Column names, comma separated.
    #[arg(long, value_delimiter = ',')]
    names: Vec<String>,
    /// Lines start with a device counter that is replaced by wall-clock time.
    #[arg(long)]
    timestamp_prefix: bool,
    /// Stop after this many minutes.
    #[arg(long)]
    minutes: Option<f64>,
    /// Give the board time to reset after the port opens.
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,
}

#[derive(Args)]
struct BrowseArgs {
    file: PathBuf,
    #[arg(long, default_value_t = dashboard::DEFAULT_PAGE_SIZE)]
    page_size: usize,
    #[arg(long, default_value_t = 0)]
    page: usize,
    /// Axis columns to include, comma separated (default: all).
    #[arg(long, value_delimiter = ',')]
    axes: Vec<String>,
    /// Write a chart of the page to this PNG file.
    #[arg(long)]
    chart: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ChartType::Line)]
    chart_type: ChartType,
}

#[derive(Args)]
struct AnalyzeArgs {
    file: PathBuf,
    /// Axis column to analyse (default: pitch_deg if present, else the first).
    #[arg(long)]
    axis: Option<String>,
    /// Readings averaged into the baseline.
    #[arg(long, default_value_t = analysis::DEFAULT_BASELINE_COUNT)]
    baseline_count: usize,
    /// Allowed distance from the baseline before a reading is a slouch.
    #[arg(long, default_value_t = analysis::DEFAULT_SLOUCH_DELTA)]
    delta: f64,
    #[arg(long, default_value = "session_summary.txt")]
    summary: PathBuf,
    /// Write the axis with baseline and thresholds to this PNG file.
    #[arg(long)]
    chart: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Run(args) => run(config, args),
        Command::Log(args) => log_feed(config, args),
        Command::Browse(args) => browse(args),
        Command::Analyze(args) => analyze(args),
        Command::Ports => {
            for port in serial::list_ports()? {
                println!("{port}");
            }
            Ok(())
        }
    }
}

/// Applies console commands read from `input`: `p` toggles `pause`, any
/// other line sets `stop`. Closed input changes nothing.
fn read_controls(mut input: impl BufRead, stop: &AtomicBool, pause: &AtomicBool) {
    let mut line = String::new();
    loop {
        line.clear();
        match input.read_line(&mut line) {
            Ok(0) => {
                debug!("stdin closed; the run ends on its limits or the source");
                return;
            }
            Ok(_) if line.trim().eq_ignore_ascii_case("p") => {
                let paused = !pause.fetch_xor(true, Ordering::Relaxed);
                info!("{}", if paused { "pausing windowing" } else { "resuming windowing" });
            }
            Ok(_) => {
                stop.store(true, Ordering::Relaxed);
                return;
            }
            Err(err) => {
                debug!("stdin unreadable ({err}); console controls disabled");
                return;
            }
        }
    }
}

/// Stop and pause flags driven from stdin on a background thread.
fn console_controls() -> (Arc<AtomicBool>, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let pause = Arc::new(AtomicBool::new(false));
    let (stop_flag, pause_flag) = (Arc::clone(&stop), Arc::clone(&pause));
    thread::spawn(move || read_controls(std::io::stdin().lock(), &stop_flag, &pause_flag));
    (stop, pause)
}

fn minutes_deadline(minutes: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(minutes * 60.0)
        .with_context(|| format!("--minutes {minutes} is not a usable duration"))
}

fn run(mut config: AppConfig, args: RunArgs) -> Result<()> {
    let pipeline_cfg = &mut config.pipeline;
    if let Some(capacity) = args.capacity {
        pipeline_cfg.capacity = capacity;
    }
    if let Some(window_size) = args.window_size {
        pipeline_cfg.window_size = window_size;
    }
    if let Some(timeout) = args.sink_timeout_ms {
        pipeline_cfg.sink_timeout_ms = timeout;
    }
    if let Some(dir) = args.data_dir {
        config.output.data_dir = dir;
    }
    if let Some(dir) = args.graph_dir {
        config.output.graph_dir = dir;
    }
    if let Some(port) = args.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }
    config.simulation.realtime |= args.realtime;
    config.validate().context("invalid configuration")?;

    let simulator = || -> Result<SimulatedSource> {
        Ok(
            SimulatedSource::new(config.simulation.seed, config.simulation.sample_rate_hz)?
                .realtime(config.simulation.realtime),
        )
    };
    let mut axis_names = config.output.axis_names.clone();
    let source: Box<dyn SampleSource> = match args.source {
        SourceMode::Simulated => Box::new(simulator()?),
        SourceMode::Replay => {
            let path = args
                .replay
                .context("--source replay needs --replay <FILE>")?;
            let replay = ReplaySource::open(&path)?;
            axis_names = replay.axis_names().to_vec();
            Box::new(replay)
        }
        SourceMode::Live => {
            let port = config
                .serial
                .port
                .clone()
                .context("--source live needs --port or serial.port in the config")?;
            match serial::open_source(&port, &config.serial) {
                Ok(live) if args.fallback_sim => Box::new(FallbackSource::new(live, simulator()?)),
                Ok(live) => Box::new(live),
                Err(err) if args.fallback_sim => {
                    warn!("{err:#}; falling back to simulation");
                    Box::new(simulator()?)
                }
                Err(err) => return Err(err),
            }
        }
    };

    let (stop, pause) = console_controls();
    let mut pipeline = Pipeline::new(source, &config.pipeline)?.with_pause_flag(pause);
    let consumer = pipeline.consumer_mut();
    consumer.register(CsvSink::new(&config.output.data_dir, axis_names.clone()))?;
    if !args.no_charts {
        consumer.register(ChartSink::new(&config.output.graph_dir, axis_names.clone()))?;
    }
    consumer.register(MetricsLogSink::new(axis_names))?;

    info!(
        "mode: {} | capacity={} window_size={} | Enter stops, p+Enter pauses windowing",
        args.source, config.pipeline.capacity, config.pipeline.window_size
    );
    let limits = RunLimits {
        max_samples: args.max_samples,
        max_windows: args.max_windows,
    };
    let outcome = pipeline.run(&stop, limits);
    info!("{}", pipeline.status_line());
    let unfinished = pipeline.shutdown();
    if !unfinished.is_empty() {
        warn!("sinks still writing at exit: {}", unfinished.join(", "));
    }
    let summary = outcome.context("ingestion stopped")?;
    info!(
        "done: {} samples, {} rejected, {} windows ({} with sink failures)",
        summary.samples, summary.rejected, summary.windows, summary.degraded_windows
    );
    Ok(())
}

fn log_feed(mut config: AppConfig, args: LogArgs) -> Result<()> {
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(axes) = args.axes {
        config.serial.axes = axes;
    }
    config.serial.timestamp_prefix |= args.timestamp_prefix;
    let Some(port) = args.port.or_else(|| config.serial.port.clone()) else {
        bail!("no serial port given; use --port or serial.port in the config");
    };
    let names: Vec<String> = if args.names.is_empty() {
        (0..config.serial.axes)
            .map(|i| {
                config
                    .output
                    .axis_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("a{i}"))
            })
            .collect()
    } else {
        args.names
    };
    if names.len() != config.serial.axes {
        bail!(
            "{} column names given for {} axes",
            names.len(),
            config.serial.axes
        );
    }

    let mut source = serial::open_source(&port, &config.serial)?;
    info!("logging from {port} @ {} -> {}", config.serial.baud, args.out.display());
    thread::sleep(Duration::from_millis(args.settle_ms));
    let mut recorder = CsvRecorder::create(&args.out, &names)?;
    let deadline = match args.minutes {
        Some(minutes) => Some(Instant::now() + minutes_deadline(minutes)?),
        None => None,
    };
    let (stop, _) = console_controls();
    let rows = recorder::record_feed(&mut source, &mut recorder, &stop, deadline)?;
    info!(
        "saved {rows} rows to {} ({} lines discarded)",
        args.out.display(),
        source.discarded_lines()
    );
    Ok(())
}

fn browse(args: BrowseArgs) -> Result<()> {
    let mut replay = ReplaySource::open(&args.file)?;
    let samples = replay.read_all()?;
    let names = replay.axis_names().to_vec();
    let mut selected = Vec::with_capacity(args.axes.len());
    for wanted in &args.axes {
        let idx = names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(wanted))
            .with_context(|| format!("no axis column named '{wanted}' (have {names:?})"))?;
        selected.push(idx);
    }
    let shown_names: Vec<String> = if selected.is_empty() {
        names.clone()
    } else {
        selected.iter().map(|&i| names[i].clone()).collect()
    };

    let state = PageState::new(samples.len());
    let (state, _) = dashboard::reduce(&state, PageEvent::SetPageSize(args.page_size));
    let (state, _) = dashboard::reduce(&state, PageEvent::SelectAxes(selected));
    let (state, view) = dashboard::reduce(&state, PageEvent::Goto(args.page));

    println!(
        "Loaded {} | total samples: {} | skipped rows: {}",
        args.file.display(),
        samples.len(),
        replay.skipped_rows()
    );
    println!("{}", view.info);
    let page = dashboard::page_samples(&samples, &state, &view);
    let metrics = windowing::DerivedMetrics::compute(&page);
    print!("{}", dashboard::summary_table(&metrics, &shown_names));

    if let Some(path) = args.chart {
        let png = with_text_fallback(|style| {
            windowing::render_samples_png(&page, &shown_names, args.chart_type, style)
        })?;
        std::fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
        println!("chart written to {}", path.display());
    }
    Ok(())
}

/// Renders with captions and legend, or without any text if fonts are missing.
fn with_text_fallback(
    render: impl Fn(&PlotStyle) -> std::result::Result<Vec<u8>, SinkError>,
) -> Result<Vec<u8>> {
    match render(&PlotStyle::default()) {
        Ok(png) => Ok(png),
        Err(err) => {
            debug!("annotated chart failed ({err}); rendering without text");
            Ok(render(&PlotStyle::bare())?)
        }
    }
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
    if !args.delta.is_finite() || args.delta < 0.0 {
        bail!("--delta must be a finite, non-negative number");
    }
    let mut replay = ReplaySource::open(&args.file)?;
    let samples = replay.read_all()?;
    let names = replay.axis_names().to_vec();
    let axis = match &args.axis {
        Some(wanted) => names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(wanted))
            .with_context(|| format!("no axis column named '{wanted}' (have {names:?})"))?,
        None => names
            .iter()
            .position(|n| n == analysis::DEFAULT_AXIS)
            .unwrap_or(0),
    };
    let axis_name = names.get(axis).cloned().unwrap_or_else(|| format!("a{axis}"));
    let report = analysis::analyze_session(
        &samples,
        axis,
        &axis_name,
        args.baseline_count,
        args.delta,
    )
    .with_context(|| format!("{} has no readings", args.file.display()))?;

    println!("Loaded {} | readings: {}", args.file.display(), report.readings.len());
    println!(
        "Baseline {}: {:.1} | thresholds {:.1} (upper), {:.1} (lower)",
        report.axis,
        report.baseline,
        report.upper(),
        report.lower()
    );
    println!("Slouching readings: {}", report.slouch_count());
    for (sample, posture) in report
        .readings
        .iter()
        .filter(|(_, p)| *p == analysis::Posture::Slouch)
        .take(5)
    {
        println!(
            "  {}  {:>8.2}  {posture}",
            sample.timestamp().format("%Y-%m-%d %H:%M:%S"),
            sample.axes().get(axis).copied().unwrap_or(f64::NAN)
        );
    }
    println!("\n=== SESSION ANALYSIS ===");
    print!("{}", report.summary_text());
    std::fs::write(&args.summary, report.summary_text())
        .with_context(|| format!("failed to write {}", args.summary.display()))?;
    println!("summary saved to {}", args.summary.display());

    if let Some(path) = args.chart {
        let values: Vec<f32> = report
            .readings
            .iter()
            .map(|(s, _)| s.axes().get(axis).copied().unwrap_or(f64::NAN) as f32)
            .collect();
        let flat = |v: f64| vec![v as f32; values.len()];
        let series = vec![
            (report.axis.clone(), values.clone()),
            ("baseline".to_string(), flat(report.baseline)),
            ("upper".to_string(), flat(report.upper())),
            ("lower".to_string(), flat(report.lower())),
        ];
        let title = format!("{} over time", report.axis);
        let png = with_text_fallback(|style| {
            windowing::render_chart_png(&title, &series, ChartType::Line, style)
        })?;
        std::fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
        println!("chart written to {}", path.display());
    }
    Ok(())
}
