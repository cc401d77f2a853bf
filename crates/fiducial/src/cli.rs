//! The `fiducial-vision` service: command-line parsing and the run loop.

use std::{
    convert::Infallible,
    fs::File,
    io::{BufRead, BufWriter},
    path::PathBuf,
    process::ExitCode,
    thread,
    time::Duration,
};

use clap::Parser;
use fiducial_core::FileCalibrationProvider;
use fiducial_perception::{
    JsonLinesSink, LogSink, LoopResources, PerceptionConfig, PerceptionLoop, TagDetector,
    TelemetryFanout,
};
use log::{error, info};
#[cfg(not(feature = "tracing"))]
use log::LevelFilter;

use crate::{ImageSequenceSource, NullObjectDetector, NullTagDetector, ReplayTagDetector};

type CliError = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
#[command(name = "fiducial-vision", version)]
#[command(about = "Fixed-rate marker pose estimation and object localization service")]
pub struct Cli {
    /// Camera device index [default: 0]. Also selects the default frame
    /// directory `camera<index>`.
    #[arg(long, value_name = "INDEX", value_parser = lenient_u32, allow_hyphen_values = true)]
    pub camera: Option<u32>,

    /// Target frame rate [default: 30].
    #[arg(long, value_parser = lenient_u32, allow_hyphen_values = true)]
    pub fps: Option<u32>,

    /// Printed marker edge length in meters [default: 0.015].
    #[arg(long = "tag-size", value_name = "METERS", value_parser = lenient_f64, allow_hyphen_values = true)]
    pub tag_size: Option<f64>,

    /// Service configuration (JSON). Flags override its values.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Camera calibration document [default: calibration.json].
    #[arg(long, value_name = "JSON")]
    pub calibration: Option<PathBuf>,

    /// Directory of PNG/JPEG frames.
    #[arg(long, value_name = "DIR")]
    pub frames: Option<PathBuf>,

    /// Restart the frame directory from the top when it runs out.
    #[arg(long)]
    pub repeat: bool,

    /// Recorded marker observations to replay, keyed by frame index (JSON).
    #[arg(long, value_name = "JSON")]
    pub detections: Option<PathBuf>,

    /// Append every telemetry event to this file as JSON lines.
    #[arg(long, value_name = "PATH")]
    pub events: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Enter on stdin.
    #[arg(long, value_name = "SECS", value_parser = lenient_f64, allow_hyphen_values = true)]
    pub duration: Option<f64>,

    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Longest numeric prefix of `s` after leading whitespace, `atoi` style:
/// `"12abc"` is 12 and text without a leading number is 0.
fn numeric_prefix(s: &str, allow_fraction: bool) -> &str {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > digits_start;

    if allow_fraction {
        if end < bytes.len() && bytes[end] == b'.' {
            let mut frac = end + 1;
            while frac < bytes.len() && bytes[frac].is_ascii_digit() {
                frac += 1;
            }
            if has_digits || frac > end + 1 {
                has_digits = true;
                end = frac;
            }
        }
        if has_digits && end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
            let mut exp = end + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            let exp_digits = exp;
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            if exp > exp_digits {
                end = exp;
            }
        }
    }

    if has_digits {
        &s[..end]
    } else {
        ""
    }
}

/// Permissive integer: invalid text parses as 0, negatives clamp to 0.
pub fn lenient_u32(s: &str) -> Result<u32, Infallible> {
    let prefix = numeric_prefix(s, false);
    let value = match prefix.parse::<i64>() {
        Ok(v) => v.clamp(0, i64::from(u32::MAX)) as u32,
        // overflowing digit strings saturate like the sign says
        Err(_) if prefix.starts_with('-') => 0,
        Err(_) if !prefix.is_empty() => u32::MAX,
        Err(_) => 0,
    };
    Ok(value)
}

/// Permissive float: invalid text parses as 0.0.
pub fn lenient_f64(s: &str) -> Result<f64, Infallible> {
    Ok(numeric_prefix(s, true).parse::<f64>().unwrap_or(0.0))
}

impl Cli {
    /// Merge the config file (if any) with the command-line overrides.
    pub fn resolve_config(&self) -> Result<PerceptionConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => PerceptionConfig::load_json(path)?,
            None => PerceptionConfig::default(),
        };
        if let Some(camera) = self.camera {
            config.camera_index = camera;
        }
        if let Some(fps) = self.fps {
            config.target_fps = fps;
        }
        if let Some(size) = self.tag_size {
            config.tag_size_m = size;
        }
        if let Some(path) = &self.calibration {
            config.calibration_path = path.clone();
        }
        Ok(config)
    }

    fn frames_dir(&self, config: &PerceptionConfig) -> PathBuf {
        self.frames
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("camera{}", config.camera_index)))
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = fiducial_core::init_with_level(level);
}

#[cfg(feature = "tracing")]
fn init_logging(verbose: bool) {
    fiducial_core::init_tracing(false, if verbose { "debug" } else { "info" });
}

fn build_loop(cli: &Cli, config: PerceptionConfig) -> Result<PerceptionLoop, CliError> {
    let source = ImageSequenceSource::new(cli.frames_dir(&config)).with_repeat(cli.repeat);

    let tags: Box<dyn TagDetector> = match &cli.detections {
        Some(path) => Box::new(ReplayTagDetector::load_json(path)?),
        None => Box::new(NullTagDetector),
    };

    let mut sink = TelemetryFanout::new().with(LogSink);
    if let Some(path) = &cli.events {
        sink = sink.with(JsonLinesSink::new(BufWriter::new(File::create(path)?)));
    }

    let calibration = FileCalibrationProvider::new(config.calibration_path.clone());
    let resources = LoopResources {
        frame_source: Box::new(source),
        tag_detector: tags,
        object_detector: Box::new(NullObjectDetector),
        sink: Box::new(sink),
    };
    Ok(PerceptionLoop::new(config, resources, calibration))
}

/// Block until Enter/EOF on stdin, or for `duration` seconds when given.
fn wait_for_shutdown(duration: Option<f64>) {
    match duration {
        Some(secs) => {
            thread::sleep(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX));
        }
        None => {
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose);
    info!("fiducial-vision {}", env!("CARGO_PKG_VERSION"));

    let config = match cli.resolve_config() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    let mut service = match build_loop(&cli, config) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to set up vision service: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = service.start() {
        error!("failed to start vision service: {e}");
        return ExitCode::from(1);
    }
    match cli.duration {
        Some(secs) => info!("vision service running for {secs} s"),
        None => info!("vision service running; press Enter to stop"),
    }

    wait_for_shutdown(cli.duration);
    service.stop();

    let metrics = service.metrics();
    match serde_json::to_string_pretty(&metrics) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("failed to serialize metrics: {e}"),
    }
    info!("vision service shutdown complete");
    ExitCode::SUCCESS
}
