//! Process-wide logging for the vision binaries.
//!
//! Lines go to stderr as `[elapsed LEVEL] target: message`, leaving stdout
//! to the metrics the CLI prints. The chosen level applies to the
//! `fiducial*` crates; everything else (image decoders and the like) is
//! held to `warn`.

use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::time::Uptime, EnvFilter};

const WORKSPACE_TARGET: &str = "fiducial";

struct VisionLogger {
    level: LevelFilter,
    started: Instant,
}

impl VisionLogger {
    fn ceiling(&self, target: &str) -> LevelFilter {
        if target.starts_with(WORKSPACE_TARGET) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

fn render(out: &mut impl Write, elapsed_s: f64, record: &Record) -> io::Result<()> {
    writeln!(
        out,
        "[{:8.3}s {:>5}] {}: {}",
        elapsed_s,
        record.level(),
        record.target(),
        record.args()
    )
}

impl Log for VisionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.ceiling(metadata.target())
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let elapsed = self.started.elapsed().as_secs_f64();
            let _ = render(&mut io::stderr().lock(), elapsed, record);
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

static LOGGER: OnceLock<VisionLogger> = OnceLock::new();

/// Install the stderr logger. Only the first call takes effect.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| VisionLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// `tracing` alternative to [`init_with_level`], for span timings of the
/// per-frame pipeline. `RUST_LOG` overrides `default_directive`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    let installed = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.with_timer(Uptime::default()).finish().try_init()
    };
    if let Err(e) = installed {
        log::debug!("tracing subscriber not installed: {e}");
    }
}
