// ============================================================================
// LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// Structured logging through `tracing` with json, compact or pretty output,
// an optional daily-rolling log file, and a small timer for slow operations.
// ============================================================================

use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{VigilError, VigilResult};

/// Keeps the file writer flushing for the lifetime of the process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

fn stdout_layer(config: &LoggingConfig) -> BoxedLayer {
    match config.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
        "pretty" => fmt::layer()
            .pretty()
            .with_ansi(config.colors)
            .with_target(true)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
        _ => fmt::layer()
            .compact()
            .with_ansi(config.colors)
            .with_target(true)
            .boxed(),
    }
}

/// Initialize the logging system based on configuration.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig) -> VigilResult<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config)];

    if let Some(path) = &config.file {
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| ".".into());
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vigil.log".into());

        let appender = tracing_appender::rolling::daily(directory, prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);

        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| VigilError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "vigil::init",
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(())
}

// ----------------------------------------------------------------------------
// Performance Timer
// ----------------------------------------------------------------------------

/// Measures an operation and warns when it runs past a threshold.
#[derive(Debug)]
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: Option<u64>,
}

impl PerfTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: None,
        }
    }

    /// Start a timer with a warning threshold
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: Some(threshold_ms),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop the timer and log if above threshold
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();

        if let Some(threshold) = self.threshold_ms {
            if elapsed > threshold {
                warn!(
                    target: "vigil::perf",
                    operation = self.name,
                    elapsed_ms = elapsed,
                    threshold_ms = threshold,
                    "Operation exceeded threshold"
                );
            }
        }

        elapsed
    }
}
