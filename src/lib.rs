//! # Vigil Engine
//!
//! In-process performance observability for a running service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  STAT SOURCE → AGGREGATOR (parallel domains) → HEALTH → SERIES SINK  │
//! │  traced calls → SAMPLING PROFILER → function metrics + profiles      │
//! │  SERIES QUERY ← storage          PROMETHEUS EXPORTER ← snapshots     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Sampling profiler**: one call in `sampling_rate` per function is
//!   bracketed with CPU and heap profiles; every call is counted
//! - **Metrics aggregation**: CPU, memory, allocator, network and disk
//!   statistics collected concurrently into one timestamped snapshot
//! - **Health scoring**: service and system scores behind a swappable
//!   weighting
//! - **Time-series**: one series per field, queried back into aligned rows
//!
//! ## Tracing a function
//!
//! ```no_run
//! let total = vigil_engine::trace("checkout::total", || 2 + 2);
//! assert_eq!(total, 4);
//! let metrics = vigil_engine::function_metrics();
//! assert!(metrics.contains_key("checkout::total"));
//! ```
//!
//! Allocation statistics need the tracking allocator in the host binary:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: vigil_engine::TrackingAllocator = vigil_engine::TrackingAllocator;
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

use std::time::Duration;

pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod health;
pub mod logging;
pub mod profiler;
pub mod stats;
pub mod timeseries;
pub mod types;

pub use collector::{format_uptime, MetricSnapshot, MetricsAggregator};
pub use config::EngineConfig;
pub use engine::{Engine, ServiceInfo, StartTimeCache};
pub use error::{VigilError, VigilResult};
pub use exporter::PrometheusExporter;
pub use health::{Health, HealthStatus, HealthWeighting, LoadWeighting, ServiceHealth};
pub use logging::{init_logging, PerfTimer};
pub use profiler::{
    function_metrics, profiler, set_sampling_rate, trace, FunctionMetrics, FunctionReport, Profiler,
    ReportType,
};
pub use stats::{StatSource, SystemStatSource, TrackingAllocator};
pub use timeseries::{MemoryStorage, QueryRow, ReportTopic, SeriesQuery, SeriesSink, SeriesStorage};
pub use types::{Label, Labels, Timestamp};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Engine version - follows semantic versioning
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "vigil-engine";

/// One in this many calls per function is profiled
pub const DEFAULT_SAMPLING_RATE: u64 = 100;

/// Shortest accepted collection interval
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[cfg(test)]
#[global_allocator]
static TEST_ALLOC: stats::TrackingAllocator = stats::TrackingAllocator;
