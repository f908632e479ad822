// ============================================================================
// ENGINE
// ============================================================================
// Wires the stat source, aggregator, health scorer, sink, query layer,
// exporter and profiler together, and drives periodic collection.
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::collector::{MetricSnapshot, MetricsAggregator};
use crate::config::{EngineConfig, ThresholdsConfig};
use crate::error::{ProfilerResult, StorageResult, VigilResult};
use crate::exporter::PrometheusExporter;
use crate::profiler::{
    ArtifactRenderer, CommandRenderer, FunctionMetrics, FunctionReport, ProfileRenderer, Profiler, ReportType,
};
use crate::stats::{StatSource, SystemStatSource};
use crate::timeseries::{MemoryStorage, QueryRow, ReportTopic, SeriesQuery, SeriesSink, SeriesStorage};
use crate::types::{host_labels, Label, Timestamp, HOST_LABEL};
use crate::ENGINE_VERSION;

/// File under the data directory holding per-service start times
pub const START_TIME_CACHE_FILE: &str = "cache.json";

// ----------------------------------------------------------------------------
// Service Info
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_name: String,
    pub hostname: String,
    pub pid: u32,
    pub version: String,
    pub start_time: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    pub thresholds: ThresholdsConfig,
}

/// Service start times persisted across restarts, keyed by service name.
#[derive(Debug, Clone)]
pub struct StartTimeCache {
    path: PathBuf,
}

impl StartTimeCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(START_TIME_CACHE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached entries; a missing or unreadable file reads as empty.
    pub fn load(&self) -> HashMap<String, DateTime<Utc>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(target: "vigil::engine", path = %self.path.display(), error = %e, "Cannot read start-time cache");
                return HashMap::new();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(target: "vigil::engine", path = %self.path.display(), error = %e, "Corrupt start-time cache ignored");
            HashMap::new()
        })
    }

    fn save(&self, entries: &HashMap<String, DateTime<Utc>>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)
    }

    /// Start time recorded for `service`, recording `now` on first sight.
    pub fn start_time_for(&self, service: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut entries = self.load();
        if let Some(start) = entries.get(service) {
            return *start;
        }

        entries.insert(service.to_string(), now);
        if let Err(e) = self.save(&entries) {
            warn!(target: "vigil::engine", path = %self.path.display(), error = %e, "Cannot write start-time cache");
        }
        now
    }
}

// ----------------------------------------------------------------------------
// Collection Pipeline
// ----------------------------------------------------------------------------

/// Snapshot path shared with the blocking collection task.
struct Pipeline {
    aggregator: MetricsAggregator,
    sink: SeriesSink,
    exporter: PrometheusExporter,
    profiler: Arc<Profiler>,
    thresholds: ThresholdsConfig,
}

impl Pipeline {
    fn collect(&self) -> MetricSnapshot {
        let snapshot = self.aggregator.collect();
        self.exporter.update(&snapshot);
        self.exporter.record_functions(&self.profiler.function_metrics());
        self.check_thresholds(&snapshot);
        snapshot
    }

    fn collect_and_store(&self) -> StorageResult<MetricSnapshot> {
        let snapshot = self.collect();
        self.sink.write_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    fn check_thresholds(&self, snapshot: &MetricSnapshot) {
        let limits = &self.thresholds;
        if snapshot.load.system_cpu_load > limits.max_cpu_usage {
            warn!(
                target: "vigil::engine",
                cpu = snapshot.load.system_cpu_load,
                limit = limits.max_cpu_usage,
                "System CPU above threshold"
            );
        }
        if snapshot.load.system_memory_load > limits.max_memory_usage {
            warn!(
                target: "vigil::engine",
                memory = snapshot.load.system_memory_load,
                limit = limits.max_memory_usage,
                "System memory above threshold"
            );
        }
        if snapshot.core.thread_count > limits.max_threads {
            warn!(
                target: "vigil::engine",
                threads = snapshot.core.thread_count,
                limit = limits.max_threads,
                "Thread count above threshold"
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    pipeline: Arc<Pipeline>,
    storage: Arc<dyn SeriesStorage>,
    query: SeriesQuery,
    hostname: String,
    service_info: ServiceInfo,
    shutdown: Arc<Notify>,
    stop_requested: Arc<AtomicBool>,
    running: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("service", &self.service_info.service_name)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine over the live system and in-memory storage.
    pub fn new(config: EngineConfig) -> VigilResult<Self> {
        let source = SystemStatSource::new()?;
        Self::with_parts(config, Arc::new(source), Arc::new(MemoryStorage::new()))
    }

    /// Engine over caller-supplied stat source and storage.
    pub fn with_parts(
        config: EngineConfig,
        source: Arc<dyn StatSource>,
        storage: Arc<dyn SeriesStorage>,
    ) -> VigilResult<Self> {
        config.validate()?;

        let hostname = config
            .service
            .hostname
            .clone()
            .or_else(SystemStatSource::host_name)
            .unwrap_or_else(|| "unknown".to_string());

        // Snapshots are stamped at second resolution; the recorded start
        // uses the same resolution so it can be used as a query bound.
        let start_time = StartTimeCache::in_dir(&config.service.data_dir)
            .start_time_for(&config.service.name, Utc::now().trunc_subsecs(0))
            .trunc_subsecs(0);
        let start = Timestamp::from(start_time);

        let renderer: Arc<dyn ProfileRenderer> = match CommandRenderer::from_command_line(&config.profiler.render_tool) {
            Some(command) => Arc::new(command),
            None => Arc::new(ArtifactRenderer),
        };
        let profiler = Arc::new(
            Profiler::new(config.profile_dir())
                .with_sampling_rate(config.effective_sampling_rate())
                .with_renderer(renderer),
        );

        let exporter = PrometheusExporter::new(&config.service.name)?;
        exporter.set_thresholds(&config.thresholds);

        let aggregator = MetricsAggregator::new(source)
            .with_start_time(start)
            .with_slow_threshold_ms(config.collection.slow_collection_ms);

        let pipeline = Pipeline {
            aggregator,
            sink: SeriesSink::new(storage.clone(), host_labels(&hostname)),
            exporter,
            profiler,
            thresholds: config.thresholds.clone(),
        };

        let service_info = ServiceInfo {
            service_name: config.service.name.clone(),
            hostname: hostname.clone(),
            pid: std::process::id(),
            version: ENGINE_VERSION.to_string(),
            start_time,
            retention: config.collection.retention,
            thresholds: config.thresholds.clone(),
        };

        info!(
            target: "vigil::engine",
            service = %service_info.service_name,
            host = %hostname,
            start_time = %start_time,
            "Engine initialized"
        );

        Ok(Self {
            query: SeriesQuery::new(storage.clone(), start),
            config,
            pipeline: Arc::new(pipeline),
            storage,
            hostname,
            service_info,
            shutdown: Arc::new(Notify::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn service_info(&self) -> &ServiceInfo {
        &self.service_info
    }

    pub fn profiler(&self) -> Arc<Profiler> {
        self.pipeline.profiler.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(AtomicOrdering::Relaxed)
    }

    fn host_filter(&self) -> [Label; 1] {
        [Label::new(HOST_LABEL, self.hostname.as_str())]
    }

    // ------------------------------------------------------------------------
    // Snapshots & Queries
    // ------------------------------------------------------------------------

    /// Collect one snapshot without storing it.
    pub fn collect(&self) -> MetricSnapshot {
        self.pipeline.collect()
    }

    /// Collect one snapshot and append it to storage.
    pub fn collect_and_store(&self) -> StorageResult<MetricSnapshot> {
        self.pipeline.collect_and_store()
    }

    /// Rows for `fields` of this host in `[start, end)`.
    pub fn query<S: AsRef<str>>(&self, fields: &[S], start: Timestamp, end: Timestamp) -> StorageResult<Vec<QueryRow>> {
        self.query.query(fields, &self.host_filter(), start, end)
    }

    /// Rows for a named report topic such as `"CPUStatistics"`.
    pub fn query_topic(&self, topic: &str, start: Timestamp, end: Timestamp) -> StorageResult<Vec<QueryRow>> {
        let topic: ReportTopic = topic.parse()?;
        self.query.query_topic(topic, &self.host_filter(), start, end)
    }

    pub fn function_metrics(&self) -> HashMap<String, FunctionMetrics> {
        self.pipeline.profiler.function_metrics()
    }

    pub fn render_function_report(&self, identity: &str, report_type: ReportType) -> ProfilerResult<FunctionReport> {
        self.pipeline.profiler.render_function_report(identity, report_type)
    }

    /// Prometheus text exposition of the latest collected values.
    pub fn prometheus_text(&self) -> VigilResult<String> {
        self.pipeline.exporter.gather_text()
    }

    /// Drop stored points older than the retention window.
    pub fn purge_expired(&self) -> StorageResult<usize> {
        let cutoff = Timestamp::now().sub_duration(self.config.collection.retention);
        self.storage.purge_before(cutoff)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stop the collection loop. The request is kept: a `run` that starts
    /// afterwards returns immediately.
    pub fn shutdown(&self) {
        info!(target: "vigil::engine", "Shutdown requested");
        request_stop(&self.stop_requested, &self.shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.stop_requested.load(AtomicOrdering::Acquire)
    }

    /// Collect and store every `sync_interval` until shutdown or
    /// SIGINT/SIGTERM.
    pub async fn run(&self) -> VigilResult<()> {
        if self.is_shutdown_requested() {
            info!(target: "vigil::engine", "Shutdown already requested, collection loop not started");
            return Ok(());
        }

        info!(
            target: "vigil::engine",
            version = ENGINE_VERSION,
            service = %self.service_info.service_name,
            interval = %humantime::format_duration(self.config.collection.sync_interval),
            "Starting collection loop"
        );
        self.running.store(true, AtomicOrdering::Release);

        let _signals = AbortOnDrop({
            let stop_requested = self.stop_requested.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                request_stop(&stop_requested, &shutdown);
            })
        });

        let mut ticker = interval(self.config.collection.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_shutdown_requested() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!(target: "vigil::engine", "Shutdown notification received");
                    break;
                }
            }
        }

        self.running.store(false, AtomicOrdering::Release);
        info!(target: "vigil::engine", "Collection loop stopped");
        Ok(())
    }

    async fn tick(&self) {
        let started = Instant::now();
        let pipeline = self.pipeline.clone();

        match tokio::task::spawn_blocking(move || pipeline.collect_and_store()).await {
            Ok(Ok(snapshot)) => debug!(
                target: "vigil::engine",
                timestamp = %snapshot.timestamp,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Snapshot persisted"
            ),
            Ok(Err(e)) => error!(target: "vigil::engine", error = %e, "Snapshot not persisted"),
            Err(e) => error!(target: "vigil::engine", error = %e, "Collection task failed"),
        }

        match self.purge_expired() {
            Ok(0) => {}
            Ok(purged) => debug!(target: "vigil::engine", purged, "Expired points purged"),
            Err(e) => warn!(target: "vigil::engine", error = %e, "Retention purge failed"),
        }
    }
}

/// Set the stop flag and leave a wakeup permit, so a request made while the
/// loop is busy in a tick is seen on the next iteration.
fn request_stop(stop_requested: &AtomicBool, shutdown: &Notify) {
    stop_requested.store(true, AtomicOrdering::Release);
    shutdown.notify_one();
}

/// Aborts the signal listener when `run` returns or is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    let (mut sigterm, mut sigint) = match (
        signal::unix::signal(signal::unix::SignalKind::terminate()),
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(target: "vigil::engine", error = %e, "Cannot install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!(target: "vigil::engine", "Received SIGTERM"),
        _ = sigint.recv() => info!(target: "vigil::engine", "Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(target: "vigil::engine", error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_start_time_cache_keeps_first_start() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StartTimeCache::in_dir(dir.path());

        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(cache.start_time_for("checkout", first), first);
        assert_eq!(cache.start_time_for("checkout", later), first);
        assert_eq!(cache.start_time_for("billing", later), later);
        assert_eq!(cache.load().len(), 2);
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StartTimeCache::in_dir(dir.path());
        fs::write(cache.path(), "not json").unwrap();

        assert!(cache.load().is_empty());
        let now = Utc::now();
        assert_eq!(cache.start_time_for("svc", now), now);
    }
}
