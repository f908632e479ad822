mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use common::StubSource;
use vigil_engine::error::StorageError;
use vigil_engine::stats::StatSource;
use vigil_engine::{
    Engine, EngineConfig, HealthStatus, MemoryStorage, MetricsAggregator, SeriesStorage, StartTimeCache, Timestamp,
};

fn test_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.service.name = "checkout".into();
    config.service.hostname = Some("test-host".into());
    config.service.data_dir = dir.to_path_buf();
    config
}

fn engine_with(source: StubSource, dir: &std::path::Path) -> (Engine, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let engine = Engine::with_parts(test_config(dir), Arc::new(source), storage.clone()).unwrap();
    (engine, storage)
}

// ----------------------------------------------------------------------------
// Aggregation
// ----------------------------------------------------------------------------

#[test]
fn test_snapshot_from_stub_source() {
    let aggregator = MetricsAggregator::new(Arc::new(StubSource::default()));
    let snapshot = aggregator.collect();

    assert_eq!(snapshot.core.thread_count, 7);
    assert_eq!(snapshot.load.system_cpu_load, 40.0);
    assert_eq!(snapshot.load.system_memory_load, 25.0);
    assert_eq!(snapshot.load.service_memory_load, 10.0);
    assert_eq!(snapshot.load.system_disk_load, 25.0);
    assert_eq!(snapshot.cpu.total_cores, 4.0);
    assert_eq!(snapshot.cpu.cores_used_by_system, 1.6);
    assert_eq!(snapshot.memory.memory_used_by_service, 800.0);
    assert_eq!(snapshot.memory.gc_pause_duration, 0.0);
    assert_eq!(snapshot.network.bytes_sent, 1_500.0);
    assert_eq!(snapshot.disk.disk_write_bytes, 8_192.0);
    assert_eq!(snapshot.runtime.heap_alloc_by_service, 10_240.0);
    assert_eq!(snapshot.timestamp, snapshot.timestamp.truncate_to_secs());
}

#[test]
fn test_failed_domain_defaults_without_touching_others() {
    let aggregator = MetricsAggregator::new(Arc::new(StubSource::failing(&["network"])));
    let snapshot = aggregator.collect();

    assert_eq!(snapshot.network.bytes_sent, 0.0);
    assert_eq!(snapshot.network.bytes_received, 0.0);
    assert_eq!(snapshot.disk.disk_read_bytes, 4_096.0);
    assert_eq!(snapshot.load.system_cpu_load, 40.0);
    assert_eq!(snapshot.core.thread_count, 7);
}

#[test]
fn test_panicking_domain_defaults_without_touching_others() {
    let aggregator = MetricsAggregator::new(Arc::new(StubSource::panicking(&["disk"])));
    let snapshot = aggregator.collect();

    assert_eq!(snapshot.disk.disk_read_bytes, 0.0);
    assert_eq!(snapshot.disk.disk_write_bytes, 0.0);
    assert_eq!(snapshot.network.bytes_sent, 1_500.0);
    assert_eq!(snapshot.memory.total_system_memory, 8_000.0);
}

#[test]
fn test_total_source_failure_still_yields_snapshot() {
    let all = ["cpu", "cores", "memory", "swap", "process", "network", "disk", "disk_usage", "threads", "runtime"];
    let aggregator = MetricsAggregator::new(Arc::new(StubSource::failing(&all)));
    let snapshot = aggregator.collect();

    assert_eq!(snapshot.core.thread_count, 0);
    assert_eq!(snapshot.health.service.percent, 0.0);
    assert_eq!(snapshot.health.service.status, HealthStatus::Critical);
    assert!(!snapshot.health.system.healthy);
}

#[test]
fn test_stat_source_trait_object_is_shareable() {
    let source: Arc<dyn StatSource> = Arc::new(StubSource::default());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || MetricsAggregator::new(source).collect().core.thread_count)
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 7);
    }
}

// ----------------------------------------------------------------------------
// Write / read round trip
// ----------------------------------------------------------------------------

#[test]
fn test_stored_snapshot_reads_back_as_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage) = engine_with(StubSource::default(), dir.path());

    let snapshot = engine.collect_and_store().unwrap();
    assert!(storage.point_count() > 30);

    let end = snapshot.timestamp.add_duration(Duration::from_secs(1));
    let rows = engine
        .query(
            &["system_cpu_load", "thread_count", "bytes_received", "service_health_percent", "alloc"],
            snapshot.timestamp,
            end,
        )
        .unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.time, snapshot.timestamp.to_datetime());
    assert_eq!(row.values["system_cpu_load"], snapshot.load.system_cpu_load);
    assert_eq!(row.values["thread_count"], 7.0);
    assert_eq!(row.values["bytes_received"], 3_000.0);
    assert_eq!(row.values["service_health_percent"], snapshot.health.service.percent);
    // raw allocator records are stored in KiB under their canonical name
    assert_eq!(row.values["Alloc"], 10.0);
}

#[test]
fn test_query_before_process_start_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());
    let snapshot = engine.collect_and_store().unwrap();
    let end = snapshot.timestamp.add_duration(Duration::from_secs(1));

    let from_epoch = engine.query(&["system_cpu_load"], Timestamp::from_secs(0), end).unwrap();
    let from_start = engine
        .query(&["system_cpu_load"], Timestamp::from(engine.service_info().start_time), end)
        .unwrap();

    assert_eq!(from_epoch, from_start);
    assert_eq!(from_epoch.len(), 1);
}

#[test]
fn test_recorded_start_time_is_whole_seconds() {
    let dir = tempfile::tempdir().unwrap();

    // a start time cached with sub-second precision
    let precise = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 44).unwrap() + chrono::Duration::nanoseconds(685_227_771);
    StartTimeCache::in_dir(dir.path()).start_time_for("checkout", precise);

    let (engine, _) = engine_with(StubSource::default(), dir.path());
    let start = engine.service_info().start_time;
    assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 44).unwrap());

    let (fresh, _) = engine_with(StubSource::default(), tempfile::tempdir().unwrap().path());
    assert_eq!(fresh.service_info().start_time.timestamp_subsec_nanos(), 0);
}

#[test]
fn test_inverted_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());

    let now = Timestamp::now();
    let err = engine
        .query(&["system_cpu_load"], now, now.sub_duration(Duration::from_secs(60)))
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTimeRange { .. }));
}

#[test]
fn test_topic_query() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());
    let snapshot = engine.collect_and_store().unwrap();
    let end = snapshot.timestamp.add_duration(Duration::from_secs(1));

    let rows = engine.query_topic("cpustatistics", snapshot.timestamp, end).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values["total_cores"], 4.0);

    let err = engine.query_topic("Weather", snapshot.timestamp, end).unwrap_err();
    assert!(matches!(err, StorageError::UnknownTopic { .. }));
}

#[test]
fn test_other_hosts_are_filtered_out() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::new());

    let mut other = test_config(dir.path());
    other.service.hostname = Some("other-host".into());
    let other = Engine::with_parts(other, Arc::new(StubSource::default()), storage.clone()).unwrap();
    let mine = Engine::with_parts(test_config(dir.path()), Arc::new(StubSource::default()), storage.clone()).unwrap();

    let snapshot = other.collect_and_store().unwrap();
    let end = snapshot.timestamp.add_duration(Duration::from_secs(1));

    assert!(mine.query(&["thread_count"], snapshot.timestamp, end).unwrap().is_empty());
    assert_eq!(other.query(&["thread_count"], snapshot.timestamp, end).unwrap().len(), 1);
}

#[test]
fn test_retention_purge() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage) = engine_with(StubSource::default(), dir.path());
    engine.collect_and_store().unwrap();
    let stored = storage.point_count();

    assert_eq!(engine.purge_expired().unwrap(), 0);
    assert_eq!(storage.point_count(), stored);

    let future = Timestamp::now().add_duration(Duration::from_secs(60));
    assert_eq!(storage.purge_before(future).unwrap(), stored);
}

// ----------------------------------------------------------------------------
// Engine surface
// ----------------------------------------------------------------------------

#[test]
fn test_start_time_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (first, _) = engine_with(StubSource::default(), dir.path());
    let started = first.service_info().start_time;
    drop(first);

    std::thread::sleep(Duration::from_millis(20));
    let (second, _) = engine_with(StubSource::default(), dir.path());
    assert_eq!(second.service_info().start_time, started);

    let cached = StartTimeCache::in_dir(dir.path()).load();
    assert_eq!(cached.get("checkout"), Some(&started));
}

#[test]
fn test_service_info() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());
    let info = engine.service_info();

    assert_eq!(info.service_name, "checkout");
    assert_eq!(info.hostname, "test-host");
    assert_eq!(info.pid, std::process::id());
    assert_eq!(info.version, vigil_engine::ENGINE_VERSION);
    assert_eq!(info.retention, Duration::from_secs(7 * 24 * 3600));
}

#[test]
fn test_prometheus_text_after_collection() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());
    engine.profiler().trace("export::me", || ());
    engine.collect();

    let text = engine.prometheus_text().unwrap();
    assert!(text.contains("vigil_thread_count"));
    assert!(text.contains("vigil_traced_functions{service=\"checkout\"} 1"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.service.name = String::new();

    let result = Engine::with_parts(config, Arc::new(StubSource::default()), Arc::new(MemoryStorage::new()));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.collection.sync_interval = Duration::from_secs(1);
    let storage = Arc::new(MemoryStorage::new());
    let engine = Arc::new(Engine::with_parts(config, Arc::new(StubSource::default()), storage.clone()).unwrap());

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    // the first tick fires immediately
    for _ in 0..50 {
        if storage.point_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(storage.point_count() > 0);

    engine.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_shutdown_before_run_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage) = engine_with(StubSource::default(), dir.path());

    engine.shutdown();
    assert!(engine.is_shutdown_requested());

    tokio::time::timeout(Duration::from_secs(3), engine.run())
        .await
        .unwrap()
        .unwrap();
    assert!(!engine.is_running());
    assert_eq!(storage.point_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_during_slow_tick() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let source = common::SlowSource::new(Duration::from_millis(800));
    let engine = Arc::new(Engine::with_parts(test_config(dir.path()), Arc::new(source), storage).unwrap());

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(engine.is_running());
    engine.shutdown();

    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!engine.is_running());
}

#[test]
fn test_default_renderer_reads_default_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine_with(StubSource::default(), dir.path());
    assert!(engine.config().profiler.render_tool.is_empty());

    let profiler = engine.profiler();
    profiler.set_sampling_rate(1);
    let total: u64 = profiler.trace("checkout/handler", || (0..1_000u64).sum());
    assert_eq!(total, 499_500);

    let report = engine
        .render_function_report("checkout/handler", vigil_engine::ReportType::Text)
        .unwrap();
    assert!(report.cpu_profile.starts_with("kind             cpu\n"), "{}", report.cpu_profile);
    assert!(report.heap_profile.starts_with("kind             heap\n"), "{}", report.heap_profile);
    assert!(report.code_trace.starts_with("ROUTINE ======================== checkout/handler\n"));

    let graph = engine
        .render_function_report("checkout/handler", vigil_engine::ReportType::Graph)
        .unwrap();
    assert!(graph.cpu_profile.starts_with("digraph \"checkout-handler_cpu\" {"));
}
