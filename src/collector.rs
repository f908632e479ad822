// ============================================================================
// METRICS AGGREGATOR
// ============================================================================
// Builds one `MetricSnapshot` per `collect()` call. The six stat domains are
// gathered in parallel on the rayon pool and joined at the end of a scope;
// health is scored only after every domain has landed. A failing or
// panicking domain contributes its default value and a warning.
// ============================================================================

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::health::{self, HealthWeighting, LoadWeighting, ServiceHealth};
use crate::logging::PerfTimer;
use crate::stats::StatSource;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Snapshot Model
// ----------------------------------------------------------------------------

/// Process-level figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreStats {
    pub thread_count: u64,
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    /// Presentation form of `uptime`, never stored
    pub uptime_display: String,
}

/// Load percentages, all in [0, 100].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadStats {
    pub overall_load_of_service: f64,
    pub service_cpu_load: f64,
    pub service_memory_load: f64,
    pub system_cpu_load: f64,
    pub system_memory_load: f64,
    pub system_disk_load: f64,
    /// Bytes across mounted disks
    pub total_disk_size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    pub total_cores: f64,
    pub total_physical_cores: f64,
    pub cores_used_by_service: f64,
    pub cores_used_by_system: f64,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_system_memory: f64,
    pub memory_used_by_system: f64,
    pub memory_used_by_service: f64,
    pub available_memory: f64,
    pub total_swap_memory: f64,
    pub swap_used: f64,
    /// Always zero: the process has no tracing garbage collector.
    pub gc_pause_duration: f64,
    pub stack_memory_usage: f64,
}

/// One named allocation statistic as stored in its own series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMemRecord {
    pub name: CompactString,
    pub value: f64,
}

/// Allocation statistics of this process. Byte figures are in bytes except
/// the raw records, which carry KiB for byte-valued entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMemory {
    pub heap_alloc_by_service: f64,
    pub heap_alloc_by_system: f64,
    pub total_alloc_by_service: f64,
    pub total_memory_by_os: f64,
    pub records: Vec<RawMemRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkIo {
    pub bytes_sent: f64,
    pub bytes_received: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIo {
    pub disk_read_bytes: f64,
    pub disk_write_bytes: f64,
}

/// One consistent bundle of every collected field, sharing a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Second resolution
    pub timestamp: Timestamp,
    pub core: CoreStats,
    pub load: LoadStats,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub runtime: RuntimeMemory,
    pub network: NetworkIo,
    pub disk: DiskIo,
    pub health: ServiceHealth,
}

impl MetricSnapshot {
    /// Every leaf field as a (series name, value) pair.
    pub fn fields(&self) -> Vec<(CompactString, f64)> {
        let fixed = [
            ("thread_count", self.core.thread_count as f64),
            ("uptime_seconds", self.core.uptime.as_secs_f64()),
            ("overall_load_of_service", self.load.overall_load_of_service),
            ("service_cpu_load", self.load.service_cpu_load),
            ("service_memory_load", self.load.service_memory_load),
            ("system_cpu_load", self.load.system_cpu_load),
            ("system_memory_load", self.load.system_memory_load),
            ("system_disk_load", self.load.system_disk_load),
            ("total_disk_size", self.load.total_disk_size),
            ("total_cores", self.cpu.total_cores),
            ("total_physical_cores", self.cpu.total_physical_cores),
            ("cores_used_by_service", self.cpu.cores_used_by_service),
            ("cores_used_by_system", self.cpu.cores_used_by_system),
            ("total_system_memory", self.memory.total_system_memory),
            ("memory_used_by_system", self.memory.memory_used_by_system),
            ("memory_used_by_service", self.memory.memory_used_by_service),
            ("available_memory", self.memory.available_memory),
            ("total_swap_memory", self.memory.total_swap_memory),
            ("swap_used", self.memory.swap_used),
            ("gc_pause_duration", self.memory.gc_pause_duration),
            ("stack_memory_usage", self.memory.stack_memory_usage),
            ("heap_alloc_by_service", self.runtime.heap_alloc_by_service),
            ("heap_alloc_by_system", self.runtime.heap_alloc_by_system),
            ("total_alloc_by_service", self.runtime.total_alloc_by_service),
            ("total_memory_by_os", self.runtime.total_memory_by_os),
            ("bytes_sent", self.network.bytes_sent),
            ("bytes_received", self.network.bytes_received),
            ("disk_read_bytes", self.disk.disk_read_bytes),
            ("disk_write_bytes", self.disk.disk_write_bytes),
            ("service_health_percent", self.health.service.percent),
            ("system_health_percent", self.health.system.percent),
            ("service_healthy", if self.health.service.healthy { 1.0 } else { 0.0 }),
            ("system_healthy", if self.health.system.healthy { 1.0 } else { 0.0 }),
        ];

        let mut fields: Vec<(CompactString, f64)> = fixed
            .into_iter()
            .map(|(name, value)| (CompactString::from(name), value))
            .collect();
        fields.extend(self.runtime.records.iter().map(|r| (r.name.clone(), r.value)));
        fields
    }
}

// ----------------------------------------------------------------------------
// Presentation Helpers
// ----------------------------------------------------------------------------

/// Human uptime: the largest unit the duration exceeds, two decimals.
/// Months are 30 days and years 12 months.
pub fn format_uptime(uptime: Duration) -> String {
    const MINUTE: f64 = 60.0;
    const HOUR: f64 = 60.0 * MINUTE;
    const DAY: f64 = 24.0 * HOUR;
    const MONTH: f64 = 30.0 * DAY;
    const YEAR: f64 = 12.0 * MONTH;

    let secs = uptime.as_secs_f64();
    match secs {
        s if s > YEAR => format!("{:.2} y", s / YEAR),
        s if s > MONTH => format!("{:.2} mo", s / MONTH),
        s if s > DAY => format!("{:.2} d", s / DAY),
        s if s > HOUR => format!("{:.2} h", s / HOUR),
        s if s > MINUTE => format!("{:.2} m", s / MINUTE),
        s => format!("{:.2} s", s),
    }
}

/// Round to three decimal places.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
    }
}

fn kib(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

// ----------------------------------------------------------------------------
// Aggregator
// ----------------------------------------------------------------------------

/// Produces snapshots from a [`StatSource`].
pub struct MetricsAggregator {
    source: Arc<dyn StatSource>,
    weighting: Arc<dyn HealthWeighting>,
    start_time: Timestamp,
    slow_threshold_ms: u64,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl MetricsAggregator {
    pub fn new(source: Arc<dyn StatSource>) -> Self {
        Self {
            source,
            weighting: Arc::new(LoadWeighting::default()),
            start_time: Timestamp::now(),
            slow_threshold_ms: 500,
        }
    }

    /// Swap the health weighting
    pub fn with_weighting(mut self, weighting: Arc<dyn HealthWeighting>) -> Self {
        self.weighting = weighting;
        self
    }

    /// Start of the service, used for uptime
    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_slow_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.slow_threshold_ms = threshold_ms;
        self
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Collect one snapshot.
    pub fn collect(&self) -> MetricSnapshot {
        let timer = PerfTimer::with_threshold("collect_snapshot", self.slow_threshold_ms);
        let now = Timestamp::now();

        let core = self.collect_core(now);

        let mut load = LoadStats::default();
        let mut memory = MemoryStats::default();
        let mut cpu = CpuStats::default();
        let mut runtime = RuntimeMemory::default();
        let mut network = NetworkIo::default();
        let mut disk = DiskIo::default();

        rayon::scope(|s| {
            s.spawn(|_| load = guarded("load", || self.collect_load()));
            s.spawn(|_| memory = guarded("memory", || self.collect_memory()));
            s.spawn(|_| cpu = guarded("cpu", || self.collect_cpu()));
            s.spawn(|_| runtime = guarded("runtime", || self.collect_runtime()));
            s.spawn(|_| network = guarded("network", || self.collect_network()));
            s.spawn(|_| disk = guarded("disk", || self.collect_disk()));
        });

        let health = health::score(self.weighting.as_ref(), &load);

        let snapshot = MetricSnapshot {
            timestamp: now.truncate_to_secs(),
            core,
            load,
            cpu,
            memory,
            runtime,
            network,
            disk,
            health,
        };

        let elapsed_ms = timer.stop();
        debug!(
            target: "vigil::collector",
            elapsed_ms,
            service_health = snapshot.health.service.percent,
            "Snapshot collected"
        );

        snapshot
    }

    // ---- Per-domain collection ----

    fn collect_core(&self, now: Timestamp) -> CoreStats {
        let uptime = now.duration_since(self.start_time);
        CoreStats {
            thread_count: guarded("core", || self.source.thread_count()),
            uptime,
            uptime_display: format_uptime(uptime),
        }
    }

    fn collect_load(&self) -> CollectorResult<LoadStats> {
        let cpu = self.source.cpu_usage()?;
        let vm = self.source.virtual_memory()?;
        let process = self.source.process_memory()?;
        let disk = self.source.disk_usage()?;

        let service_cpu_load = cpu.process_percent.clamp(0.0, 100.0);
        let service_memory_load = percent_of(process.resident, vm.total);

        Ok(LoadStats {
            overall_load_of_service: (0.5 * service_cpu_load + 0.5 * service_memory_load).clamp(0.0, 100.0),
            service_cpu_load,
            service_memory_load,
            system_cpu_load: cpu.system_percent.clamp(0.0, 100.0),
            system_memory_load: percent_of(vm.used, vm.total),
            system_disk_load: percent_of(disk.used, disk.total),
            total_disk_size: disk.total as f64,
        })
    }

    fn collect_memory(&self) -> CollectorResult<MemoryStats> {
        let vm = self.source.virtual_memory()?;
        let swap = self.source.swap_memory()?;
        let process = self.source.process_memory()?;

        Ok(MemoryStats {
            total_system_memory: vm.total as f64,
            memory_used_by_system: vm.used as f64,
            memory_used_by_service: process.resident as f64,
            available_memory: vm.available as f64,
            total_swap_memory: swap.total as f64,
            swap_used: swap.used as f64,
            gc_pause_duration: 0.0,
            stack_memory_usage: process.stack as f64,
        })
    }

    fn collect_cpu(&self) -> CollectorResult<CpuStats> {
        let cores = self.source.core_counts()?;
        let usage = self.source.cpu_usage()?;
        let logical = cores.logical as f64;

        Ok(CpuStats {
            total_cores: logical,
            total_physical_cores: cores.physical as f64,
            cores_used_by_service: round3(usage.process_percent / 100.0 * logical),
            cores_used_by_system: round3(usage.system_percent / 100.0 * logical),
        })
    }

    fn collect_runtime(&self) -> CollectorResult<RuntimeMemory> {
        let stats = self.source.runtime_memory()?;
        let process = self.source.process_memory().unwrap_or_default();

        let records = [
            ("alloc", kib(stats.live_bytes)),
            ("total_alloc", kib(stats.total_allocated)),
            ("peak_alloc", kib(stats.peak_bytes)),
            ("mallocs", stats.allocations as f64),
            ("frees", stats.deallocations as f64),
            ("heap_objects", stats.live_objects() as f64),
            ("rss", kib(process.resident)),
            ("vms", kib(process.virtual_size)),
            ("stack_inuse", kib(process.stack)),
        ]
        .into_iter()
        .map(|(name, value)| RawMemRecord {
            name: CompactString::from(name),
            value,
        })
        .collect();

        Ok(RuntimeMemory {
            heap_alloc_by_service: stats.live_bytes as f64,
            heap_alloc_by_system: stats.peak_bytes as f64,
            total_alloc_by_service: stats.total_allocated as f64,
            total_memory_by_os: process.resident as f64,
            records,
        })
    }

    fn collect_network(&self) -> CollectorResult<NetworkIo> {
        let counters = self.source.network_counters()?;
        Ok(counters.iter().fold(NetworkIo::default(), |mut acc, c| {
            acc.bytes_sent += c.bytes_sent as f64;
            acc.bytes_received += c.bytes_received as f64;
            acc
        }))
    }

    fn collect_disk(&self) -> CollectorResult<DiskIo> {
        let counters = self.source.disk_io_counters()?;
        Ok(counters.iter().fold(DiskIo::default(), |mut acc, c| {
            acc.disk_read_bytes += c.read_bytes as f64;
            acc.disk_write_bytes += c.write_bytes as f64;
            acc
        }))
    }
}

/// Run one sub-collector, trading any failure for the default value.
fn guarded<T: Default>(domain: &'static str, collect: impl FnOnce() -> CollectorResult<T>) -> T {
    let outcome = panic::catch_unwind(AssertUnwindSafe(collect)).unwrap_or_else(|_| {
        Err(CollectorError::Panicked {
            domain: domain.to_string(),
        })
    });

    match outcome {
        Ok(value) => value,
        Err(e) => {
            warn!(
                target: "vigil::collector",
                domain,
                error = %e,
                "Sub-collector failed, using defaults"
            );
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{
        CoreCounts, CpuUsage, DiskIoCounters, DiskUsage, NetworkCounters, ProcessMemory, RuntimeMemStats,
        SwapMemory, VirtualMemory,
    };
    use rstest::rstest;

    struct FixedSource;

    impl StatSource for FixedSource {
        fn cpu_usage(&self) -> CollectorResult<CpuUsage> {
            Ok(CpuUsage { system_percent: 50.0, process_percent: 25.0 })
        }
        fn core_counts(&self) -> CollectorResult<CoreCounts> {
            Ok(CoreCounts { logical: 8, physical: 4 })
        }
        fn virtual_memory(&self) -> CollectorResult<VirtualMemory> {
            Ok(VirtualMemory { total: 1000, used: 600, available: 400, free: 300 })
        }
        fn swap_memory(&self) -> CollectorResult<SwapMemory> {
            Ok(SwapMemory { total: 10, used: 1 })
        }
        fn process_memory(&self) -> CollectorResult<ProcessMemory> {
            Ok(ProcessMemory { resident: 100, virtual_size: 2048, stack: 1024 })
        }
        fn network_counters(&self) -> CollectorResult<Vec<NetworkCounters>> {
            Ok(vec![
                NetworkCounters { interface: "eth0".into(), bytes_sent: 10, bytes_received: 20 },
                NetworkCounters { interface: "lo".into(), bytes_sent: 1, bytes_received: 2 },
            ])
        }
        fn disk_io_counters(&self) -> CollectorResult<Vec<DiskIoCounters>> {
            Ok(vec![DiskIoCounters { device: "sda".into(), read_bytes: 512, write_bytes: 1024 }])
        }
        fn disk_usage(&self) -> CollectorResult<DiskUsage> {
            Ok(DiskUsage { total: 200, used: 50 })
        }
        fn thread_count(&self) -> CollectorResult<u64> {
            Ok(12)
        }
        fn runtime_memory(&self) -> CollectorResult<RuntimeMemStats> {
            Ok(RuntimeMemStats {
                live_bytes: 2048,
                peak_bytes: 4096,
                total_allocated: 8192,
                allocations: 10,
                deallocations: 4,
                active: true,
            })
        }
    }

    #[rstest]
    #[case(Duration::from_secs(30), "30.00 s")]
    #[case(Duration::from_secs(90), "1.50 m")]
    #[case(Duration::from_secs(2 * 3600), "2.00 h")]
    #[case(Duration::from_secs(36 * 3600), "1.50 d")]
    #[case(Duration::from_secs(45 * 86_400), "1.50 mo")]
    #[case(Duration::from_secs(720 * 86_400), "2.00 y")]
    fn test_format_uptime(#[case] uptime: Duration, #[case] expected: &str) {
        assert_eq!(format_uptime(uptime), expected);
    }

    #[test]
    fn test_exactly_one_minute_stays_in_seconds() {
        assert_eq!(format_uptime(Duration::from_secs(60)), "60.00 s");
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(2.0), 2.0);
    }

    #[test]
    fn test_collect_derives_values() {
        let aggregator = MetricsAggregator::new(Arc::new(FixedSource));
        let snapshot = aggregator.collect();

        assert_eq!(snapshot.core.thread_count, 12);
        assert_eq!(snapshot.cpu.total_cores, 8.0);
        assert_eq!(snapshot.cpu.cores_used_by_service, 2.0);
        assert_eq!(snapshot.cpu.cores_used_by_system, 4.0);
        assert_eq!(snapshot.load.service_memory_load, 10.0);
        assert_eq!(snapshot.load.overall_load_of_service, 17.5);
        assert_eq!(snapshot.load.system_disk_load, 25.0);
        assert_eq!(snapshot.network.bytes_sent, 11.0);
        assert_eq!(snapshot.disk.disk_write_bytes, 1024.0);
        assert_eq!(snapshot.health.service.percent, 17.5);
        assert_eq!(snapshot.health.system.percent, 55.0);
        assert!(snapshot.health.system.healthy);
        assert_eq!(snapshot.timestamp, snapshot.timestamp.truncate_to_secs());
    }

    #[test]
    fn test_raw_records_in_kib() {
        let snapshot = MetricsAggregator::new(Arc::new(FixedSource)).collect();
        let record = |name: &str| {
            snapshot
                .runtime
                .records
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.value)
        };

        assert_eq!(record("alloc"), Some(2.0));
        assert_eq!(record("total_alloc"), Some(8.0));
        assert_eq!(record("mallocs"), Some(10.0));
        assert_eq!(record("heap_objects"), Some(6.0));
    }

    #[test]
    fn test_fields_cover_every_domain_once() {
        let snapshot = MetricsAggregator::new(Arc::new(FixedSource)).collect();
        let fields = snapshot.fields();

        let mut names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total, "field names must be unique");
        assert!(total > 30);
        assert!(names.contains(&"service_health_percent"));
        assert!(names.contains(&"heap_objects"));
    }
}
