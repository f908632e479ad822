#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use vigil_engine::error::{CollectorError, CollectorResult, ProfilerResult};
use vigil_engine::profiler::{ProfilerBackend, RuntimeProbe};
use vigil_engine::stats::{
    CoreCounts, CpuUsage, DiskIoCounters, DiskUsage, NetworkCounters, ProcessMemory, RuntimeMemStats, StatSource,
    SwapMemory, VirtualMemory,
};

// ----------------------------------------------------------------------------
// Stat source
// ----------------------------------------------------------------------------

/// Fixed readings; domains listed in `failing` return an error and those in
/// `panicking` panic.
#[derive(Default)]
pub struct StubSource {
    pub failing: HashSet<&'static str>,
    pub panicking: HashSet<&'static str>,
}

impl StubSource {
    pub fn failing(domains: &[&'static str]) -> Self {
        Self {
            failing: domains.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn panicking(domains: &[&'static str]) -> Self {
        Self {
            panicking: domains.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn check(&self, domain: &'static str) -> CollectorResult<()> {
        if self.panicking.contains(domain) {
            panic!("{domain} source exploded");
        }
        if self.failing.contains(domain) {
            return Err(CollectorError::unavailable(domain, "stubbed failure"));
        }
        Ok(())
    }
}

impl StatSource for StubSource {
    fn cpu_usage(&self) -> CollectorResult<CpuUsage> {
        self.check("cpu")?;
        Ok(CpuUsage {
            system_percent: 40.0,
            process_percent: 10.0,
        })
    }

    fn core_counts(&self) -> CollectorResult<CoreCounts> {
        self.check("cores")?;
        Ok(CoreCounts { logical: 4, physical: 2 })
    }

    fn virtual_memory(&self) -> CollectorResult<VirtualMemory> {
        self.check("memory")?;
        Ok(VirtualMemory {
            total: 8_000,
            used: 2_000,
            available: 6_000,
            free: 5_000,
        })
    }

    fn swap_memory(&self) -> CollectorResult<SwapMemory> {
        self.check("swap")?;
        Ok(SwapMemory { total: 1_000, used: 100 })
    }

    fn process_memory(&self) -> CollectorResult<ProcessMemory> {
        self.check("process")?;
        Ok(ProcessMemory {
            resident: 800,
            virtual_size: 4_096,
            stack: 2_048,
        })
    }

    fn network_counters(&self) -> CollectorResult<Vec<NetworkCounters>> {
        self.check("network")?;
        Ok(vec![NetworkCounters {
            interface: "eth0".into(),
            bytes_sent: 1_500,
            bytes_received: 3_000,
        }])
    }

    fn disk_io_counters(&self) -> CollectorResult<Vec<DiskIoCounters>> {
        self.check("disk")?;
        Ok(vec![DiskIoCounters {
            device: "sda".into(),
            read_bytes: 4_096,
            write_bytes: 8_192,
        }])
    }

    fn disk_usage(&self) -> CollectorResult<DiskUsage> {
        self.check("disk_usage")?;
        Ok(DiskUsage { total: 100_000, used: 25_000 })
    }

    fn thread_count(&self) -> CollectorResult<u64> {
        self.check("threads")?;
        Ok(7)
    }

    fn runtime_memory(&self) -> CollectorResult<RuntimeMemStats> {
        self.check("runtime")?;
        Ok(RuntimeMemStats {
            live_bytes: 10_240,
            peak_bytes: 20_480,
            total_allocated: 102_400,
            allocations: 50,
            deallocations: 20,
            active: true,
        })
    }
}

/// Stub readings with a slow thread count, so a collection takes at least
/// `delay`.
pub struct SlowSource {
    inner: StubSource,
    delay: Duration,
}

impl SlowSource {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: StubSource::default(),
            delay,
        }
    }
}

impl StatSource for SlowSource {
    fn cpu_usage(&self) -> CollectorResult<CpuUsage> {
        self.inner.cpu_usage()
    }

    fn core_counts(&self) -> CollectorResult<CoreCounts> {
        self.inner.core_counts()
    }

    fn virtual_memory(&self) -> CollectorResult<VirtualMemory> {
        self.inner.virtual_memory()
    }

    fn swap_memory(&self) -> CollectorResult<SwapMemory> {
        self.inner.swap_memory()
    }

    fn process_memory(&self) -> CollectorResult<ProcessMemory> {
        self.inner.process_memory()
    }

    fn network_counters(&self) -> CollectorResult<Vec<NetworkCounters>> {
        self.inner.network_counters()
    }

    fn disk_io_counters(&self) -> CollectorResult<Vec<DiskIoCounters>> {
        self.inner.disk_io_counters()
    }

    fn disk_usage(&self) -> CollectorResult<DiskUsage> {
        self.inner.disk_usage()
    }

    fn thread_count(&self) -> CollectorResult<u64> {
        std::thread::sleep(self.delay);
        self.inner.thread_count()
    }

    fn runtime_memory(&self) -> CollectorResult<RuntimeMemStats> {
        self.inner.runtime_memory()
    }
}

// ----------------------------------------------------------------------------
// Profiler collaborators
// ----------------------------------------------------------------------------

/// Counts profiling calls without touching the filesystem.
#[derive(Default)]
pub struct CountingBackend {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub heap_writes: AtomicUsize,
}

impl ProfilerBackend for CountingBackend {
    fn start_cpu_profile(&self, _path: &Path) -> ProfilerResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_cpu_profile(&self) -> ProfilerResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_heap_profile(&self, _path: &Path) -> ProfilerResult<()> {
        self.heap_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replays scripted readings; the last value repeats once a script runs out.
pub struct ScriptedProbe {
    threads: Mutex<Vec<u64>>,
    heap: Mutex<Vec<u64>>,
}

impl ScriptedProbe {
    pub fn new(threads: &[u64], heap: &[u64]) -> Self {
        let reversed = |v: &[u64]| v.iter().rev().copied().collect::<Vec<_>>();
        Self {
            threads: Mutex::new(reversed(threads)),
            heap: Mutex::new(reversed(heap)),
        }
    }

    fn next(script: &Mutex<Vec<u64>>) -> u64 {
        let mut script = script.lock();
        if script.len() > 1 {
            script.pop().unwrap_or(0)
        } else {
            script.last().copied().unwrap_or(0)
        }
    }
}

impl RuntimeProbe for ScriptedProbe {
    fn thread_count(&self) -> u64 {
        Self::next(&self.threads)
    }

    fn heap_allocated(&self) -> u64 {
        Self::next(&self.heap)
    }
}

/// Heap grows by `step` bytes on every read.
pub struct GrowingHeapProbe {
    pub heap: AtomicU64,
    pub step: u64,
}

impl RuntimeProbe for GrowingHeapProbe {
    fn thread_count(&self) -> u64 {
        1
    }

    fn heap_allocated(&self) -> u64 {
        self.heap.fetch_add(self.step, Ordering::SeqCst)
    }
}
