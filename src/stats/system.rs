// ============================================================================
// SYSTEM STAT SOURCE
// ============================================================================
// `sysinfo` for CPU, memory, network and disk capacity; `/proc` for block
// I/O counters and thread count. CPU percentages are relative to the
// previous refresh, so the first reading after construction is a warm-up.
// ============================================================================

use std::time::Instant;

use parking_lot::Mutex;
use sysinfo::{Disks, Networks, Pid, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

use crate::error::{CollectorError, CollectorResult};

use super::procfs;
use super::{
    CoreCounts, CpuUsage, DiskIoCounters, DiskUsage, NetworkCounters, ProcessMemory, StatSource,
    SwapMemory, VirtualMemory,
};

/// Production [`StatSource`] backed by `sysinfo` and `/proc`.
pub struct SystemStatSource {
    pid: Pid,
    system: Mutex<System>,
    /// Last CPU reading; refreshing again inside the update interval
    /// yields meaningless percentages.
    last_cpu: Mutex<Option<(Instant, CpuUsage)>>,
    networks: Mutex<Networks>,
    disks: Mutex<Disks>,
}

impl std::fmt::Debug for SystemStatSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemStatSource").field("pid", &self.pid).finish()
    }
}

impl SystemStatSource {
    pub fn new() -> CollectorResult<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| CollectorError::unavailable("process", e))?;

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_process(pid);

        debug!(target: "vigil::stats", pid = %pid, cpus = system.cpus().len(), "System stat source ready");

        Ok(Self {
            pid,
            system: Mutex::new(system),
            last_cpu: Mutex::new(None),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        })
    }

    /// Host name as reported by the OS
    pub fn host_name() -> Option<String> {
        System::host_name()
    }

    fn logical_cores(system: &System) -> u64 {
        (system.cpus().len() as u64).max(1)
    }
}

impl StatSource for SystemStatSource {
    fn cpu_usage(&self) -> CollectorResult<CpuUsage> {
        let mut last_cpu = self.last_cpu.lock();
        if let Some((at, usage)) = *last_cpu {
            if at.elapsed() < MINIMUM_CPU_UPDATE_INTERVAL {
                return Ok(usage);
            }
        }

        let mut system = self.system.lock();
        system.refresh_cpu();
        if !system.refresh_process(self.pid) {
            return Err(CollectorError::unavailable("process", "own process not found"));
        }

        let cores = Self::logical_cores(&system) as f64;
        let process = system
            .process(self.pid)
            .ok_or_else(|| CollectorError::unavailable("process", "own process not found"))?;

        let usage = CpuUsage {
            system_percent: f64::from(system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0),
            process_percent: (f64::from(process.cpu_usage()) / cores).clamp(0.0, 100.0),
        };
        *last_cpu = Some((Instant::now(), usage));
        Ok(usage)
    }

    fn core_counts(&self) -> CollectorResult<CoreCounts> {
        let system = self.system.lock();
        let logical = system.cpus().len() as u64;
        if logical == 0 {
            return Err(CollectorError::unavailable("cpu", "no CPUs reported"));
        }
        Ok(CoreCounts {
            logical,
            physical: system.physical_core_count().map(|c| c as u64).unwrap_or(logical),
        })
    }

    fn virtual_memory(&self) -> CollectorResult<VirtualMemory> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(CollectorError::unavailable("memory", "total memory reported as zero"));
        }
        Ok(VirtualMemory {
            total,
            used: system.used_memory(),
            available: system.available_memory(),
            free: system.free_memory(),
        })
    }

    fn swap_memory(&self) -> CollectorResult<SwapMemory> {
        let mut system = self.system.lock();
        system.refresh_memory();
        Ok(SwapMemory {
            total: system.total_swap(),
            used: system.used_swap(),
        })
    }

    fn process_memory(&self) -> CollectorResult<ProcessMemory> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            return Err(CollectorError::unavailable("process", "own process not found"));
        }
        let process = system
            .process(self.pid)
            .ok_or_else(|| CollectorError::unavailable("process", "own process not found"))?;

        let stack = procfs::read_self_status().map(|s| s.stack_bytes).unwrap_or(0);

        Ok(ProcessMemory {
            resident: process.memory(),
            virtual_size: process.virtual_memory(),
            stack,
        })
    }

    fn network_counters(&self) -> CollectorResult<Vec<NetworkCounters>> {
        let mut networks = self.networks.lock();
        networks.refresh();
        Ok(networks
            .iter()
            .map(|(name, data)| NetworkCounters {
                interface: name.clone(),
                bytes_sent: data.total_transmitted(),
                bytes_received: data.total_received(),
            })
            .collect())
    }

    fn disk_io_counters(&self) -> CollectorResult<Vec<DiskIoCounters>> {
        procfs::read_diskstats()
    }

    fn disk_usage(&self) -> CollectorResult<DiskUsage> {
        let mut disks = self.disks.lock();
        disks.refresh();

        let (total, available) = disks.iter().fold((0u64, 0u64), |(total, avail), disk| {
            (total + disk.total_space(), avail + disk.available_space())
        });
        if total == 0 {
            return Err(CollectorError::unavailable("disk", "no mounted disks reported"));
        }
        Ok(DiskUsage {
            total,
            used: total.saturating_sub(available),
        })
    }

    fn thread_count(&self) -> CollectorResult<u64> {
        procfs::read_self_status().map(|s| s.threads)
    }
}
