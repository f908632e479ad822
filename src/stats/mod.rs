// ============================================================================
// STAT SOURCES
// ============================================================================
// OS and process introspection consumed by the metrics aggregator. Every
// call is synchronous and fallible; the aggregator decides what a failure
// means for the snapshot.
// ============================================================================

pub mod alloc;
pub mod procfs;
mod system;

pub use alloc::{RuntimeMemStats, TrackingAllocator};
pub use system::SystemStatSource;

use serde::{Deserialize, Serialize};

use crate::error::CollectorResult;

// ----------------------------------------------------------------------------
// Stat Records
// ----------------------------------------------------------------------------

/// CPU utilisation in percent of total machine capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Whole machine, 0-100
    pub system_percent: f64,
    /// This process, normalised by the logical core count, 0-100
    pub process_percent: f64,
}

/// Logical and physical core counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreCounts {
    pub logical: u64,
    pub physical: u64,
}

/// System-wide memory in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMemory {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub free: u64,
}

/// Swap in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
}

/// Memory held by this process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMemory {
    /// Resident set size
    pub resident: u64,
    /// Virtual size
    pub virtual_size: u64,
    /// Main thread stack size
    pub stack: u64,
}

/// Cumulative byte counters for one network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Cumulative byte counters for one block device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIoCounters {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Capacity of all mounted disks, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
}

// ----------------------------------------------------------------------------
// Stat Source Capability
// ----------------------------------------------------------------------------

/// OS/process statistics consumed by the aggregator.
///
/// Implementations are shared across the aggregator's worker threads.
pub trait StatSource: Send + Sync {
    fn cpu_usage(&self) -> CollectorResult<CpuUsage>;

    fn core_counts(&self) -> CollectorResult<CoreCounts>;

    fn virtual_memory(&self) -> CollectorResult<VirtualMemory>;

    fn swap_memory(&self) -> CollectorResult<SwapMemory>;

    fn process_memory(&self) -> CollectorResult<ProcessMemory>;

    /// Per-interface counters
    fn network_counters(&self) -> CollectorResult<Vec<NetworkCounters>>;

    /// Per-device counters
    fn disk_io_counters(&self) -> CollectorResult<Vec<DiskIoCounters>>;

    fn disk_usage(&self) -> CollectorResult<DiskUsage>;

    /// Number of OS threads in this process
    fn thread_count(&self) -> CollectorResult<u64>;

    /// Allocation statistics of this process.
    fn runtime_memory(&self) -> CollectorResult<RuntimeMemStats> {
        Ok(alloc::runtime_stats())
    }
}
