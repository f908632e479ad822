// ============================================================================
// PROFILE BACKEND & RUNTIME PROBE
// ============================================================================
// The profiler brackets sampled calls with a CPU profile and a heap profile
// through `ProfilerBackend`, and reads thread/heap baselines through
// `RuntimeProbe`. The default backend records process resource usage
// (`getrusage`) and allocation counters as JSON artifacts.
// ============================================================================

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ProfilerError, ProfilerResult};
use crate::stats::alloc::{self, RuntimeMemStats};
use crate::stats::procfs;

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// Starts/stops CPU profiling and writes heap snapshots.
///
/// At most one CPU profile is active per backend; a second start while one
/// is running fails with [`ProfilerError::ProfilingBusy`].
pub trait ProfilerBackend: Send + Sync {
    fn start_cpu_profile(&self, path: &Path) -> ProfilerResult<()>;

    fn stop_cpu_profile(&self) -> ProfilerResult<()>;

    fn write_heap_profile(&self, path: &Path) -> ProfilerResult<()>;
}

/// Baselines read around a traced call.
pub trait RuntimeProbe: Send + Sync {
    fn thread_count(&self) -> u64;

    /// Bytes currently allocated on the heap
    fn heap_allocated(&self) -> u64;
}

// ----------------------------------------------------------------------------
// Process Probe
// ----------------------------------------------------------------------------

/// Reads the live process: the `Threads:` line of `/proc/self/status`
/// through a handle kept open, and the tracking allocator counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessProbe;

impl RuntimeProbe for ProcessProbe {
    fn thread_count(&self) -> u64 {
        procfs::read_self_threads().unwrap_or(0)
    }

    fn heap_allocated(&self) -> u64 {
        alloc::runtime_stats().live_bytes
    }
}

// ----------------------------------------------------------------------------
// Resource Usage Backend
// ----------------------------------------------------------------------------

/// CPU time consumed by the process, from `getrusage(RUSAGE_SELF)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user_us: u64,
    pub system_us: u64,
}

impl CpuTimes {
    pub fn current() -> ProfilerResult<Self> {
        // SAFETY: getrusage only writes into the zeroed struct we own.
        let usage = unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
                return Err(ProfilerError::profile_io(
                    "getrusage",
                    std::io::Error::last_os_error(),
                ));
            }
            usage
        };

        let micros = |tv: libc::timeval| (tv.tv_sec as u64) * 1_000_000 + tv.tv_usec as u64;
        Ok(Self {
            user_us: micros(usage.ru_utime),
            system_us: micros(usage.ru_stime),
        })
    }

    fn saturating_sub(self, earlier: CpuTimes) -> CpuTimes {
        CpuTimes {
            user_us: self.user_us.saturating_sub(earlier.user_us),
            system_us: self.system_us.saturating_sub(earlier.system_us),
        }
    }
}

/// Contents of a CPU profile artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuProfile {
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub wall_time: Duration,
    /// Process CPU time spent while the profile was active
    pub cpu_time: CpuTimes,
}

/// Contents of a heap profile artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeapProfile {
    pub captured_at: DateTime<Utc>,
    pub allocations: RuntimeMemStats,
}

#[derive(Debug)]
struct ActiveCpuProfile {
    path: PathBuf,
    staging: PathBuf,
    started_at: DateTime<Utc>,
    started: Instant,
    baseline: CpuTimes,
}

/// Default [`ProfilerBackend`]: process CPU time and allocator counters
/// written as JSON.
#[derive(Debug, Default)]
pub struct ResourceUsageBackend {
    active: Mutex<Option<ActiveCpuProfile>>,
}

impl ResourceUsageBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique sibling of `path` that a writer fills before renaming it over
/// `path`. Readers only ever see a complete artifact.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> ProfilerResult<()> {
    let file = File::create(path).map_err(|e| ProfilerError::profile_io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| ProfilerError::profile_io(path, e))?;
    writer.flush().map_err(|e| ProfilerError::profile_io(path, e))
}

/// Write `value` to `staging`, then rename it to `path`. The staging file
/// is removed on failure.
fn publish_json<T: Serialize>(staging: &Path, path: &Path, value: &T) -> ProfilerResult<()> {
    let result = write_json(staging, value)
        .and_then(|()| fs::rename(staging, path).map_err(|e| ProfilerError::profile_io(path, e)));
    if result.is_err() {
        let _ = fs::remove_file(staging);
    }
    result
}

impl ProfilerBackend for ResourceUsageBackend {
    fn start_cpu_profile(&self, path: &Path) -> ProfilerResult<()> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(ProfilerError::ProfilingBusy);
        }

        // Fail early if the artifact cannot be created.
        let staging = staging_path(path);
        File::create(&staging).map_err(|e| ProfilerError::profile_io(path, e))?;

        let baseline = match CpuTimes::current() {
            Ok(baseline) => baseline,
            Err(e) => {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
        };

        *active = Some(ActiveCpuProfile {
            path: path.to_path_buf(),
            staging,
            started_at: Utc::now(),
            started: Instant::now(),
            baseline,
        });
        trace!(target: "vigil::profiler", path = %path.display(), "CPU profile started");
        Ok(())
    }

    fn stop_cpu_profile(&self) -> ProfilerResult<()> {
        let session = self.active.lock().take().ok_or(ProfilerError::ProfilingInactive)?;

        let cpu_time = match CpuTimes::current() {
            Ok(now) => now.saturating_sub(session.baseline),
            Err(e) => {
                let _ = fs::remove_file(&session.staging);
                return Err(e);
            }
        };

        let profile = CpuProfile {
            started_at: session.started_at,
            wall_time: session.started.elapsed(),
            cpu_time,
        };
        publish_json(&session.staging, &session.path, &profile)
    }

    fn write_heap_profile(&self, path: &Path) -> ProfilerResult<()> {
        let profile = HeapProfile {
            captured_at: Utc::now(),
            allocations: alloc::runtime_stats(),
        };
        publish_json(&staging_path(path), path, &profile)
    }
}
