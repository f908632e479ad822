// ============================================================================
// SAMPLING PROFILER
// ============================================================================
// Every traced call bumps a per-identity atomic counter. Calls whose count is
// a multiple of the sampling rate are bracketed with a CPU profile and a heap
// snapshot; every call updates the function-metrics table.
//
// Lock discipline:
// - counters: sharded map of atomics, no table-wide lock
// - metrics table: one mutex, held only for the in-memory record update,
//   never across profile I/O or the traced call itself
// ============================================================================

pub mod backend;
pub mod callable;
pub mod render;

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProfilerError, ProfilerResult};
use crate::DEFAULT_SAMPLING_RATE;

pub use backend::{ProcessProbe, ProfilerBackend, ResourceUsageBackend, RuntimeProbe};
pub use callable::{callable, CallResults, Callable, DynValue, FnCallable, IntoCallable, ParamType};
pub use render::{ArtifactRenderer, CommandRenderer, ProfileRenderer, ReportType};

/// Default directory for profile artifacts when none is configured
pub const DEFAULT_PROFILE_DIR: &str = "profiles";

// ----------------------------------------------------------------------------
// Function Metrics
// ----------------------------------------------------------------------------

/// Latest cost record of one traced function identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetrics {
    pub function_last_ran_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub execution_time: Duration,
    /// Threads started during the call, floored at zero
    pub thread_delta: u64,
    /// Heap bytes gained during the last sampled call, floored at zero
    pub memory_usage: u64,
    pub cpu_profile_path: Option<PathBuf>,
    pub heap_profile_path: Option<PathBuf>,
    /// Calls that were sampled for profiling
    pub profiled_calls: u64,
}

/// Output of [`Profiler::render_function_report`]. Each rendered part is
/// either the tool output or an `"Error: ..."` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionReport {
    pub identity: String,
    pub report_type: ReportType,
    pub metrics: FunctionMetrics,
    pub cpu_profile: String,
    pub heap_profile: String,
    pub code_trace: String,
}

/// Result of profiling steps around one sampled call.
#[derive(Debug, Default)]
struct SampleOutcome {
    memory_delta: Option<u64>,
    cpu_path: Option<PathBuf>,
    heap_path: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Profiler
// ----------------------------------------------------------------------------

pub struct Profiler {
    sampling_rate: AtomicU64,
    counters: DashMap<String, AtomicU64>,
    metrics: Mutex<HashMap<String, FunctionMetrics>>,
    profile_dir: PathBuf,
    backend: Arc<dyn ProfilerBackend>,
    probe: Arc<dyn RuntimeProbe>,
    renderer: Arc<dyn ProfileRenderer>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("sampling_rate", &self.sampling_rate())
            .field("profile_dir", &self.profile_dir)
            .field("identities", &self.counters.len())
            .finish_non_exhaustive()
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_DIR)
    }
}

impl Profiler {
    /// Profiler writing artifacts under `profile_dir`, with the default
    /// backend, probe and renderer.
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            sampling_rate: AtomicU64::new(DEFAULT_SAMPLING_RATE),
            counters: DashMap::new(),
            metrics: Mutex::new(HashMap::new()),
            profile_dir: profile_dir.into(),
            backend: Arc::new(ResourceUsageBackend::new()),
            probe: Arc::new(ProcessProbe),
            renderer: Arc::new(ArtifactRenderer),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ProfilerBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn RuntimeProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ProfileRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_sampling_rate(self, rate: u64) -> Self {
        self.set_sampling_rate(rate);
        self
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn sampling_rate(&self) -> u64 {
        self.sampling_rate.load(Ordering::Relaxed)
    }

    /// Profile one call in every `rate`. Values below 1 are clamped to 1.
    pub fn set_sampling_rate(&self, rate: u64) {
        let rate = rate.max(1);
        self.sampling_rate.store(rate, Ordering::Relaxed);
        debug!(target: "vigil::profiler", rate, "Sampling rate updated");
    }

    /// Number of calls seen for `identity`, sampled or not.
    pub fn call_count(&self, identity: &str) -> u64 {
        self.counters
            .get(identity)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy of the whole function-metrics table.
    pub fn function_metrics(&self) -> HashMap<String, FunctionMetrics> {
        self.metrics.lock().clone()
    }

    pub fn metrics_for(&self, identity: &str) -> Option<FunctionMetrics> {
        self.metrics.lock().get(identity).cloned()
    }

    /// Artifact paths for an identity: `<dir>/<name>_cpu.prof` and
    /// `<dir>/<name>_mem.prof`.
    pub fn artifact_paths(&self, identity: &str) -> (PathBuf, PathBuf) {
        let name = sanitize_identity(identity);
        (
            self.profile_dir.join(format!("{name}_cpu.prof")),
            self.profile_dir.join(format!("{name}_mem.prof")),
        )
    }

    fn next_count(&self, identity: &str) -> u64 {
        if let Some(counter) = self.counters.get(identity) {
            return counter.fetch_add(1, Ordering::Relaxed) + 1;
        }
        self.counters
            .entry(identity.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    // ------------------------------------------------------------------------
    // Tracing
    // ------------------------------------------------------------------------

    /// Run `f` once under `identity` and return its result unchanged. A panic
    /// inside `f` is re-raised after the metrics record is updated.
    ///
    /// Unsampled calls cost one counter increment, two thread-count reads
    /// through the probe and one metrics-table update.
    pub fn trace<F, R>(&self, identity: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let count = self.next_count(identity);
        let sampled = count % self.sampling_rate() == 0;

        let threads_before = self.probe.thread_count();
        let heap_before = if sampled { Some(self.probe.heap_allocated()) } else { None };
        let cpu_path = if sampled { self.start_cpu_profile(identity) } else { None };

        let ran_at = Utc::now();
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        let execution_time = started.elapsed();

        let outcome = match heap_before {
            Some(before) => self.finish_sample(identity, cpu_path, before),
            None => SampleOutcome::default(),
        };
        let thread_delta = self.probe.thread_count().saturating_sub(threads_before);

        self.record(identity, ran_at, execution_time, thread_delta, sampled, outcome);

        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Validate `args` against the callable's declaration, then trace the
    /// call under its signature identity. On a mismatch the target is never
    /// invoked.
    pub fn trace_callable(&self, target: &dyn Callable, args: Vec<DynValue>) -> ProfilerResult<CallResults> {
        if let Err(e) = callable::validate_args(target.params(), &args) {
            warn!(
                target: "vigil::profiler",
                function = target.name(),
                error = %e,
                "Rejected traced call"
            );
            return Err(e);
        }

        let identity = callable::signature_identity(target);
        self.trace(&identity, || target.invoke(args)).map(CallResults::from)
    }

    /// Like [`trace_callable`](Self::trace_callable), keeping only the first
    /// return value.
    pub fn trace_callable_first(&self, target: &dyn Callable, args: Vec<DynValue>) -> ProfilerResult<Option<DynValue>> {
        self.trace_callable(target, args).map(CallResults::into_first)
    }

    fn start_cpu_profile(&self, identity: &str) -> Option<PathBuf> {
        if let Err(e) = fs::create_dir_all(&self.profile_dir) {
            warn!(
                target: "vigil::profiler",
                dir = %self.profile_dir.display(),
                error = %e,
                "Cannot create profile directory"
            );
            return None;
        }

        let (cpu_path, _) = self.artifact_paths(identity);
        match self.backend.start_cpu_profile(&cpu_path) {
            Ok(()) => Some(cpu_path),
            Err(e) => {
                warn!(target: "vigil::profiler", identity, error = %e, "CPU profile not started");
                None
            }
        }
    }

    fn finish_sample(&self, identity: &str, cpu_path: Option<PathBuf>, heap_before: u64) -> SampleOutcome {
        let mut outcome = SampleOutcome::default();

        if let Some(path) = cpu_path {
            match self.backend.stop_cpu_profile() {
                Ok(()) => outcome.cpu_path = Some(path),
                Err(e) => warn!(target: "vigil::profiler", identity, error = %e, "CPU profile not stopped"),
            }
        }

        let (_, heap_path) = self.artifact_paths(identity);
        if fs::create_dir_all(&self.profile_dir).is_ok() {
            match self.backend.write_heap_profile(&heap_path) {
                Ok(()) => outcome.heap_path = Some(heap_path),
                Err(e) => warn!(target: "vigil::profiler", identity, error = %e, "Heap profile not written"),
            }
        }

        outcome.memory_delta = Some(self.probe.heap_allocated().saturating_sub(heap_before));
        outcome
    }

    fn record(
        &self,
        identity: &str,
        ran_at: DateTime<Utc>,
        execution_time: Duration,
        thread_delta: u64,
        sampled: bool,
        outcome: SampleOutcome,
    ) {
        let mut table = self.metrics.lock();
        let entry = table.entry(identity.to_string()).or_insert_with(|| FunctionMetrics {
            function_last_ran_at: ran_at,
            execution_time,
            thread_delta,
            memory_usage: 0,
            cpu_profile_path: None,
            heap_profile_path: None,
            profiled_calls: 0,
        });

        entry.function_last_ran_at = ran_at;
        entry.execution_time = execution_time;
        entry.thread_delta = thread_delta;

        if sampled {
            entry.profiled_calls += 1;
            if let Some(delta) = outcome.memory_delta {
                entry.memory_usage = delta;
            }
            if outcome.cpu_path.is_some() {
                entry.cpu_profile_path = outcome.cpu_path;
            }
            if outcome.heap_path.is_some() {
                entry.heap_profile_path = outcome.heap_path;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------------

    /// Render the latest profiles of `identity`. Rendering problems end up
    /// as `"Error: ..."` text in the report; only an unknown identity fails.
    pub fn render_function_report(&self, identity: &str, report_type: ReportType) -> ProfilerResult<FunctionReport> {
        let metrics = self
            .metrics_for(identity)
            .ok_or_else(|| ProfilerError::FunctionNotFound {
                identity: identity.to_string(),
            })?;

        let focus = identity.split('(').next().unwrap_or(identity);

        Ok(FunctionReport {
            identity: identity.to_string(),
            report_type,
            cpu_profile: self.render_part(metrics.cpu_profile_path.as_deref(), report_type, None),
            heap_profile: self.render_part(metrics.heap_profile_path.as_deref(), report_type, None),
            code_trace: self.render_part(metrics.cpu_profile_path.as_deref(), ReportType::List, Some(focus)),
            metrics,
        })
    }

    fn render_part(&self, path: Option<&Path>, report_type: ReportType, focus: Option<&str>) -> String {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return "Error: Profile file path is empty".to_string();
        };

        match self.renderer.render(path, report_type, focus) {
            Ok(text) => text,
            Err(e) => {
                debug!(target: "vigil::profiler", path = %path.display(), error = %e, "Render failed");
                format!("Error: {e}")
            }
        }
    }
}

/// File-name-safe form of an identity: path separators, shell/filesystem
/// specials and whitespace become `-`.
pub fn sanitize_identity(identity: &str) -> String {
    identity
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Process-wide Profiler
// ----------------------------------------------------------------------------

static GLOBAL_PROFILER: Lazy<Profiler> = Lazy::new(Profiler::default);

/// The process-wide profiler used by the free functions below.
pub fn profiler() -> &'static Profiler {
    &GLOBAL_PROFILER
}

pub fn trace<F, R>(identity: &str, f: F) -> R
where
    F: FnOnce() -> R,
{
    profiler().trace(identity, f)
}

pub fn set_sampling_rate(rate: u64) {
    profiler().set_sampling_rate(rate)
}

pub fn function_metrics() -> HashMap<String, FunctionMetrics> {
    profiler().function_metrics()
}
