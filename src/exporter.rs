// ============================================================================
// PROMETHEUS EXPORTER
// ============================================================================
// Mirrors the latest snapshot and the function-metrics table into a private
// Prometheus registry, rendered on demand in text exposition format.
// ============================================================================

use std::collections::HashMap;

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, Opts, Registry as PrometheusRegistry, TextEncoder};

use crate::collector::MetricSnapshot;
use crate::config::ThresholdsConfig;
use crate::error::{VigilError, VigilResult};
use crate::profiler::FunctionMetrics;

const NAMESPACE: &str = "vigil";

pub struct PrometheusExporter {
    registry: PrometheusRegistry,
    system_cpu_percent: Gauge,
    system_memory_used_bytes: Gauge,
    thread_count: IntGauge,
    disk_read_bytes: Gauge,
    disk_write_bytes: Gauge,
    health_percent: GaugeVec,
    traced_functions: IntGauge,
    traced_profiled_calls: GaugeVec,
    thresholds: GaugeVec,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

fn register_err(e: prometheus::Error) -> VigilError {
    VigilError::Internal(format!("prometheus registration failed: {e}"))
}

impl PrometheusExporter {
    pub fn new(service: &str) -> VigilResult<Self> {
        let mut labels = HashMap::new();
        labels.insert("service".to_string(), service.to_string());
        let registry = PrometheusRegistry::new_custom(Some(NAMESPACE.to_string()), Some(labels))
            .map_err(register_err)?;

        let system_cpu_percent = Gauge::new("system_cpu_percent", "System-wide CPU usage percent")
            .map_err(register_err)?;
        let system_memory_used_bytes = Gauge::new("system_memory_used_bytes", "System memory in use")
            .map_err(register_err)?;
        let thread_count = IntGauge::new("thread_count", "Threads of this process").map_err(register_err)?;
        let disk_read_bytes = Gauge::new("disk_read_bytes", "Cumulative bytes read from disk")
            .map_err(register_err)?;
        let disk_write_bytes = Gauge::new("disk_write_bytes", "Cumulative bytes written to disk")
            .map_err(register_err)?;
        let health_percent = GaugeVec::new(
            Opts::new("health_percent", "Health score by scope"),
            &["scope"],
        )
        .map_err(register_err)?;
        let traced_functions = IntGauge::new("traced_functions", "Distinct traced function identities")
            .map_err(register_err)?;
        let traced_profiled_calls = GaugeVec::new(
            Opts::new("traced_profiled_calls", "Sampled calls per traced function"),
            &["function"],
        )
        .map_err(register_err)?;
        let thresholds = GaugeVec::new(
            Opts::new("threshold", "Configured alerting limit by resource"),
            &["resource"],
        )
        .map_err(register_err)?;

        registry.register(Box::new(system_cpu_percent.clone())).map_err(register_err)?;
        registry.register(Box::new(system_memory_used_bytes.clone())).map_err(register_err)?;
        registry.register(Box::new(thread_count.clone())).map_err(register_err)?;
        registry.register(Box::new(disk_read_bytes.clone())).map_err(register_err)?;
        registry.register(Box::new(disk_write_bytes.clone())).map_err(register_err)?;
        registry.register(Box::new(health_percent.clone())).map_err(register_err)?;
        registry.register(Box::new(traced_functions.clone())).map_err(register_err)?;
        registry.register(Box::new(traced_profiled_calls.clone())).map_err(register_err)?;
        registry.register(Box::new(thresholds.clone())).map_err(register_err)?;

        Ok(Self {
            registry,
            system_cpu_percent,
            system_memory_used_bytes,
            thread_count,
            disk_read_bytes,
            disk_write_bytes,
            health_percent,
            traced_functions,
            traced_profiled_calls,
            thresholds,
        })
    }

    pub fn set_thresholds(&self, limits: &ThresholdsConfig) {
        self.thresholds.with_label_values(&["cpu_percent"]).set(limits.max_cpu_usage);
        self.thresholds.with_label_values(&["memory_percent"]).set(limits.max_memory_usage);
        self.thresholds.with_label_values(&["threads"]).set(limits.max_threads as f64);
    }

    pub fn update(&self, snapshot: &MetricSnapshot) {
        self.system_cpu_percent.set(snapshot.load.system_cpu_load);
        self.system_memory_used_bytes.set(snapshot.memory.memory_used_by_system);
        self.thread_count.set(snapshot.core.thread_count as i64);
        self.disk_read_bytes.set(snapshot.disk.disk_read_bytes);
        self.disk_write_bytes.set(snapshot.disk.disk_write_bytes);
        self.health_percent
            .with_label_values(&["service"])
            .set(snapshot.health.service.percent);
        self.health_percent
            .with_label_values(&["system"])
            .set(snapshot.health.system.percent);
    }

    pub fn record_functions(&self, metrics: &HashMap<String, FunctionMetrics>) {
        self.traced_functions.set(metrics.len() as i64);
        for (identity, m) in metrics {
            self.traced_profiled_calls
                .with_label_values(&[identity.as_str()])
                .set(m.profiled_calls as f64);
        }
    }

    /// Current registry contents in text exposition format.
    pub fn gather_text(&self) -> VigilResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| VigilError::Internal(format!("prometheus encoding failed: {e}")))?;
        String::from_utf8(buffer).map_err(|e| VigilError::Internal(e.to_string()))
    }
}
