use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::logging::PerfTimer;
use crate::types::{Label, Timestamp};

use super::SeriesStorage;

// ----------------------------------------------------------------------------
// Field Aliases
// ----------------------------------------------------------------------------

/// Raw allocation-record keys and the names callers see for them.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("alloc", "Alloc"),
    ("total_alloc", "TotalAlloc"),
    ("peak_alloc", "PeakAlloc"),
    ("mallocs", "Mallocs"),
    ("frees", "Frees"),
    ("heap_objects", "HeapObjects"),
    ("rss", "Rss"),
    ("vms", "Vms"),
    ("stack_inuse", "StackInuse"),
];

/// Caller-facing name of a stored field; unmapped names pass through.
pub fn canonical_field_name(field: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(raw, _)| *raw == field)
        .map(|(_, alias)| *alias)
        .unwrap_or(field)
}

// ----------------------------------------------------------------------------
// Report Topics
// ----------------------------------------------------------------------------

/// Canned field sets for report views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportTopic {
    LoadStatistics,
    CpuStatistics,
    MemoryStatistics,
    MemoryProfile,
    NetworkIo,
    DiskIo,
    OverallHealth,
}

impl ReportTopic {
    pub const ALL: [ReportTopic; 7] = [
        ReportTopic::LoadStatistics,
        ReportTopic::CpuStatistics,
        ReportTopic::MemoryStatistics,
        ReportTopic::MemoryProfile,
        ReportTopic::NetworkIo,
        ReportTopic::DiskIo,
        ReportTopic::OverallHealth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReportTopic::LoadStatistics => "LoadStatistics",
            ReportTopic::CpuStatistics => "CPUStatistics",
            ReportTopic::MemoryStatistics => "MemoryStatistics",
            ReportTopic::MemoryProfile => "MemoryProfile",
            ReportTopic::NetworkIo => "NetworkIO",
            ReportTopic::DiskIo => "DiskIO",
            ReportTopic::OverallHealth => "OverallHealth",
        }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            ReportTopic::LoadStatistics => &[
                "overall_load_of_service",
                "service_cpu_load",
                "service_memory_load",
                "system_cpu_load",
                "system_memory_load",
            ],
            ReportTopic::CpuStatistics => &["total_cores", "cores_used_by_service", "cores_used_by_system"],
            ReportTopic::MemoryStatistics => &[
                "total_system_memory",
                "memory_used_by_system",
                "memory_used_by_service",
                "available_memory",
                "gc_pause_duration",
                "stack_memory_usage",
            ],
            ReportTopic::MemoryProfile => &[
                "heap_alloc_by_service",
                "heap_alloc_by_system",
                "total_alloc_by_service",
                "total_memory_by_os",
            ],
            ReportTopic::NetworkIo => &["bytes_sent", "bytes_received"],
            ReportTopic::DiskIo => &["disk_read_bytes", "disk_write_bytes"],
            ReportTopic::OverallHealth => &["service_health_percent", "system_health_percent"],
        }
    }
}

impl Display for ReportTopic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportTopic {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportTopic::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StorageError::UnknownTopic { topic: s.to_string() })
    }
}

// ----------------------------------------------------------------------------
// Query
// ----------------------------------------------------------------------------

/// One timestamp-aligned row of query output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    /// RFC 3339 when serialized
    pub time: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// Read path over a [`SeriesStorage`].
#[derive(Clone)]
pub struct SeriesQuery {
    storage: Arc<dyn SeriesStorage>,
    /// Whole second at or before process start
    process_start: Timestamp,
}

impl SeriesQuery {
    pub fn new(storage: Arc<dyn SeriesStorage>, process_start: Timestamp) -> Self {
        Self {
            storage,
            process_start: process_start.truncate_to_secs(),
        }
    }

    pub fn process_start(&self) -> Timestamp {
        self.process_start
    }

    /// Rows in `[start, end)` for `fields`, ascending by time.
    ///
    /// A start before the process started is moved up to process start.
    /// Points land in the same row only when their timestamps are equal;
    /// when one series holds duplicate timestamps the later point wins.
    pub fn query<S: AsRef<str>>(
        &self,
        fields: &[S],
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> StorageResult<Vec<QueryRow>> {
        if start > end {
            return Err(StorageError::InvalidTimeRange { start, end });
        }

        let start = start.max(self.process_start);
        if start >= end {
            return Ok(Vec::new());
        }

        let timer = PerfTimer::with_threshold("series_query", 250);
        let mut rows: BTreeMap<Timestamp, BTreeMap<String, f64>> = BTreeMap::new();

        for field in fields {
            let field = field.as_ref();
            let points = self.storage.select(field, labels, start, end).map_err(|e| {
                warn!(target: "vigil::query", field, error = %e, "Series read failed");
                e
            })?;

            let name = canonical_field_name(field);
            for point in points {
                rows.entry(point.timestamp)
                    .or_default()
                    .insert(name.to_string(), point.value);
            }
        }

        let result: Vec<QueryRow> = rows
            .into_iter()
            .map(|(timestamp, values)| QueryRow {
                time: timestamp.to_datetime(),
                values,
            })
            .collect();

        debug!(
            target: "vigil::query",
            fields = fields.len(),
            rows = result.len(),
            elapsed_ms = timer.stop(),
            "Query complete"
        );
        Ok(result)
    }

    /// Same as [`query`](Self::query) over a topic's field set.
    pub fn query_topic(
        &self,
        topic: ReportTopic,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> StorageResult<Vec<QueryRow>> {
        self.query(topic.fields(), labels, start, end)
    }
}

impl std::fmt::Debug for SeriesQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesQuery")
            .field("process_start", &self.process_start)
            .finish_non_exhaustive()
    }
}
