// ============================================================================
// TIME-SERIES SINK & QUERY
// ============================================================================
// Every snapshot field is written as its own series tagged with the host
// label. Reads pull each requested series separately and merge the points
// back into rows on exact timestamp equality.
// ============================================================================

mod memory;
mod query;
mod sink;

pub use memory::MemoryStorage;
pub use query::{canonical_field_name, QueryRow, ReportTopic, SeriesQuery};
pub use sink::SeriesSink;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::types::{Label, Labels, Timestamp};

/// One stored value of one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// A point addressed to a series, as handed to the storage engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub metric: CompactString,
    pub labels: Labels,
    pub point: DataPoint,
}

/// Storage engine capability consumed by the sink and the query layer.
///
/// Storage is an append-only log: inserting a row whose (metric, labels,
/// timestamp) already exists adds a second point rather than replacing the
/// first.
pub trait SeriesStorage: Send + Sync {
    fn insert_rows(&self, rows: &[SeriesRow]) -> StorageResult<()>;

    /// Points of `metric` in `[start, end)` from every series whose labels
    /// include all of `labels`, ascending by timestamp. Points sharing a
    /// timestamp keep insertion order.
    fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> StorageResult<Vec<DataPoint>>;

    /// Drop points older than `cutoff`; returns how many were dropped.
    fn purge_before(&self, _cutoff: Timestamp) -> StorageResult<usize> {
        Ok(0)
    }
}
