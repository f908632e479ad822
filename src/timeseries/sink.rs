use std::sync::Arc;

use tracing::{debug, error};

use crate::collector::MetricSnapshot;
use crate::error::StorageResult;
use crate::types::Labels;

use super::{DataPoint, SeriesRow, SeriesStorage};

/// Writes snapshots as one point per field.
#[derive(Clone)]
pub struct SeriesSink {
    storage: Arc<dyn SeriesStorage>,
    labels: Labels,
}

impl SeriesSink {
    /// `labels` are attached to every point; they must include the host label.
    pub fn new(storage: Arc<dyn SeriesStorage>, labels: Labels) -> Self {
        Self { storage, labels }
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Rows for one snapshot, all at the snapshot's timestamp truncated to seconds.
    pub fn rows_for(&self, snapshot: &MetricSnapshot) -> Vec<SeriesRow> {
        let timestamp = snapshot.timestamp.truncate_to_secs();
        snapshot
            .fields()
            .into_iter()
            .map(|(metric, value)| SeriesRow {
                metric,
                labels: self.labels.clone(),
                point: DataPoint { timestamp, value },
            })
            .collect()
    }

    /// Append the snapshot; returns the number of points written.
    pub fn write_snapshot(&self, snapshot: &MetricSnapshot) -> StorageResult<usize> {
        let rows = self.rows_for(snapshot);
        let count = rows.len();

        self.storage.insert_rows(&rows).map_err(|e| {
            error!(target: "vigil::timeseries", error = %e, "Failed to store snapshot");
            e
        })?;

        debug!(
            target: "vigil::timeseries",
            points = count,
            timestamp = %snapshot.timestamp,
            "Snapshot stored"
        );
        Ok(count)
    }
}

impl std::fmt::Debug for SeriesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesSink").field("labels", &self.labels).finish_non_exhaustive()
    }
}
