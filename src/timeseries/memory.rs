//! In-process storage engine: one sorted point log per series, series
//! grouped per metric name in a sharded map.

use compact_str::CompactString;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::types::{Label, Labels, LabelsExt, SeriesId, Timestamp};

use super::{DataPoint, SeriesRow, SeriesStorage};

#[derive(Debug)]
struct Series {
    id: SeriesId,
    labels: Labels,
    /// Sorted by timestamp; equal timestamps in insertion order
    points: Vec<DataPoint>,
}

impl Series {
    fn append(&mut self, point: DataPoint) {
        match self.points.last() {
            Some(last) if last.timestamp > point.timestamp => {
                let at = self.points.partition_point(|p| p.timestamp <= point.timestamp);
                self.points.insert(at, point);
            }
            _ => self.points.push(point),
        }
    }

    fn range(&self, start: Timestamp, end: Timestamp) -> &[DataPoint] {
        let lo = self.points.partition_point(|p| p.timestamp < start);
        let hi = self.points.partition_point(|p| p.timestamp < end);
        &self.points[lo..hi.max(lo)]
    }
}

/// Append-only in-memory [`SeriesStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    metrics: DashMap<CompactString, Vec<Series>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct (metric, labels) series
    pub fn series_count(&self) -> usize {
        self.metrics.iter().map(|entry| entry.value().len()).sum()
    }

    /// Total stored points
    pub fn point_count(&self) -> usize {
        self.metrics
            .iter()
            .map(|entry| entry.value().iter().map(|s| s.points.len()).sum::<usize>())
            .sum()
    }
}

impl SeriesStorage for MemoryStorage {
    fn insert_rows(&self, rows: &[SeriesRow]) -> StorageResult<()> {
        for row in rows {
            if !row.point.value.is_finite() {
                return Err(StorageError::WriteFailed {
                    message: format!("non-finite value for '{}'", row.metric),
                });
            }
        }

        for row in rows {
            let id = SeriesId::compute(&row.metric, &row.labels);
            let mut series = self.metrics.entry(row.metric.clone()).or_default();

            match series.iter_mut().find(|s| s.id == id) {
                Some(existing) => existing.append(row.point),
                None => series.push(Series {
                    id,
                    labels: row.labels.canonical(),
                    points: vec![row.point],
                }),
            }
        }
        Ok(())
    }

    fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: Timestamp,
        end: Timestamp,
    ) -> StorageResult<Vec<DataPoint>> {
        let Some(series) = self.metrics.get(metric) else {
            return Ok(Vec::new());
        };

        let mut points: Vec<DataPoint> = series
            .iter()
            .filter(|s| s.labels.matches(labels))
            .flat_map(|s| s.range(start, end).iter().copied())
            .collect();
        // stable: duplicates within one series keep insertion order
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    fn purge_before(&self, cutoff: Timestamp) -> StorageResult<usize> {
        let mut purged = 0;
        for mut entry in self.metrics.iter_mut() {
            for series in entry.value_mut().iter_mut() {
                let keep_from = series.points.partition_point(|p| p.timestamp < cutoff);
                purged += keep_from;
                series.points.drain(..keep_from);
            }
            entry.value_mut().retain(|s| !s.points.is_empty());
        }
        self.metrics.retain(|_, series| !series.is_empty());

        debug!(target: "vigil::timeseries", purged, cutoff = %cutoff, "Purged expired points");
        Ok(purged)
    }
}
