// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// Timestamps, labels and series identity shared by the collector, the
// time-series layer and the profiler.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use xxhash_rust::xxh3::Xxh3;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Timestamp in nanoseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from nanoseconds since Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a new timestamp from seconds since Unix epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Get the current timestamp with nanosecond precision
    #[inline]
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0.div_euclid(1_000_000_000)
    }

    /// Drop the sub-second part. Series points are stored at second resolution.
    #[inline]
    pub const fn truncate_to_secs(&self) -> Self {
        Self::from_secs(self.as_secs())
    }

    /// Calculate duration between two timestamps, zero if `earlier` is later
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    #[inline]
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos() as i64))
    }

    #[inline]
    pub fn sub_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_nanos() as i64))
    }

    /// Convert to chrono DateTime<Utc>
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.0)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_nanos() as i64),
            Err(e) => Self(-(e.duration().as_nanos() as i64)),
        }
    }
}

// ----------------------------------------------------------------------------
// Labels - Key-Value Dimensional Data
// ----------------------------------------------------------------------------

/// A single label (key-value pair) attached to a series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// Label key (e.g., "host")
    pub key: CompactString,
    /// Label value (e.g., "web-01")
    pub value: CompactString,
}

impl Label {
    #[inline]
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl<K, V> From<(K, V)> for Label
where
    K: Into<CompactString>,
    V: Into<CompactString>,
{
    fn from((key, value): (K, V)) -> Self {
        Self::new(key, value)
    }
}

/// A set of labels with stack allocation for small sets.
pub type Labels = SmallVec<[Label; 4]>;

/// Label key every stored series carries.
pub const HOST_LABEL: &str = "host";

/// Build the host label set for a hostname.
pub fn host_labels(hostname: &str) -> Labels {
    smallvec![Label::new(HOST_LABEL, hostname)]
}

/// Extension trait for Labels
pub trait LabelsExt {
    /// Get a label value by key
    fn get(&self, key: &str) -> Option<&str>;

    /// Add or update a label
    fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<CompactString>,
        V: Into<CompactString>;

    /// True when every label in `filter` is present with the same value.
    fn matches(&self, filter: &[Label]) -> bool;

    /// Labels sorted by key, the canonical form used for identity.
    fn canonical(&self) -> Labels;
}

impl LabelsExt for Labels {
    fn get(&self, key: &str) -> Option<&str> {
        self.iter()
            .find(|l| l.key.as_str() == key)
            .map(|l| l.value.as_str())
    }

    fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.iter_mut().find(|l| l.key == key) {
            existing.value = value;
        } else {
            self.push(Label { key, value });
        }
    }

    fn matches(&self, filter: &[Label]) -> bool {
        filter.iter().all(|f| self.get(&f.key) == Some(f.value.as_str()))
    }

    fn canonical(&self) -> Labels {
        let mut sorted = self.clone();
        sorted.sort();
        sorted
    }
}

// ----------------------------------------------------------------------------
// Series Identity
// ----------------------------------------------------------------------------

/// Identity of one stored series, computed from metric name + labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SeriesId(u64);

impl SeriesId {
    /// Compute the id; label order does not matter.
    pub fn compute(metric: &str, labels: &[Label]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(metric.as_bytes());

        let mut sorted: SmallVec<[&Label; 8]> = labels.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        for label in sorted {
            hasher.update(b"\x00");
            hasher.update(label.key.as_bytes());
            hasher.update(b"=");
            hasher.update(label.value.as_bytes());
        }

        Self(hasher.digest())
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SeriesId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
