//! Shared records passed between the fetcher, the cache, and page agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ordered list of profile URLs in source order.
///
/// Cheap to clone; a refresh always builds a new list instead of editing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryList(Arc<[String]>);

impl EntryList {
    /// Parses a newline-delimited body: lines are trimmed and blank lines dropped.
    pub fn parse(body: &str) -> Self {
        body.split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in source order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for EntryList {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl FromIterator<String> for EntryList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for EntryList {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_string).collect()
    }
}

/// Cached list snapshot plus the time it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Entries from the most recent successful fetch.
    pub entries: EntryList,
    /// Epoch milliseconds when the fetch completed.
    pub fetched_at_epoch_ms: u64,
}

impl CacheRecord {
    /// Creates a record from the provided components.
    pub fn new(entries: EntryList, fetched_at_epoch_ms: u64) -> Self {
        Self {
            entries,
            fetched_at_epoch_ms,
        }
    }

    /// Helper that stamps `entries` with the current time.
    pub fn fetched_now(entries: EntryList) -> Self {
        Self::new(entries, epoch_ms())
    }

    /// Fetch time as a UTC timestamp.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.fetched_at_epoch_ms)
    }

    /// True when the record is at least `max_age` old at `now_epoch_ms`.
    pub fn is_stale(&self, max_age: Duration, now_epoch_ms: u64) -> bool {
        let age = now_epoch_ms.saturating_sub(self.fetched_at_epoch_ms);
        u128::from(age) >= max_age.as_millis()
    }
}

/// Converts epoch milliseconds into a UTC timestamp.
pub fn timestamp(epoch_ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
