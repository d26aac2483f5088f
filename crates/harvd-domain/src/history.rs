use std::collections::VecDeque;

use chrono::Utc;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize};

/// One recorded value change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    /// Milliseconds since the UNIX epoch.
    pub ts: i64,
    pub value: T,
}

/// Bounded, ordered log of value changes with an O(1) latest query.
///
/// Capacity is at least 1; the oldest entry is evicted on overflow.
/// Timestamps are monotone under a single writer: an entry recorded
/// with a clock that went backwards is clamped to the previous entry's
/// timestamp.
#[derive(Debug, Clone)]
pub struct TimestampedHistory<T> {
    default: T,
    capacity: usize,
    entries: VecDeque<HistoryEntry<T>>,
}

impl<T: Clone> TimestampedHistory<T> {
    pub fn new(default: T, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            default,
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `value` with the current wall-clock time.
    pub fn add_value(&mut self, value: T) {
        self.add_value_at(Utc::now().timestamp_millis(), value);
    }

    /// Append `value` with an explicit timestamp, clamping it so the
    /// sequence stays monotone.
    pub fn add_value_at(&mut self, ts: i64, value: T) {
        let ts = match self.entries.back() {
            Some(last) if ts < last.ts => last.ts,
            _ => ts,
        };
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry { ts, value });
    }

    /// The most recent value, or the constructor default when empty.
    pub fn latest(&self) -> T {
        self.entries
            .back()
            .map(|e| e.value.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn latest_entry(&self) -> Option<&HistoryEntry<T>> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.entries.iter()
    }

    /// Snapshot of all entries, oldest first.
    pub fn to_vec(&self) -> Vec<HistoryEntry<T>> {
        self.entries.iter().cloned().collect()
    }

    /// Merge `other` into this history, preserving global timestamp
    /// order, then truncate to the `capacity` newest entries. Used when
    /// a persisted history is folded into a live one.
    pub fn add_all_sorted<I>(&mut self, other: I)
    where
        I: IntoIterator<Item = HistoryEntry<T>>,
    {
        let mut merged: Vec<HistoryEntry<T>> = self.entries.drain(..).collect();
        merged.extend(other);
        merged.sort_by_key(|e| e.ts);
        let skip = merged.len().saturating_sub(self.capacity);
        self.entries.extend(merged.into_iter().skip(skip));
    }

    /// Rebuild a history from persisted entries. Entries are sorted and
    /// clamped to `capacity` newest.
    pub fn from_entries(default: T, capacity: usize, entries: Vec<HistoryEntry<T>>) -> Self {
        let mut history = Self::new(default, capacity);
        history.add_all_sorted(entries);
        history
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// Serializes as the plain entry list; rebuilding requires the default
// and capacity, so deserialization goes through `from_entries`.
impl<T: Serialize> Serialize for TimestampedHistory<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for entry in &self.entries {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}
