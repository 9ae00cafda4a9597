//! Per-identifier occurrence history with floor lookup.
//!
//! A recycled correlation id maps to every point in the run where it was
//! (re-)assigned. Items are attributed to the latest assignment at or before
//! their own sequence key.

use std::cmp::Ordering;
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use crate::types::Record;

/// A record arrival position (the storage recovery key).
#[derive(Debug, Clone, Copy)]
pub struct SequenceKey(f64);

impl SequenceKey {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for SequenceKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceKey {}

impl PartialOrd for SequenceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for SequenceKey {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

/// Integral keys print without a fraction, so transaction ids read `7_25`.
impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0.abs() < 9.0e15 {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccurrenceIndex {
    entries: BTreeMap<SequenceKey, Record>,
}

impl OccurrenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `info` at `key`, returning any entry it replaced.
    pub fn insert(&mut self, key: SequenceKey, info: Record) -> Option<Record> {
        self.entries.insert(key, info)
    }

    /// Greatest entry with key ≤ `target`; falls back to the earliest entry so
    /// items that precede the first assignment still resolve.
    pub fn floor(&self, target: SequenceKey) -> Option<(SequenceKey, &Record)> {
        self.entries
            .range(..=target)
            .next_back()
            .or_else(|| self.entries.iter().next())
            .map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, SequenceKey, Record> {
        self.entries.iter()
    }
}
