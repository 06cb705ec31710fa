//! Append-only detection ledger and its aggregation

use crate::types::Detection;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info};

/// Default retention bound for the in-memory ledger.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100_000;

/// Aggregate statistics over a set of detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_detections: usize,
    pub by_class: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub highest_confidence: f64,
    pub lowest_confidence: f64,
}

impl DetectionSummary {
    pub fn empty() -> Self {
        Self {
            total_detections: 0,
            by_class: BTreeMap::new(),
            average_confidence: 0.0,
            highest_confidence: 0.0,
            lowest_confidence: 0.0,
        }
    }
}

/// Summarize a set of records. Empty input yields an all-zero summary.
pub fn summarize(records: &[Detection]) -> DetectionSummary {
    if records.is_empty() {
        return DetectionSummary::empty();
    }

    let mut by_class = BTreeMap::new();
    let mut total_confidence = 0.0;
    let mut highest = f64::MIN;
    let mut lowest = f64::MAX;

    for det in records {
        *by_class.entry(det.class_name.clone()).or_insert(0) += 1;
        total_confidence += det.confidence;
        highest = highest.max(det.confidence);
        lowest = lowest.min(det.confidence);
    }

    DetectionSummary {
        total_detections: records.len(),
        by_class,
        average_confidence: total_confidence / records.len() as f64,
        highest_confidence: highest,
        lowest_confidence: lowest,
    }
}

/// Immutable point-in-time copy of the history.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    records: Arc<[Detection]>,
}

impl HistorySnapshot {
    pub fn from_records(records: Vec<Detection>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn summary(&self) -> DetectionSummary {
        summarize(&self.records)
    }
}

impl Deref for HistorySnapshot {
    type Target = [Detection];

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

/// Thread-safe, ordered ledger of every detection the process produced.
///
/// Records are only ever appended at the tail, cleared all at once, or
/// evicted from the head once the retention bound is reached.
pub struct DetectionHistory {
    records: RwLock<VecDeque<Detection>>,
    capacity: Option<usize>,
}

impl DetectionHistory {
    /// History bounded to [`DEFAULT_HISTORY_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity_limit(DEFAULT_HISTORY_CAPACITY)
    }

    /// History bounded to `limit` records; `0` means unbounded.
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: if limit == 0 { None } else { Some(limit) },
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append a batch at the tail in a single critical section.
    pub fn append(&self, detections: &[Detection]) {
        if detections.is_empty() {
            return;
        }

        let mut records = self.records.write();
        records.extend(detections.iter().cloned());

        if let Some(limit) = self.capacity {
            let overflow = records.len().saturating_sub(limit);
            if overflow > 0 {
                records.drain(..overflow);
                debug!("Detection history evicted {} oldest records", overflow);
            }
        }
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        let records = self.records.read();
        HistorySnapshot::from_records(records.iter().cloned().collect())
    }

    /// The most recent `limit` records, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<Detection> {
        let records = self.records.read();
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn summary(&self) -> DetectionSummary {
        self.snapshot().summary()
    }

    pub fn clear(&self) {
        let previous = std::mem::take(&mut *self.records.write());
        info!("Detection history cleared ({} records)", previous.len());
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new()
    }
}
