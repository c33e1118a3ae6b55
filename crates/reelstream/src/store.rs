//! Session-scoped segment cache.
//!
//! A bounded in-memory ring keyed by `(stream, sequence)`. Inserts that would
//! overshoot the byte quota evict the oldest records first; eviction is
//! best-effort and a record cleared past the active read window simply gets
//! re-downloaded on the next pull.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

/// Cache key: which stream (variant) and which sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    /// Stream (variant) index the segment was downloaded from.
    pub stream: u64,
    /// Media sequence number.
    pub sequence: u64,
}

#[derive(Debug)]
struct SegmentRecord {
    bytes: Bytes,
    byte_len: u64,
    stored_at: Instant,
}

/// Bounded ring buffer of downloaded segments.
#[derive(Debug)]
pub struct SegmentStore {
    max_bytes: u64,
    total_bytes: u64,
    records: HashMap<SegmentKey, SegmentRecord>,
    // Insertion order doubles as stored_at order; stale keys (removed or
    // overwritten) are skipped during eviction.
    order: VecDeque<SegmentKey>,
}

impl SegmentStore {
    /// Creates a store bounded by `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
            records: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Store `bytes` under `key`, evicting oldest records until it fits.
    ///
    /// A payload larger than the whole quota is not stored at all; the quota
    /// invariant holds at every observable point.
    pub fn insert(&mut self, key: SegmentKey, bytes: Bytes) {
        let byte_len = bytes.len() as u64;
        if byte_len > self.max_bytes {
            trace!(
                stream = key.stream,
                sequence = key.sequence,
                byte_len,
                max_bytes = self.max_bytes,
                "segment larger than the cache quota, not stored"
            );
            return;
        }

        // Replacing an existing record releases its bytes first.
        if let Some(old) = self.records.remove(&key) {
            self.total_bytes -= old.byte_len;
        }

        while self.total_bytes + byte_len > self.max_bytes {
            if !self.evict_oldest() {
                break;
            }
        }

        self.total_bytes += byte_len;
        self.records.insert(
            key,
            SegmentRecord {
                bytes,
                byte_len,
                stored_at: Instant::now(),
            },
        );
        self.order.push_back(key);
    }

    /// Bytes for `key`, if still cached.
    pub fn get(&self, key: &SegmentKey) -> Option<Bytes> {
        self.records.get(key).map(|r| r.bytes.clone())
    }

    /// Remove `key`, releasing its bytes from the accounting.
    pub fn remove(&mut self, key: &SegmentKey) -> Option<Bytes> {
        let record = self.records.remove(key)?;
        self.total_bytes -= record.byte_len;
        Some(record.bytes)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.total_bytes = 0;
    }

    /// Total cached payload bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn evict_oldest(&mut self) -> bool {
        while let Some(key) = self.order.pop_front() {
            if let Some(record) = self.records.remove(&key) {
                self.total_bytes -= record.byte_len;
                trace!(
                    stream = key.stream,
                    sequence = key.sequence,
                    byte_len = record.byte_len,
                    age = ?record.stored_at.elapsed(),
                    "evicted oldest cached segment"
                );
                return true;
            }
            // Stale order entry (already removed/overwritten); keep scanning.
        }
        false
    }
}
