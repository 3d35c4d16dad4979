//! Weft Event Model
//!
//! This crate defines the event and batch structures shared by the Weft
//! pattern engine. Events carry a logical timestamp, a grouping key and a
//! payload; batches are the columnar unit of exchange with the surrounding
//! dataflow.

mod batch;

pub use batch::{BatchRow, EventBatch, OutputBatch, OutputRow};

use serde::{Deserialize, Serialize};

/// Logical timestamp in stream time (caller-defined units)
pub type SyncTime = i64;

/// Hash of a grouping key (carried alongside the key in batches)
pub type KeyHash = u64;

/// Sync time representing "never expires"
pub const INFINITE_SYNC_TIME: SyncTime = i64::MAX;

/// Sentinel in `other_time` marking a punctuation control row
pub const PUNCTUATION: SyncTime = i64::MIN;

/// Sentinel in `other_time` marking a low-watermark control row
pub const LOW_WATERMARK: SyncTime = i64::MIN + 1;

/// A single event in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent<K, P> {
    /// Logical timestamp (non-decreasing per grouping key)
    pub sync_time: SyncTime,

    /// Grouping key for this event
    pub key: K,

    /// Event payload
    pub payload: P,
}

impl<K, P> StreamEvent<K, P> {
    pub fn new(sync_time: SyncTime, key: K, payload: P) -> Self {
        Self {
            sync_time,
            key,
            payload,
        }
    }
}

/// Compute the end timestamp of a match: `start + duration`, saturating to
/// [`INFINITE_SYNC_TIME`]
#[inline]
pub fn match_end_time(start: SyncTime, max_duration: SyncTime) -> SyncTime {
    start.saturating_add(max_duration)
}
