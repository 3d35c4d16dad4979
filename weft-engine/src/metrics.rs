// Engine metrics
//
// Counter collection for a running engine. Counters are atomics with
// relaxed ordering on the hot path; the handle is shared via Arc so a
// caller can observe a live engine from another thread.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Reason an active match (or a start attempt) was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Pattern lifetime exceeded (`start + max_duration <= now`)
    Expired,

    /// No arc fired for the match at its logical step
    Died,

    /// Per-key active-match cap reached; newest start attempt dropped
    Capped,

    /// Duplicate (key, timestamp) rolled back the key's step
    DuplicateRollback,
}

/// Metrics for one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Data events processed
    pub events_processed: AtomicU64,

    /// Logical steps executed
    pub steps: AtomicU64,

    /// Fresh matches started (start-state arcs that fired)
    pub matches_started: AtomicU64,

    /// Completed matches emitted (after per-step dedup)
    pub matches_completed: AtomicU64,

    /// Outputs suppressed by the per-step dedup
    pub outputs_deduped: AtomicU64,

    /// Drops by reason
    pub drops: RwLock<AHashMap<DropReason, AtomicU64>>,

    /// Peak concurrently active matches under a single key
    pub peak_active_matches: AtomicUsize,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn match_started(&self) {
        self.matches_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn match_completed(&self) {
        self.matches_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn output_deduped(&self) {
        self.outputs_deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let drops = self.drops.read();
        if let Some(counter) = drops.get(&reason) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(drops);
        let mut drops = self.drops.write();
        drops
            .entry(reason)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Update the peak active-match high-water mark
    pub fn observe_active(&self, count: usize) {
        loop {
            let peak = self.peak_active_matches.load(Ordering::Relaxed);
            if count <= peak {
                break;
            }
            if self
                .peak_active_matches
                .compare_exchange_weak(peak, count, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.drops
            .read()
            .get(&reason)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn summary(&self) -> MetricsSummary {
        let total_drops = self
            .drops
            .read()
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        MetricsSummary {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            steps: self.steps.load(Ordering::Relaxed),
            matches_started: self.matches_started.load(Ordering::Relaxed),
            matches_completed: self.matches_completed.load(Ordering::Relaxed),
            outputs_deduped: self.outputs_deduped.load(Ordering::Relaxed),
            total_drops,
            peak_active_matches: self.peak_active_matches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time summary of [`EngineMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub events_processed: u64,
    pub steps: u64,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub outputs_deduped: u64,
    pub total_drops: u64,
    pub peak_active_matches: usize,
}
