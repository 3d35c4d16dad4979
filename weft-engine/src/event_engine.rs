// Row engine
//
// Single-event engine: every data event is its own logical step. Used
// when the compiled automaton carries only single-event arcs.
//
// Unless the stream declares simultaneity freedom, outputs and state
// changes at a timestamp stay tentative until the key's clock advances,
// so that a duplicate (key, timestamp) can roll the whole step back.

use crate::config::{DetectConfig, StreamProperties};
use crate::metrics::{DropReason, EngineMetrics};
use crate::step::{expire_actives, run_step, ActiveList, StepOutput, StepParams};
use crate::output::OutputBuffer;
use crate::PatternEngine;
use ahash::AHashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, trace};
use weft_afa::CompiledAfa;
use weft_event::{BatchRow, EventBatch, OutputBatch, SyncTime, PUNCTUATION};

struct KeyState<R> {
    actives: ActiveList<R>,

    /// Timestamp of the key's current (possibly still tentative) step
    last_ts: SyncTime,

    /// Whether a data event has been seen at `last_ts`. Punctuation
    /// advances the clock without setting this, so an event arriving at
    /// the punctuation timestamp is a first occurrence, not a duplicate.
    data_at_last_ts: bool,

    /// Actives as they were before the event at `last_ts` was applied
    snapshot: ActiveList<R>,

    /// Outputs produced at `last_ts`, committed once the clock advances
    tentative: Vec<StepOutput<R>>,

    /// A duplicate was seen at `last_ts`; the step is dead until the
    /// clock advances
    poisoned: bool,
}

impl<R> Default for KeyState<R> {
    fn default() -> Self {
        Self {
            actives: ActiveList::new(),
            last_ts: PUNCTUATION,
            data_at_last_ts: false,
            snapshot: ActiveList::new(),
            tentative: Vec::new(),
            poisoned: false,
        }
    }
}

/// Per-event execution engine, grouped by key
pub struct EventEngine<K, P, R, A = ()> {
    afa: Arc<CompiledAfa<P, R, A>>,
    params: StepParams,
    dedup_simultaneous: bool,
    keys: AHashMap<K, KeyState<R>>,
    out: OutputBuffer<K, R>,
    metrics: Arc<EngineMetrics>,
    scratch: Vec<StepOutput<R>>,
}

impl<K, P, R, A> EventEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    pub fn new(
        afa: Arc<CompiledAfa<P, R, A>>,
        max_duration: SyncTime,
        config: &DetectConfig,
        properties: &StreamProperties,
    ) -> Self {
        let dedup_simultaneous = !properties.simultaneity_free;
        debug!(
            num_states = afa.num_states(),
            is_deterministic = afa.is_deterministic(),
            max_duration,
            dedup_simultaneous,
            "created row engine"
        );
        Self {
            afa,
            params: StepParams {
                max_duration,
                allow_overlapping: config.allow_overlapping,
                max_active_per_key: config.max_active_matches_per_key,
            },
            dedup_simultaneous,
            keys: AHashMap::new(),
            out: OutputBuffer::new(config.max_batch_size),
            metrics: Arc::new(EngineMetrics::new()),
            scratch: Vec::new(),
        }
    }

    /// Process one data event. Timestamps must be non-decreasing per key.
    pub fn process_event(&mut self, now: SyncTime, key: K, payload: P) {
        self.metrics.record_event();
        let state = self.keys.entry(key.clone()).or_default();

        if self.dedup_simultaneous {
            if now > state.last_ts {
                for output in state.tentative.drain(..) {
                    self.out.push(&key, output);
                }
                state.snapshot = state.actives.clone();
                state.poisoned = false;
                state.last_ts = now;
                state.data_at_last_ts = true;
            } else if now == state.last_ts && !state.data_at_last_ts {
                // The clock already stands here from a punctuation; this
                // event opens the step rather than duplicating one.
                state.snapshot = state.actives.clone();
                state.poisoned = false;
                state.data_at_last_ts = true;
            } else {
                // Second occurrence at this timestamp: retract the step.
                if !state.poisoned {
                    trace!(now, "duplicate timestamp, rolling back step");
                    state.actives = state.snapshot.clone();
                    state.tentative.clear();
                    state.poisoned = true;
                    self.metrics.record_drop(DropReason::DuplicateRollback);
                }
                return;
            }
        }

        self.scratch.clear();
        run_step(
            &self.afa,
            now,
            std::slice::from_ref(&payload),
            &self.params,
            &mut state.actives,
            &self.metrics,
            &mut self.scratch,
        );

        if self.dedup_simultaneous {
            state.tentative.append(&mut self.scratch);
        } else {
            for output in self.scratch.drain(..) {
                self.out.push(&key, output);
            }
        }
    }

    /// Advance the clock for one key (or for every key) without a data
    /// event: commits tentative outputs and expires stale matches.
    pub fn punctuate(&mut self, ts: SyncTime, key: Option<&K>) {
        match key {
            Some(key) => {
                if let Some(state) = self.keys.get_mut(key) {
                    advance_key(state, ts, key, &mut self.out, &self.params, &self.metrics);
                }
            }
            None => {
                for (key, state) in self.keys.iter_mut() {
                    advance_key(state, ts, key, &mut self.out, &self.params, &self.metrics);
                }
            }
        }
    }

    /// Process a whole input batch, returning every output batch that
    /// filled up along the way
    pub fn process_batch(&mut self, batch: &EventBatch<K, P>) -> Vec<OutputBatch<K, R>>
    where
        P: Clone,
    {
        for row in batch.rows() {
            match row {
                BatchRow::Event {
                    sync_time,
                    key,
                    payload,
                } => self.process_event(sync_time, key.clone(), payload.clone()),
                BatchRow::Punctuation { sync_time, key } => self.punctuate(sync_time, key),
                BatchRow::LowWatermark { sync_time } => self.punctuate(sync_time, None),
            }
        }
        self.out.take_full()
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }
}

fn advance_key<K: Hash + Clone, R>(
    state: &mut KeyState<R>,
    ts: SyncTime,
    key: &K,
    out: &mut OutputBuffer<K, R>,
    params: &StepParams,
    metrics: &EngineMetrics,
) {
    if ts > state.last_ts {
        for output in state.tentative.drain(..) {
            out.push(key, output);
        }
        state.poisoned = false;
        state.last_ts = ts;
        state.data_at_last_ts = false;
        expire_actives(&mut state.actives, ts, params.max_duration, metrics);
    }
}

impl<K, P, R, A> PatternEngine for EventEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    type Key = K;
    type Payload = P;
    type Register = R;

    fn process_event(&mut self, now: SyncTime, key: K, payload: P) {
        EventEngine::process_event(self, now, key, payload);
    }

    fn punctuate(&mut self, ts: SyncTime, key: Option<&K>) {
        EventEngine::punctuate(self, ts, key);
    }

    fn low_watermark(&mut self, ts: SyncTime) {
        EventEngine::punctuate(self, ts, None);
    }

    fn take_output(&mut self) -> Vec<OutputBatch<K, R>> {
        self.out.take_full()
    }

    fn finish(&mut self) -> Vec<OutputBatch<K, R>> {
        // Commit every key's tentative step; no later duplicate can
        // arrive once the stream ends.
        let keys: Vec<K> = self.keys.keys().cloned().collect();
        for key in keys {
            if let Some(state) = self.keys.get_mut(&key) {
                for output in state.tentative.drain(..) {
                    self.out.push(&key, output);
                }
            }
        }
        self.out.drain_all()
    }
}
