// Stepped engine
//
// Per-timestamp engine for automata with list or multi arcs: all events
// sharing (key, timestamp) are collected into an ordered list, and the
// step runs only once the key's clock moves past that timestamp. Single
// arcs still evaluate per event of the list; list arcs see the whole
// list; multi arcs fold it.
//
// Because a step cannot run before its timestamp is closed, duplicate
// timestamps simply extend the pending list; no tentative-output layer
// is needed here.

use crate::config::DetectConfig;
use crate::metrics::EngineMetrics;
use crate::output::OutputBuffer;
use crate::step::{expire_actives, run_step, ActiveList, StepOutput, StepParams};
use crate::PatternEngine;
use ahash::AHashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;
use weft_afa::CompiledAfa;
use weft_event::{BatchRow, EventBatch, OutputBatch, SyncTime, PUNCTUATION};

struct KeyState<P, R> {
    actives: ActiveList<R>,

    /// Timestamp of the open (not yet executed) step
    last_ts: SyncTime,

    /// Events collected for the open step, in arrival order
    pending: Vec<P>,
}

impl<P, R> Default for KeyState<P, R> {
    fn default() -> Self {
        Self {
            actives: ActiveList::new(),
            last_ts: PUNCTUATION,
            pending: Vec::new(),
        }
    }
}

/// Per-timestamp-step execution engine, grouped by key
pub struct SteppedEngine<K, P, R, A = ()> {
    afa: Arc<CompiledAfa<P, R, A>>,
    params: StepParams,
    keys: AHashMap<K, KeyState<P, R>>,
    out: OutputBuffer<K, R>,
    metrics: Arc<EngineMetrics>,
    scratch: Vec<StepOutput<R>>,
}

impl<K, P, R, A> SteppedEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    pub fn new(afa: Arc<CompiledAfa<P, R, A>>, max_duration: SyncTime, config: &DetectConfig) -> Self {
        debug!(
            num_states = afa.num_states(),
            is_deterministic = afa.is_deterministic(),
            max_duration,
            "created stepped engine"
        );
        Self {
            afa,
            params: StepParams {
                max_duration,
                allow_overlapping: config.allow_overlapping,
                max_active_per_key: config.max_active_matches_per_key,
            },
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

        if !state.pending.is_empty() && now > state.last_ts {
            close_step(
                state,
                &self.afa,
                &self.params,
                &key,
                &mut self.out,
                &self.metrics,
                &mut self.scratch,
            );
        }
        state.last_ts = now;
        state.pending.push(payload);
    }

    /// Advance the clock for one key (or every key): runs any open step
    /// older than `ts` and expires stale matches.
    pub fn punctuate(&mut self, ts: SyncTime, key: Option<&K>) {
        match key {
            Some(key) => {
                if let Some(state) = self.keys.get_mut(key) {
                    advance_key(
                        state,
                        &self.afa,
                        &self.params,
                        ts,
                        key,
                        &mut self.out,
                        &self.metrics,
                        &mut self.scratch,
                    );
                }
            }
            None => {
                for (key, state) in self.keys.iter_mut() {
                    advance_key(
                        state,
                        &self.afa,
                        &self.params,
                        ts,
                        key,
                        &mut self.out,
                        &self.metrics,
                        &mut self.scratch,
                    );
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

#[allow(clippy::too_many_arguments)]
fn close_step<K, P, R, A>(
    state: &mut KeyState<P, R>,
    afa: &CompiledAfa<P, R, A>,
    params: &StepParams,
    key: &K,
    out: &mut OutputBuffer<K, R>,
    metrics: &EngineMetrics,
    scratch: &mut Vec<StepOutput<R>>,
) where
    K: Hash + Clone,
    R: Clone + PartialEq,
{
    scratch.clear();
    run_step(
        afa,
        state.last_ts,
        &state.pending,
        params,
        &mut state.actives,
        metrics,
        scratch,
    );
    state.pending.clear();
    for output in scratch.drain(..) {
        out.push(key, output);
    }
}

#[allow(clippy::too_many_arguments)]
fn advance_key<K, P, R, A>(
    state: &mut KeyState<P, R>,
    afa: &CompiledAfa<P, R, A>,
    params: &StepParams,
    ts: SyncTime,
    key: &K,
    out: &mut OutputBuffer<K, R>,
    metrics: &EngineMetrics,
    scratch: &mut Vec<StepOutput<R>>,
) where
    K: Hash + Clone,
    R: Clone + PartialEq,
{
    if !state.pending.is_empty() && ts > state.last_ts {
        close_step(state, afa, params, key, out, metrics, scratch);
    }
    if ts > state.last_ts {
        state.last_ts = ts;
        expire_actives(&mut state.actives, ts, params.max_duration, metrics);
    }
}

impl<K, P, R, A> PatternEngine for SteppedEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    type Key = K;
    type Payload = P;
    type Register = R;

    fn process_event(&mut self, now: SyncTime, key: K, payload: P) {
        SteppedEngine::process_event(self, now, key, payload);
    }

    fn punctuate(&mut self, ts: SyncTime, key: Option<&K>) {
        SteppedEngine::punctuate(self, ts, key);
    }

    fn low_watermark(&mut self, ts: SyncTime) {
        SteppedEngine::punctuate(self, ts, None);
    }

    fn take_output(&mut self) -> Vec<OutputBatch<K, R>> {
        self.out.take_full()
    }

    fn finish(&mut self) -> Vec<OutputBatch<K, R>> {
        // Close every open step; end of stream closes every timestamp.
        let keys: Vec<K> = self.keys.keys().cloned().collect();
        for key in keys {
            if let Some(state) = self.keys.get_mut(&key) {
                if !state.pending.is_empty() {
                    close_step(
                        state,
                        &self.afa,
                        &self.params,
                        &key,
                        &mut self.out,
                        &self.metrics,
                        &mut self.scratch,
                    );
                }
            }
        }
        self.out.drain_all()
    }
}
