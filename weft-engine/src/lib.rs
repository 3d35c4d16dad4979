// Weft Engine - Pattern execution over event streams
//
// This crate runs compiled automata from weft-afa against ordered event
// streams:
// - EventEngine: one logical step per event (single-arc automata), with
//   tentative-output rollback for duplicate timestamps
// - SteppedEngine: one logical step per (key, timestamp), for automata
//   with list or multi arcs
// - PartitionedEngine: lazy per-partition replication with low-watermark
//   broadcast
// - detect(): compiles a pattern and picks the right engine variant
//
// Execution is single-threaded and push-based; callers deliver ordered
// batches and shard across engine instances for parallelism.

mod config;
mod event_engine;
mod metrics;
mod output;
mod partition;
mod step;
mod stepped_engine;

pub use config::{DetectConfig, StreamProperties, DEFAULT_MAX_BATCH_SIZE};
pub use event_engine::EventEngine;
pub use metrics::{DropReason, EngineMetrics, MetricsSummary};
pub use partition::PartitionedEngine;
pub use stepped_engine::SteppedEngine;

use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use weft_afa::{AfaError, Pattern};
use weft_event::{EventBatch, OutputBatch, StreamEvent, SyncTime};

/// Errors that can occur while setting up a detection engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Afa(#[from] AfaError),
}

/// Result type for engine setup operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Common surface of the execution engines: push events and control
/// signals in, drain output batches out
pub trait PatternEngine {
    type Key;
    type Payload;
    type Register;

    /// Process one data event; timestamps must be non-decreasing per key
    fn process_event(&mut self, now: SyncTime, key: Self::Key, payload: Self::Payload);

    /// Process one [`StreamEvent`]
    fn process(&mut self, event: StreamEvent<Self::Key, Self::Payload>) {
        self.process_event(event.sync_time, event.key, event.payload);
    }

    /// Advance the clock for one key (or every key when `None`)
    fn punctuate(&mut self, ts: SyncTime, key: Option<&Self::Key>);

    /// Advance the clock everywhere
    fn low_watermark(&mut self, ts: SyncTime);

    /// Output batches that filled up since the last drain
    fn take_output(&mut self) -> Vec<OutputBatch<Self::Key, Self::Register>>;

    /// End of stream: close open steps, commit tentative outputs and
    /// drain everything
    fn finish(&mut self) -> Vec<OutputBatch<Self::Key, Self::Register>>;
}

/// Engine variant chosen by [`detect`]
pub enum DetectEngine<K, P, R, A = ()> {
    /// Row engine: automaton has only single-event arcs
    Event(EventEngine<K, P, R, A>),

    /// Stepped engine: automaton has list or multi arcs
    Stepped(SteppedEngine<K, P, R, A>),
}

impl<K, P, R, A> DetectEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    pub fn process_batch(&mut self, batch: &EventBatch<K, P>) -> Vec<OutputBatch<K, R>>
    where
        P: Clone,
    {
        match self {
            Self::Event(engine) => engine.process_batch(batch),
            Self::Stepped(engine) => engine.process_batch(batch),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        match self {
            Self::Event(engine) => engine.metrics(),
            Self::Stepped(engine) => engine.metrics(),
        }
    }
}

impl<K, P, R, A> PatternEngine for DetectEngine<K, P, R, A>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
{
    type Key = K;
    type Payload = P;
    type Register = R;

    fn process_event(&mut self, now: SyncTime, key: K, payload: P) {
        match self {
            Self::Event(engine) => engine.process_event(now, key, payload),
            Self::Stepped(engine) => engine.process_event(now, key, payload),
        }
    }

    fn punctuate(&mut self, ts: SyncTime, key: Option<&K>) {
        match self {
            Self::Event(engine) => engine.punctuate(ts, key),
            Self::Stepped(engine) => engine.punctuate(ts, key),
        }
    }

    fn low_watermark(&mut self, ts: SyncTime) {
        match self {
            Self::Event(engine) => PatternEngine::low_watermark(engine, ts),
            Self::Stepped(engine) => PatternEngine::low_watermark(engine, ts),
        }
    }

    fn take_output(&mut self) -> Vec<OutputBatch<K, R>> {
        match self {
            Self::Event(engine) => PatternEngine::take_output(engine),
            Self::Stepped(engine) => PatternEngine::take_output(engine),
        }
    }

    fn finish(&mut self) -> Vec<OutputBatch<K, R>> {
        match self {
            Self::Event(engine) => PatternEngine::finish(engine),
            Self::Stepped(engine) => PatternEngine::finish(engine),
        }
    }
}

/// Compile `pattern` and build the engine variant its arc inventory
/// calls for. The config's overlap and determinism settings are applied
/// to the pattern before compilation.
pub fn detect<K, P, R, A>(
    pattern: Pattern<P, R, A>,
    config: DetectConfig,
    properties: StreamProperties,
) -> EngineResult<DetectEngine<K, P, R, A>>
where
    K: Hash + Eq + Clone,
    R: Clone + PartialEq,
    A: Clone,
{
    let max_duration = config.validate(&properties)?;
    let compiled = Arc::new(
        pattern
            .allow_overlapping_instances(config.allow_overlapping)
            .deterministic(config.is_deterministic)
            .compile()?,
    );

    if compiled.has_step_arcs() {
        debug!("selected stepped engine");
        Ok(DetectEngine::Stepped(SteppedEngine::new(
            compiled,
            max_duration,
            &config,
        )))
    } else {
        debug!("selected row engine");
        Ok(DetectEngine::Event(EventEngine::new(
            compiled,
            max_duration,
            &config,
            &properties,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_picks_row_engine_for_single_arcs() {
        let pattern = Pattern::<i64, i64>::single_element(|_, p, _| *p > 0);
        let engine: DetectEngine<u32, i64, i64> =
            detect(pattern, DetectConfig::new(10), StreamProperties::default()).unwrap();
        assert!(matches!(engine, DetectEngine::Event(_)));
    }

    #[test]
    fn test_detect_picks_stepped_engine_for_list_arcs() {
        let pattern = Pattern::<i64, i64>::list_element(|_, events, _| !events.is_empty());
        let engine: DetectEngine<u32, i64, i64> =
            detect(pattern, DetectConfig::new(10), StreamProperties::default()).unwrap();
        assert!(matches!(engine, DetectEngine::Stepped(_)));
    }

    #[test]
    fn test_detect_rejects_zero_duration_without_constant_duration() {
        let pattern = Pattern::<i64, i64>::single_element(|_, _, _| true);
        let result: EngineResult<DetectEngine<u32, i64, i64>> =
            detect(pattern, DetectConfig::new(0), StreamProperties::default());
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_detect_takes_duration_from_constant_duration_stream() {
        let pattern = Pattern::<i64, i64>::single_element(|_, _, _| true);
        let props = StreamProperties::default().with_constant_duration(25);
        assert!(detect::<u32, _, _, _>(pattern, DetectConfig::new(0), props).is_ok());
    }
}
