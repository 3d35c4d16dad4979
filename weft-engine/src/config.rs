// Detection configuration
//
// Options the caller supplies when turning a pattern into a runnable
// engine, plus the properties the input stream declares about itself.
// Validation happens once, before any engine state is allocated.

use crate::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use weft_event::SyncTime;

/// Default output buffering threshold (rows per output batch)
pub const DEFAULT_MAX_BATCH_SIZE: usize = 512;

/// Configuration for a detection engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Upper bound on pattern lifetime in stream time. `0` means "take
    /// the duration from the stream's constant-duration property".
    pub max_duration: SyncTime,

    /// Whether matches may be concurrently active on overlapping windows.
    /// Applied to the pattern before compilation.
    pub allow_overlapping: bool,

    /// Determinism hint; compilation may also infer it structurally.
    /// Applied to the pattern before compilation.
    pub is_deterministic: bool,

    /// Output buffering threshold
    pub max_batch_size: usize,

    /// Optional cap on concurrently active matches per grouping key;
    /// exceeding it drops the newest start attempt (counted, not an error)
    pub max_active_matches_per_key: Option<usize>,
}

impl DetectConfig {
    pub fn new(max_duration: SyncTime) -> Self {
        Self {
            max_duration,
            allow_overlapping: true,
            is_deterministic: false,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_active_matches_per_key: None,
        }
    }

    pub fn with_allow_overlapping(mut self, allow: bool) -> Self {
        self.allow_overlapping = allow;
        self
    }

    pub fn with_deterministic_hint(mut self, deterministic: bool) -> Self {
        self.is_deterministic = deterministic;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_active_matches_per_key(mut self, cap: usize) -> Self {
        self.max_active_matches_per_key = Some(cap);
        self
    }

    /// Validate this configuration against the stream's declared
    /// properties and return the effective match duration.
    pub fn validate(&self, properties: &StreamProperties) -> EngineResult<SyncTime> {
        if self.max_batch_size == 0 {
            return Err(EngineError::InvalidConfiguration(
                "max_batch_size must be at least 1".into(),
            ));
        }
        if self.max_duration < 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "max_duration must be non-negative, got {}",
                self.max_duration
            )));
        }
        if self.max_duration > 0 {
            return Ok(self.max_duration);
        }
        match properties.constant_duration {
            Some(d) if d > 0 => Ok(d),
            _ => Err(EngineError::InvalidConfiguration(
                "max_duration is required unless the input stream declares a \
                 constant duration"
                    .into(),
            )),
        }
    }
}

/// Properties the caller guarantees about the input stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamProperties {
    /// No two events share the same (key, timestamp); lets single-event
    /// engines skip the tentative-output layer entirely
    pub simultaneity_free: bool,

    /// Fixed window length of the source, usable in place of
    /// `max_duration`
    pub constant_duration: Option<SyncTime>,
}

impl StreamProperties {
    pub fn simultaneity_free() -> Self {
        Self {
            simultaneity_free: true,
            constant_duration: None,
        }
    }

    pub fn with_constant_duration(mut self, duration: SyncTime) -> Self {
        self.constant_duration = Some(duration);
        self
    }
}
