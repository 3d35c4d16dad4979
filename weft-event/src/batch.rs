// Columnar batches exchanged with the surrounding dataflow.
//
// A batch holds parallel columns (sync_time, other_time, key, payload,
// hash) plus a validity bitvector. A set bit marks a data row; a clear bit
// marks a control row whose `other_time` carries the PUNCTUATION or
// LOW_WATERMARK sentinel. Bit `i & 63` of word `i >> 6` covers row `i`.

use crate::{KeyHash, SyncTime, LOW_WATERMARK, PUNCTUATION};
use std::hash::{BuildHasher, Hash, Hasher};

// Fixed seeds so key hashes are stable across runs.
fn hash_key<K: Hash>(key: &K) -> KeyHash {
    let state = ahash::RandomState::with_seeds(0x9e37, 0x79b9, 0x7f4a, 0x7c15);
    let mut hasher = state.build_hasher();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A batch of input rows in columnar form
#[derive(Debug, Clone)]
pub struct EventBatch<K, P> {
    /// Logical timestamp per row
    pub sync_time: Vec<SyncTime>,

    /// Secondary timestamp; sentinel-valued for control rows
    pub other_time: Vec<SyncTime>,

    /// Grouping key per row (None for keyless control rows)
    pub key: Vec<Option<K>>,

    /// Payload per row (None for control rows)
    pub payload: Vec<Option<P>>,

    /// Hash of the grouping key per row
    pub hash: Vec<KeyHash>,

    /// Validity bitvector: set bit = data row, clear bit = control row
    pub validity: Vec<u64>,
}

/// A decoded row of an [`EventBatch`]
#[derive(Debug, PartialEq)]
pub enum BatchRow<'a, K, P> {
    /// Normal data row
    Event {
        sync_time: SyncTime,
        key: &'a K,
        payload: &'a P,
    },

    /// Punctuation: no event with a smaller timestamp will arrive for this
    /// key's partition (or for the whole stream when keyless)
    Punctuation {
        sync_time: SyncTime,
        key: Option<&'a K>,
    },

    /// Low watermark: time advances across every partition
    LowWatermark { sync_time: SyncTime },
}

impl<K: Hash, P> EventBatch<K, P> {
    pub fn new() -> Self {
        Self {
            sync_time: Vec::new(),
            other_time: Vec::new(),
            key: Vec::new(),
            payload: Vec::new(),
            hash: Vec::new(),
            validity: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sync_time: Vec::with_capacity(capacity),
            other_time: Vec::with_capacity(capacity),
            key: Vec::with_capacity(capacity),
            payload: Vec::with_capacity(capacity),
            hash: Vec::with_capacity(capacity),
            validity: Vec::with_capacity((capacity + 63) / 64),
        }
    }

    pub fn len(&self) -> usize {
        self.sync_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sync_time.is_empty()
    }

    /// Whether row `i` is a data row
    #[inline]
    pub fn is_data(&self, i: usize) -> bool {
        (self.validity[i >> 6] >> (i & 63)) & 1 == 1
    }

    fn push_bit(&mut self, set: bool) {
        let i = self.sync_time.len();
        if i >> 6 >= self.validity.len() {
            self.validity.push(0);
        }
        if set {
            self.validity[i >> 6] |= 1 << (i & 63);
        }
    }

    /// Append a data row
    pub fn push_event(&mut self, sync_time: SyncTime, key: K, payload: P) {
        self.push_bit(true);
        self.hash.push(hash_key(&key));
        self.sync_time.push(sync_time);
        self.other_time.push(sync_time);
        self.key.push(Some(key));
        self.payload.push(Some(payload));
    }

    /// Append a punctuation control row, optionally scoped to one key
    pub fn push_punctuation(&mut self, sync_time: SyncTime, key: Option<K>) {
        self.push_bit(false);
        self.hash
            .push(key.as_ref().map(hash_key).unwrap_or_default());
        self.sync_time.push(sync_time);
        self.other_time.push(PUNCTUATION);
        self.key.push(key);
        self.payload.push(None);
    }

    /// Append a low-watermark control row
    pub fn push_low_watermark(&mut self, sync_time: SyncTime) {
        self.push_bit(false);
        self.hash.push(0);
        self.sync_time.push(sync_time);
        self.other_time.push(LOW_WATERMARK);
        self.key.push(None);
        self.payload.push(None);
    }

    /// Decode row `i`
    pub fn row(&self, i: usize) -> BatchRow<'_, K, P> {
        if self.is_data(i) {
            BatchRow::Event {
                sync_time: self.sync_time[i],
                key: self.key[i].as_ref().expect("data row without key"),
                payload: self.payload[i].as_ref().expect("data row without payload"),
            }
        } else if self.other_time[i] == LOW_WATERMARK {
            BatchRow::LowWatermark {
                sync_time: self.sync_time[i],
            }
        } else {
            BatchRow::Punctuation {
                sync_time: self.sync_time[i],
                key: self.key[i].as_ref(),
            }
        }
    }

    /// Iterate over decoded rows in order
    pub fn rows(&self) -> impl Iterator<Item = BatchRow<'_, K, P>> {
        (0..self.len()).map(move |i| self.row(i))
    }
}

impl<K: Hash, P> Default for EventBatch<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

/// A completed-match row of an [`OutputBatch`]
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow<K, R> {
    pub start_time: SyncTime,
    pub end_time: SyncTime,
    pub key: K,
    pub register: R,
    pub hash: KeyHash,
}

/// A batch of completed matches in columnar form, mirroring [`EventBatch`]
#[derive(Debug, Clone)]
pub struct OutputBatch<K, R> {
    pub start_time: Vec<SyncTime>,
    pub end_time: Vec<SyncTime>,
    pub key: Vec<K>,
    pub register: Vec<R>,
    pub hash: Vec<KeyHash>,

    capacity: usize,
}

impl<K: Hash, R> OutputBatch<K, R> {
    /// Create an output batch that reports full at `capacity` rows
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            start_time: Vec::with_capacity(capacity),
            end_time: Vec::with_capacity(capacity),
            key: Vec::with_capacity(capacity),
            register: Vec::with_capacity(capacity),
            hash: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.start_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start_time.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn push(&mut self, start_time: SyncTime, end_time: SyncTime, key: K, register: R) {
        self.hash.push(hash_key(&key));
        self.start_time.push(start_time);
        self.end_time.push(end_time);
        self.key.push(key);
        self.register.push(register);
    }

    /// Drain this batch into a vector of rows (test and sink convenience)
    pub fn drain_rows(&mut self) -> Vec<OutputRow<K, R>> {
        let mut rows = Vec::with_capacity(self.len());
        for (((start, end), key), (register, hash)) in self
            .start_time
            .drain(..)
            .zip(self.end_time.drain(..))
            .zip(self.key.drain(..))
            .zip(self.register.drain(..).zip(self.hash.drain(..)))
        {
            rows.push(OutputRow {
                start_time: start,
                end_time: end,
                key,
                register,
                hash,
            });
        }
        rows
    }
}
