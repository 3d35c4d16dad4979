// Partitioned execution
//
// When the grouping key decomposes into a partition key, every engine
// structure (active-match store, clock, step buffer, output buffer) is
// replicated per partition and created lazily on first use. A low
// watermark advances time across every known partition at once.

use crate::PatternEngine;
use ahash::AHashMap;
use std::hash::Hash;
use tracing::debug;
use weft_event::{OutputBatch, SyncTime};

/// A set of independent engines keyed by partition
pub struct PartitionedEngine<PK, E> {
    make: Box<dyn Fn() -> E + Send>,
    partitions: AHashMap<PK, E>,
}

impl<PK, E> PartitionedEngine<PK, E>
where
    PK: Hash + Eq + Clone,
{
    /// `make` builds a fresh engine for a partition seen for the first
    /// time
    pub fn new(make: impl Fn() -> E + Send + 'static) -> Self {
        Self {
            make: Box::new(make),
            partitions: AHashMap::new(),
        }
    }

    /// The engine for `partition`, created on first use
    pub fn ensure_partition(&mut self, partition: &PK) -> &mut E {
        if !self.partitions.contains_key(partition) {
            debug!(num_partitions = self.partitions.len() + 1, "new partition");
        }
        self.partitions
            .entry(partition.clone())
            .or_insert_with(|| (self.make)())
    }

    pub fn partition_mut(&mut self, partition: &PK) -> Option<&mut E> {
        self.partitions.get_mut(partition)
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
}

impl<PK, E> PartitionedEngine<PK, E>
where
    PK: Hash + Eq + Clone,
    E: PatternEngine,
{
    pub fn process_event(
        &mut self,
        partition: &PK,
        now: SyncTime,
        key: E::Key,
        payload: E::Payload,
    ) {
        self.ensure_partition(partition)
            .process_event(now, key, payload);
    }

    /// Punctuation scoped to one partition
    pub fn punctuate(&mut self, partition: &PK, ts: SyncTime, key: Option<&E::Key>) {
        self.ensure_partition(partition).punctuate(ts, key);
    }

    /// Low watermark: time advances in every known partition
    pub fn low_watermark(&mut self, ts: SyncTime) {
        for engine in self.partitions.values_mut() {
            engine.low_watermark(ts);
        }
    }

    /// Full output batches from every partition, tagged with the
    /// partition key
    pub fn take_output(&mut self) -> Vec<(PK, OutputBatch<E::Key, E::Register>)> {
        self.collect(|engine| engine.take_output())
    }

    /// Drain every partition completely, closing open steps
    pub fn finish(&mut self) -> Vec<(PK, OutputBatch<E::Key, E::Register>)> {
        self.collect(|engine| engine.finish())
    }

    fn collect(
        &mut self,
        mut drain: impl FnMut(&mut E) -> Vec<OutputBatch<E::Key, E::Register>>,
    ) -> Vec<(PK, OutputBatch<E::Key, E::Register>)> {
        let mut batches = Vec::new();
        for (partition, engine) in self.partitions.iter_mut() {
            for batch in drain(engine) {
                batches.push((partition.clone(), batch));
            }
        }
        batches
    }
}
