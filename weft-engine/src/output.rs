// Output buffering
//
// Completed matches accumulate into fixed-capacity output batches; a
// batch that fills is set aside and handed out on the next drain. Shared
// by every engine variant.

use crate::step::StepOutput;
use std::hash::Hash;
use weft_event::OutputBatch;

pub(crate) struct OutputBuffer<K, R> {
    current: OutputBatch<K, R>,
    full: Vec<OutputBatch<K, R>>,
    capacity: usize,
}

impl<K: Hash + Clone, R> OutputBuffer<K, R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: OutputBatch::with_capacity(capacity),
            full: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, key: &K, output: StepOutput<R>) {
        self.current
            .push(output.start, output.end, key.clone(), output.register);
        if self.current.is_full() {
            let fresh = OutputBatch::with_capacity(self.capacity);
            self.full.push(std::mem::replace(&mut self.current, fresh));
        }
    }

    /// Hand out every batch that filled up since the last call
    pub fn take_full(&mut self) -> Vec<OutputBatch<K, R>> {
        std::mem::take(&mut self.full)
    }

    /// Hand out everything, including the partially filled tail batch
    pub fn drain_all(&mut self) -> Vec<OutputBatch<K, R>> {
        let mut batches = std::mem::take(&mut self.full);
        if !self.current.is_empty() {
            let fresh = OutputBatch::with_capacity(self.capacity);
            batches.push(std::mem::replace(&mut self.current, fresh));
        }
        batches
    }
}
