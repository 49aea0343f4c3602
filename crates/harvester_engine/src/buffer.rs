use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use harvester_core::{Order, Timeline};

use crate::services::OutgoingBuffer;

/// In-memory FIFO of timelines waiting for batch replication.
#[derive(Debug, Default)]
pub struct MemoryOutgoingBuffer {
    queue: Mutex<VecDeque<Timeline>>,
}

impl MemoryOutgoingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Timeline>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of queued timelines (not messages).
    pub fn timelines(&self) -> usize {
        self.queue().len()
    }
}

impl OutgoingBuffer for MemoryOutgoingBuffer {
    fn transmit(&self, timeline: Timeline) {
        if timeline.is_empty() {
            return;
        }
        self.queue().push_back(timeline);
    }

    fn take_batch(&self, order: Order, min_size: usize, max_size: usize) -> Option<Timeline> {
        let mut queue = self.queue();
        let queued: usize = queue.iter().map(Timeline::len).sum();
        if queued == 0 || queued < min_size {
            return None;
        }
        let mut batch = Timeline::new(order);
        while let Some(timeline) = queue.pop_front() {
            batch.merge(timeline);
            if batch.len() >= max_size {
                break;
            }
        }
        Some(batch)
    }

    fn len(&self) -> usize {
        self.queue().iter().map(Timeline::len).sum()
    }
}
