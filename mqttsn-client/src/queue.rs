//! Inbound Frame Queue: the one structure in this engine that is touched
//! from more than one execution context (the transport's receive path and
//! the main-loop dispatcher), so it alone is mutex-protected. Every other
//! piece of state is single-owner (§5).

use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 16;

pub struct InboundQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
}

impl Default for InboundQueue {
    fn default() -> Self {
        InboundQueue::new(DEFAULT_CAPACITY)
    }
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        InboundQueue {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Push a raw frame to the tail. Returns `false` (and drops the frame)
    /// if the queue is already at capacity; the caller logs the drop.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            return false;
        }
        frames.push_back(frame);
        true
    }

    /// Pop the first frame matching `predicate`. Non-matches are re-queued
    /// to the tail in their original relative order, so unrelated frames
    /// observed during a wait are never lost, only reordered relative to
    /// the match.
    pub fn pop_matching<F>(&self, mut predicate: F) -> Option<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let mut frames = self.frames.lock().unwrap();
        let len = frames.len();
        let mut requeued = VecDeque::with_capacity(len);
        let mut found = None;

        for frame in frames.drain(..) {
            if found.is_none() && predicate(&frame) {
                found = Some(frame);
            } else {
                requeued.push_back(frame);
            }
        }

        *frames = requeued;
        found
    }

    /// Pop the oldest frame regardless of content.
    pub fn pop_front(&self) -> Option<Vec<u8>> {
        self.frames.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
