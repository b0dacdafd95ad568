//! Reference model of the FIFO.
//!
//! Full and empty rejections are ordinary outcomes, not errors: they only
//! matter when the device reports something different.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    Value(u64),
    Underflow,
}

/// Bounded FIFO holding at most `2^depth` words.
#[derive(Debug, Clone)]
pub struct ReferenceQueue {
    items: VecDeque<u64>,
    capacity: usize,
}

impl ReferenceQueue {
    pub fn new(depth: u32) -> Self {
        let capacity = 1usize << depth;
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, data: u64) -> PushOutcome {
        if self.is_full() {
            return PushOutcome::Overflow;
        }
        self.items.push_back(data);
        PushOutcome::Accepted
    }

    pub fn pop(&mut self) -> PopOutcome {
        match self.items.pop_front() {
            Some(v) => PopOutcome::Value(v),
            None => PopOutcome::Underflow,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Expected device outputs for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Prediction {
    pub data_out: u64,
    pub overflow: bool,
    pub underflow: bool,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data_out={:#x} overflow={} underflow={}",
            self.data_out, self.overflow as u8, self.underflow as u8
        )
    }
}

/// Queue plus the registered output word.
#[derive(Debug, Clone)]
pub struct ReferenceModel {
    queue: ReferenceQueue,
    data_out: u64,
}

impl ReferenceModel {
    pub fn new(depth: u32) -> Self {
        Self {
            queue: ReferenceQueue::new(depth),
            data_out: 0,
        }
    }

    /// Apply one cycle: read first, then write.
    pub fn step(&mut self, write_enable: bool, read_enable: bool, data: u64) -> Prediction {
        let mut prediction = Prediction {
            data_out: self.data_out,
            ..Default::default()
        };
        if read_enable {
            match self.queue.pop() {
                PopOutcome::Value(v) => {
                    self.data_out = v;
                    prediction.data_out = v;
                }
                PopOutcome::Underflow => prediction.underflow = true,
            }
        }
        if write_enable && self.queue.push(data) == PushOutcome::Overflow {
            prediction.overflow = true;
        }
        prediction
    }

    pub fn queue(&self) -> &ReferenceQueue {
        &self.queue
    }
}
