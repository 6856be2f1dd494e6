use crate::error::{FlowError, Result};
use std::collections::VecDeque;

/// Bounded FIFO of units the orchestrator has made ready to run.
#[derive(Debug)]
pub struct ReadinessQueue<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> ReadinessQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Adds an item at the back, failing once `capacity` items are queued.
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(FlowError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Removes the front item, or `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
