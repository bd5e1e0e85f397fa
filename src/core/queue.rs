//! Bounded FIFO for commands issued before a connection is ready.
//!
//! Owners drain with [`CommandQueue::drain`] on every transition to a ready
//! state and keep draining until the queue reports empty, so a command
//! enqueued while a drained batch is being processed goes out in the same
//! pass, after everything that was already waiting.

use std::collections::VecDeque;

use thiserror::Error;

/// Default number of commands held while not connected.
pub const DEFAULT_QUEUE_LIMIT: usize = 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Command queue is full ({limit} pending)")]
    Full { limit: usize },
}

/// Ordered, bounded buffer of pending commands.
#[derive(Debug)]
pub struct CommandQueue<T> {
    items: VecDeque<T>,
    limit: usize,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}

impl<T> CommandQueue<T> {
    /// Create a queue holding at most `limit` commands. A zero limit is
    /// treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Append to the tail.
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        if self.items.len() >= self.limit {
            return Err(QueueError::Full { limit: self.limit });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Remove the oldest command.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Put back a command that could not be sent. Ignores the limit, since
    /// the slot was already accounted for.
    pub fn push_front(&mut self, item: T) {
        self.items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Drop all pending commands, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }
}
