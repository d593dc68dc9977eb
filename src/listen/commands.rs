//! Bounded buffer of retrieved voice commands
//!
//! FIFO in both directions: `push` evicts the oldest entry once the
//! buffer is at capacity, and `drain` returns commands oldest first,
//! so callers execute them in the order they were spoken.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Bounded FIFO queue of command strings
#[derive(Debug)]
pub struct CommandBuffer {
    inner: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl CommandBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a command, evicting the single oldest entry when full
    ///
    /// Insert-and-evict is one critical section, so concurrent pushes
    /// preserve insertion order and never overshoot capacity.
    pub fn push(&self, command: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }

        let command = command.into();
        let mut queue = self.lock();
        if queue.len() == self.capacity
            && let Some(evicted) = queue.pop_front()
        {
            tracing::debug!(command = %evicted, "command buffer full, evicted oldest");
        }
        tracing::debug!(command = %command, "buffered command");
        queue.push_back(command);
    }

    /// Remove and return up to `n` commands, oldest first
    pub fn drain(&self, n: usize) -> Vec<String> {
        let mut queue = self.lock();
        let take = n.min(queue.len());
        queue.drain(..take).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_past_capacity_evicts_oldest() {
        let buffer = CommandBuffer::new(3);
        for cmd in ["a", "b", "c", "d"] {
            buffer.push(cmd);
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.drain(3), vec!["b", "c", "d"]);
    }

    #[test]
    fn drain_is_fifo_and_exhaustive() {
        let buffer = CommandBuffer::new(10);
        for cmd in ["one", "two", "three", "four"] {
            buffer.push(cmd);
        }

        let first = buffer.drain(2);
        let rest = buffer.drain(10);

        assert_eq!(first, vec!["one", "two"]);
        assert_eq!(rest, vec!["three", "four"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_more_than_available() {
        let buffer = CommandBuffer::new(4);
        buffer.push("only");

        assert_eq!(buffer.drain(100), vec!["only"]);
        assert!(buffer.drain(1).is_empty());
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let buffer = CommandBuffer::new(0);
        buffer.push("ignored");
        assert!(buffer.is_empty());
    }
}
