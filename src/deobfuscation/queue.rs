//! Per-function worklist of addresses awaiting resolution.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

/// Addresses of one function in discovery order.
///
/// An address is accepted at most once over the queue's lifetime: once queued, pushing
/// it again is a no-op even after it was popped. Failed addresses are therefore never
/// retried.
#[derive(Debug, Default, Clone)]
pub struct TargetQueue {
    pending: VecDeque<u64>,
    seen: FxHashSet<u64>,
}

impl TargetQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `target` unless it is `None` or was queued before. Returns true if the
    /// address was accepted.
    pub fn push(&mut self, target: Option<u64>) -> bool {
        let Some(address) = target else {
            return false;
        };
        if !self.seen.insert(address) {
            return false;
        }
        self.pending.push_back(address);
        true
    }

    /// Removes and returns the oldest pending address.
    pub fn pop(&mut self) -> Option<u64> {
        self.pending.pop_front()
    }

    /// Number of pending addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = TargetQueue::new();
        assert!(queue.push(Some(0x30)));
        assert!(queue.push(Some(0x10)));
        assert!(queue.push(Some(0x20)));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(0x30));
        assert_eq!(queue.pop(), Some(0x10));
        assert_eq!(queue.pop(), Some(0x20));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_skips_none_and_duplicates() {
        let mut queue = TargetQueue::new();
        assert!(!queue.push(None));
        assert!(queue.push(Some(0x10)));
        assert!(!queue.push(Some(0x10)));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(), Some(0x10));
        assert!(!queue.push(Some(0x10)));
        assert!(queue.is_empty());
    }
}
