//! # Ordered Timer Queue
//!
//! One expiry-ordered queue exists per (clock, CPU) base. Keys are
//! `(expiry, seq)` pairs: `seq` is a per-base insertion counter, so equal
//! expiries fire in insertion order. A `BTreeMap` gives O(log n)
//! insert/remove and a cheap minimum for the realistic population (tens to
//! low hundreds of timers per CPU).

use alloc::collections::BTreeMap;

use crate::time::TimePoint;
use crate::timer::TimerId;

/// Ordering key: expiry date first, insertion order second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub expiry: TimePoint,
    pub seq: u64,
}

/// Expiry-ordered container of pending timers.
#[derive(Default)]
pub(crate) struct TimerQueue {
    inner: BTreeMap<QueueKey, TimerId>,
}

impl TimerQueue {
    pub(crate) const fn new() -> Self {
        TimerQueue {
            inner: BTreeMap::new(),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Insert a timer under `key`. Keys are unique by construction (the
    /// sequence counter never repeats within a base).
    #[inline]
    pub(crate) fn insert(&mut self, key: QueueKey, id: TimerId) {
        let prev = self.inner.insert(key, id);
        debug_assert!(prev.is_none(), "duplicate queue key");
    }

    /// The earliest pending timer, without removing it.
    #[inline]
    pub(crate) fn peek(&self) -> Option<(QueueKey, TimerId)> {
        self.inner.first_key_value().map(|(k, v)| (*k, *v))
    }

    /// Remove a member. Removing a key that is not in the queue is a caller
    /// bug: reported loudly, not propagated.
    pub(crate) fn remove(&mut self, key: &QueueKey) -> bool {
        if self.inner.remove(key).is_some() {
            true
        } else {
            log::warn!(
                "timer queue: removing non-member key (expiry={}, seq={})",
                key.expiry,
                key.seq
            );
            false
        }
    }

    /// Iterate over `(key, id)` pairs in firing order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (QueueKey, TimerId)> + '_ {
        self.inner.iter().map(|(k, v)| (*k, *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimePoint;

    fn key(expiry: i64, seq: u64) -> QueueKey {
        QueueKey {
            expiry: TimePoint::from_ns(expiry),
            seq,
        }
    }

    #[test]
    fn test_orders_by_expiry() {
        let mut q = TimerQueue::new();
        q.insert(key(300, 0), TimerId(3));
        q.insert(key(100, 1), TimerId(1));
        q.insert(key(200, 2), TimerId(2));

        assert_eq!(q.peek(), Some((key(100, 1), TimerId(1))));
        assert!(q.remove(&key(100, 1)));
        assert_eq!(q.peek(), Some((key(200, 2), TimerId(2))));
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut q = TimerQueue::new();
        q.insert(key(500, 7), TimerId(7));
        q.insert(key(500, 8), TimerId(8));

        assert_eq!(q.peek().map(|(_, id)| id), Some(TimerId(7)));
    }

    #[test]
    fn test_remove_non_member_reports_false() {
        let mut q = TimerQueue::new();
        q.insert(key(100, 0), TimerId(1));
        assert!(!q.remove(&key(100, 99)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_iter_is_firing_order() {
        let mut q = TimerQueue::new();
        q.insert(key(50, 2), TimerId(2));
        q.insert(key(10, 1), TimerId(1));

        let order: alloc::vec::Vec<_> = q.iter().map(|(_, id)| id).collect();
        assert_eq!(order, [TimerId(1), TimerId(2)]);
    }
}
