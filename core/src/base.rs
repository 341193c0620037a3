//! # Per-CPU Timer Bases
//!
//! A [`TimerBase`] is the per-(clock, CPU) unit of the timer core: the arena
//! of timer records owned by that processor plus the expiry-ordered queue
//! over them, all behind a single lock. There is one base per online CPU
//! for every master clock; slave clocks borrow their master's bases.

use alloc::collections::BTreeMap;

use crate::cpu::CpuId;
use crate::queue::{QueueKey, TimerQueue};
use crate::time::TimePoint;
use crate::timer::{Timer, TimerFlags, TimerId};

/// Per-(clock, CPU) timer storage. The owning `spin::Mutex` is the only
/// lock the firing path ever takes.
pub(crate) struct TimerBase {
    pub(crate) cpu: CpuId,
    /// Arena of timer records affine to this CPU, keyed by timer id.
    pub(crate) timers: BTreeMap<TimerId, Timer>,
    /// Pending subset of `timers`, ordered by expiry.
    pub(crate) queue: TimerQueue,
    /// Insertion counter feeding queue-key tie-breaks.
    next_seq: u64,
    /// Cached date of the currently programmed hardware shot;
    /// `TimePoint::MAX` when none is scheduled.
    pub(crate) next_shot: TimePoint,
}

impl TimerBase {
    pub(crate) fn new(cpu: CpuId) -> Self {
        TimerBase {
            cpu,
            timers: BTreeMap::new(),
            queue: TimerQueue::new(),
            next_seq: 0,
            next_shot: TimePoint::MAX,
        }
    }

    /// Link a resident timer into the queue under its current expiry.
    /// The timer must not already be queued.
    pub(crate) fn enqueue(&mut self, id: TimerId) {
        let seq = self.next_seq;
        let Some(timer) = self.timers.get_mut(&id) else {
            log::warn!("{}: enqueue of unknown timer {:?}", self.cpu, id);
            return;
        };
        debug_assert!(timer.queue_key.is_none(), "timer already queued");

        let key = QueueKey {
            expiry: timer.expiry,
            seq,
        };
        timer.queue_key = Some(key);
        timer.flags.insert(TimerFlags::QUEUED);
        self.queue.insert(key, id);
        self.next_seq += 1;
    }

    /// Unlink a timer from the queue, keeping the record resident. A timer
    /// that was not queued is left alone.
    pub(crate) fn dequeue(&mut self, id: TimerId) {
        let Some(timer) = self.timers.get_mut(&id) else {
            log::warn!("{}: dequeue of unknown timer {:?}", self.cpu, id);
            return;
        };
        let Some(key) = timer.queue_key.take() else {
            return;
        };
        timer.flags.remove(TimerFlags::QUEUED);
        self.queue.remove(&key);
    }

    /// Earliest pending entry, if any.
    #[inline]
    pub(crate) fn earliest(&self) -> Option<(QueueKey, TimerId)> {
        self.queue.peek()
    }

    /// The shot date for the earliest entry with its gravity snapshot
    /// subtracted, or `None` for an empty queue.
    pub(crate) fn next_shot_date(&self) -> Option<TimePoint> {
        let (key, id) = self.queue.peek()?;
        let gravity = self
            .timers
            .get(&id)
            .map(|t| t.gravity)
            .unwrap_or_default();
        Some(key.expiry.saturating_sub(gravity))
    }
}
