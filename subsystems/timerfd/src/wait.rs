//! # Timerfd Wait Queue
//!
//! Sleeping-reader tracking for one timerfd:
//! - FIFO wakeup order
//! - Interrupt removal for signalled waiters
//! - Wakeup statistics

use alloc::vec::Vec;

use kairos_core::ThreadId;

/// Waiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Parked on the queue.
    Waiting,
    /// Selected by a wakeup; about to resume.
    WokenUp,
}

/// One sleeping reader.
#[derive(Debug, Clone, Copy)]
pub struct WaitEntry {
    /// The blocked thread.
    pub thread: ThreadId,
    /// Current state.
    pub state: WaitState,
}

/// FIFO wait queue for blocked `read()` callers.
#[derive(Debug, Default)]
pub struct WaitQueue {
    waiters: Vec<WaitEntry>,
    total_wakeups: u64,
}

impl WaitQueue {
    /// An empty queue.
    pub fn new() -> Self {
        WaitQueue {
            waiters: Vec::new(),
            total_wakeups: 0,
        }
    }

    /// `true` if no reader is parked.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.waiters.iter().all(|w| w.state != WaitState::Waiting)
    }

    /// Number of parked readers.
    #[inline(always)]
    pub fn waiting_count(&self) -> usize {
        self.waiters
            .iter()
            .filter(|w| w.state == WaitState::Waiting)
            .count()
    }

    /// Park a reader at the tail.
    pub fn enqueue(&mut self, thread: ThreadId) {
        self.waiters.push(WaitEntry {
            thread,
            state: WaitState::Waiting,
        });
    }

    /// Wake every parked reader, returning the threads to hand to the
    /// scheduler. The caller performs the actual wakeups after releasing
    /// its own lock.
    pub fn wake_all(&mut self) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for waiter in &mut self.waiters {
            if waiter.state != WaitState::Waiting {
                continue;
            }
            waiter.state = WaitState::WokenUp;
            self.total_wakeups += 1;
            woken.push(waiter.thread);
        }
        self.waiters.retain(|w| w.state == WaitState::Waiting);
        woken
    }

    /// Remove one waiter after a signal interrupted its wait.
    pub fn remove_waiter(&mut self, thread: ThreadId) -> bool {
        if let Some(pos) = self.waiters.iter().position(|w| w.thread == thread) {
            self.waiters.remove(pos);
            true
        } else {
            false
        }
    }

    /// Lifetime wakeup count.
    #[inline(always)]
    pub fn total_wakeups(&self) -> u64 {
        self.total_wakeups
    }
}
