//! # Timerfd Objects
//!
//! A [`TimerFd`] exposes one timer as an independently armable, readable,
//! pollable object for callers living outside the dispatch path. Expiry
//! events accumulate in the timer's tick counter; `read()` consumes the
//! delta since the previous read, blocking readers park on a per-fd wait
//! queue and are woken from the timer's handler.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};

use bitflags::bitflags;
use spin::Mutex;

use kairos_core::{
    ClockId, TimeError, TimePoint, TimeResult, TimeSpan, TimerCore, TimerHandle, WaitVerdict,
    WakeContext,
};

use crate::wait::WaitQueue;

bitflags! {
    /// Readiness bits reported by [`TimerFd::poll`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PollEvents: u32 {
        /// An unread expiry event is pending.
        const READABLE = 1 << 0;
        /// The fd was closed; pending and future calls fail.
        const ERROR = 1 << 1;
    }
}

bitflags! {
    /// Flags accepted by [`TimerFd::set`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SetFlags: u32 {
        /// Interpret the value as an absolute date on the fd's clock
        /// instead of a span from now.
        const ABSTIME = 1 << 0;
    }
}

/// An arming specification: first expiry plus optional period, mirroring
/// the classic itimerspec shape. A zero `value` disarms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ItimerSpec {
    /// Time to first expiry: relative by default, absolute with
    /// [`SetFlags::ABSTIME`]. On `get`, the remaining time (zero if
    /// unarmed).
    pub value: TimeSpan,
    /// Firing period; zero for one-shot.
    pub interval: TimeSpan,
}

impl ItimerSpec {
    /// `true` if this spec disarms rather than arms.
    #[inline(always)]
    pub fn is_disarm(&self) -> bool {
        self.value.is_zero()
    }
}

struct FdState {
    timer: Option<TimerHandle>,
    /// Tick count already consumed by `read()`.
    last_read_ticks: u64,
    events: PollEvents,
    waiters: WaitQueue,
    closed: bool,
}

struct FdInner {
    core: Arc<TimerCore>,
    clock: ClockId,
    state: Mutex<FdState>,
}

impl Drop for FdInner {
    fn drop(&mut self) {
        // Last handle gone without an explicit close.
        if let Some(timer) = self.state.lock().timer.take() {
            let _ = self.core.free_timer(timer);
        }
    }
}

/// A timerfd handle. Clones share the same underlying fd.
#[derive(Clone)]
pub struct TimerFd {
    inner: Arc<FdInner>,
}

impl TimerFd {
    /// Create an unarmed timerfd bound to `clock`. Holds a counted clock
    /// reference (through its timer) until closed or dropped.
    pub fn new(core: Arc<TimerCore>, clock: ClockId) -> TimeResult<TimerFd> {
        let inner = Arc::new(FdInner {
            core: core.clone(),
            clock,
            state: Mutex::new(FdState {
                timer: None,
                last_read_ticks: 0,
                events: PollEvents::empty(),
                waiters: WaitQueue::new(),
                closed: false,
            }),
        });

        // The handler only holds a weak reference: the timer record must
        // not keep the fd alive.
        let weak = Arc::downgrade(&inner);
        let sched = core.scheduler().clone();
        let timer = core.new_timer(
            clock,
            WakeContext::User,
            Some(Box::new(move |_| {
                if let Some(inner) = weak.upgrade() {
                    let woken = {
                        let mut state = inner.state.lock();
                        state.events.insert(PollEvents::READABLE);
                        state.waiters.wake_all()
                    };
                    for thread in woken {
                        sched.wake(thread);
                    }
                }
            })),
        )?;

        inner.state.lock().timer = Some(timer);
        Ok(TimerFd { inner })
    }

    /// The clock this fd is bound to.
    #[inline(always)]
    pub fn clock(&self) -> ClockId {
        self.inner.clock
    }

    /// Re-arm (or disarm) the fd's timer, atomically replacing the current
    /// arming. Returns the previous `{remaining, interval}` pair when
    /// `want_old` is set.
    ///
    /// A real-time caller gets the timer pinned to its current CPU, so
    /// subsequent firings stay local to the consumer.
    pub fn set(
        &self,
        spec: ItimerSpec,
        flags: SetFlags,
        want_old: bool,
    ) -> TimeResult<Option<ItimerSpec>> {
        if spec.value.is_negative() || spec.interval.is_negative() {
            return Err(TimeError::InvalidArgument);
        }

        let core = &self.inner.core;
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TimeError::Closed);
        }
        let timer = state.timer.ok_or(TimeError::Closed)?;

        let old = if want_old {
            let (interval, remaining) = core.timer_value(timer)?;
            Some(ItimerSpec {
                value: remaining,
                interval,
            })
        } else {
            None
        };

        core.stop_timer(timer)?;

        let sched = core.scheduler();
        if sched.is_rt_context() {
            core.migrate_timer(timer, sched.current_cpu())?;
        }

        state.last_read_ticks = 0;
        state.events.remove(PollEvents::READABLE);

        if spec.is_disarm() {
            return Ok(old);
        }

        let date = if flags.contains(SetFlags::ABSTIME) {
            TimePoint::from_ns(spec.value.as_ns())
        } else {
            core.read(self.inner.clock)? + spec.value
        };
        core.start_timer(timer, date, spec.interval)?;
        Ok(old)
    }

    /// Current `{remaining, interval}` pair; remaining is zero while
    /// unarmed.
    pub fn get(&self) -> TimeResult<ItimerSpec> {
        let state = self.inner.state.lock();
        if state.closed {
            return Err(TimeError::Closed);
        }
        let timer = state.timer.ok_or(TimeError::Closed)?;
        let (interval, remaining) = self.inner.core.timer_value(timer)?;
        Ok(ItimerSpec {
            value: remaining,
            interval,
        })
    }

    /// Consume the expiry events accumulated since the previous read,
    /// writing the count (`1 + overruns`) into `buf` as a little-endian
    /// `u64`.
    ///
    /// With nothing pending, blocks until a firing (or returns
    /// `WouldBlock` when `blocking` is false). A signal breaking the wait
    /// surfaces as `Interrupted`; closing the fd wakes readers with
    /// `Closed`.
    pub fn read(&self, buf: &mut [u8], blocking: bool) -> TimeResult<usize> {
        if buf.len() < 8 {
            return Err(TimeError::BufferTooSmall);
        }

        let sched = self.inner.core.scheduler().clone();
        loop {
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(TimeError::Closed);
                }
                let timer = state.timer.ok_or(TimeError::Closed)?;

                let total = self.inner.core.timer_ticks(timer)?;
                if total > state.last_read_ticks {
                    let ticks = total - state.last_read_ticks;
                    state.last_read_ticks = total;
                    state.events.remove(PollEvents::READABLE);
                    buf[..8].copy_from_slice(&ticks.to_le_bytes());
                    return Ok(8);
                }

                if !blocking {
                    return Err(TimeError::WouldBlock);
                }
                state.waiters.enqueue(sched.current_thread());
            }

            match sched.block_current() {
                WaitVerdict::Woken => continue,
                WaitVerdict::Interrupted => {
                    self.inner
                        .state
                        .lock()
                        .waiters
                        .remove_waiter(sched.current_thread());
                    return Err(TimeError::Interrupted);
                }
            }
        }
    }

    /// Readiness query: readable exactly while an unread expiry event is
    /// pending.
    pub fn poll(&self) -> PollEvents {
        let state = self.inner.state.lock();
        if state.closed {
            return PollEvents::ERROR;
        }
        let pending = state
            .timer
            .and_then(|t| self.inner.core.timer_ticks(t).ok())
            .map_or(false, |total| total > state.last_read_ticks);
        if pending {
            PollEvents::READABLE
        } else {
            PollEvents::empty()
        }
    }

    /// Close the fd: stops and frees the timer (releasing the clock
    /// reference) and wakes every parked reader with an error status.
    pub fn close(&self) -> TimeResult<()> {
        let (timer, woken) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TimeError::Closed);
            }
            state.closed = true;
            state.events = PollEvents::ERROR;
            (state.timer.take(), state.waiters.wake_all())
        };

        let sched = self.inner.core.scheduler();
        for thread in woken {
            sched.wake(thread);
        }
        if let Some(timer) = timer {
            self.inner.core.free_timer(timer)?;
        }
        log::debug!("timerfd on {:?} closed", self.inner.clock);
        Ok(())
    }
}
