//! # Timer Objects
//!
//! A [`Timer`] is a single alarm bound to a clock: one-shot or periodic,
//! affine to one processor, firing a handler from the dispatch path.
//!
//! ## State machine
//!
//! ```text
//! UNARMED ──start──► QUEUED ──expire──► FIRED ──┬─periodic─► QUEUED
//!    ▲                  │                       └─one-shot─► UNARMED
//!    └──────stop────────┘     freeing destroys the record from any state
//! ```
//!
//! Timers armed on a slave clock store their dates in the backing master's
//! timeline, so every queue keeps a single uniform ordering key.

use alloc::boxed::Box;

use bitflags::bitflags;

use crate::clock::ClockId;
use crate::cpu::CpuId;
use crate::queue::QueueKey;
use crate::time::{TimePoint, TimeSpan};

/// Unique timer identifier, allocated monotonically and stable across
/// CPU migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Opaque handle to a timer: the owning clock plus the timer id. Holding a
/// handle never keeps the timer alive; a freed timer turns the handle stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    /// The clock this timer is armed against.
    pub clock: ClockId,
    /// Registry-unique timer id.
    pub timer: TimerId,
}

bitflags! {
    /// Timer status flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TimerFlags: u32 {
        /// Linked into a base's ordered queue. Always mirrors actual
        /// membership (`queue_key.is_some()`).
        const QUEUED = 1 << 0;
        /// Armed: `start` was called and no `stop` since.
        const RUNNING = 1 << 1;
        /// Fired at least once since it was last armed.
        const FIRED = 1 << 2;
        /// Re-arms itself every `interval`.
        const PERIODIC = 1 << 3;
        /// Reserved sentinel that propagates the tick to the general-purpose
        /// context. Its handler is never invoked inline by the dispatcher.
        const TICK_PROXY = 1 << 4;
    }
}

/// The context a timer wakes when it fires; selects which gravity component
/// is subtracted when programming the hardware shot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WakeContext {
    /// Fires into an interrupt handler.
    #[default]
    Irq,
    /// Wakes a kernel thread.
    Kernel,
    /// Wakes a user thread (timerfd consumers).
    User,
}

/// Snapshot passed to a timer handler for one firing.
#[derive(Clone, Copy, Debug)]
pub struct TimerEvent {
    /// The timer that fired.
    pub handle: TimerHandle,
    /// The expiry date that triggered this firing (master timeline).
    pub expiry: TimePoint,
    /// Processor the dispatch pass ran on.
    pub cpu: CpuId,
}

/// Handler invoked from the dispatch path. Runs with the base lock released,
/// so it may start, stop, or migrate arbitrary timers, including its own.
pub type TimerHandler = Box<dyn FnMut(&TimerEvent) + Send>;

/// A single alarm record. Lives in the per-(clock, CPU) base arena; the base
/// lock protects every field.
pub(crate) struct Timer {
    /// The clock this timer was armed against (may be a slave of the clock
    /// whose base holds it).
    pub(crate) clock: ClockId,
    /// Next expiry, in the backing master's timeline.
    pub(crate) expiry: TimePoint,
    /// Firing period; `ZERO` for one-shot timers. Always positive while a
    /// periodic timer is armed.
    pub(crate) interval: TimeSpan,
    /// First expiry of the current arming, in master time. For a periodic
    /// timer, `expiry == start_date + periodic_ticks * interval` at all
    /// times.
    pub(crate) start_date: TimePoint,
    pub(crate) flags: TimerFlags,
    /// Elapsed-interval counter since arming; doubles as the overrun
    /// accumulator when expiries are skipped.
    pub(crate) periodic_ticks: u64,
    pub(crate) wake: WakeContext,
    /// Owning processor; the timer is only ever queued on this CPU's base.
    pub(crate) cpu: CpuId,
    /// Current queue membership; `None` while unqueued.
    pub(crate) queue_key: Option<QueueKey>,
    /// Handler slot. Taken out for the duration of an invocation so the base
    /// lock can be dropped around the call.
    pub(crate) handler: Option<TimerHandler>,
    /// Gravity compensation snapshot taken at arming.
    pub(crate) gravity: TimeSpan,
    /// Number of handler invocations since arming.
    pub(crate) fired_count: u64,
}

impl Timer {
    pub(crate) fn new(
        clock: ClockId,
        cpu: CpuId,
        wake: WakeContext,
        handler: Option<TimerHandler>,
    ) -> Self {
        Timer {
            clock,
            expiry: TimePoint::ZERO,
            interval: TimeSpan::ZERO,
            start_date: TimePoint::ZERO,
            flags: TimerFlags::empty(),
            periodic_ticks: 0,
            wake,
            cpu,
            queue_key: None,
            handler,
            gravity: TimeSpan::ZERO,
            fired_count: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn is_queued(&self) -> bool {
        self.queue_key.is_some()
    }

    #[inline(always)]
    pub(crate) fn is_periodic(&self) -> bool {
        self.flags.contains(TimerFlags::PERIODIC)
    }

    #[inline(always)]
    pub(crate) fn is_running(&self) -> bool {
        self.flags.contains(TimerFlags::RUNNING)
    }

    /// Advance a periodic timer past `now`: the new expiry is the first
    /// `start_date + k*interval` strictly greater than `now`. Returns the
    /// number of whole periods skipped; the overrun count for one firing is
    /// that number minus one. Idempotent catch-up: no drift, the phase is
    /// preserved.
    pub(crate) fn forward(&mut self, now: TimePoint) -> u64 {
        debug_assert!(self.interval.is_positive());
        if self.expiry > now {
            return 0;
        }

        let per = self.interval.as_ns();
        let lag = now.as_ns() - self.expiry.as_ns();
        let k = lag / per + 1;

        self.expiry = self.expiry.saturating_add(self.interval.saturating_mul(k));
        self.periodic_ticks += k as u64;
        k as u64
    }

    /// Pull an already-fired periodic timer back toward `now` after a
    /// backward step deferred it by more than one full period. The new
    /// expiry is again the first period multiple strictly after `now`;
    /// un-elapsed periods are subtracted from `periodic_ticks`.
    pub(crate) fn pull_back(&mut self, now: TimePoint) {
        debug_assert!(self.interval.is_positive());
        if !self.flags.contains(TimerFlags::FIRED) || self.periodic_ticks == 0 {
            return;
        }

        let per = self.interval.as_ns();
        let ahead = self.expiry.as_ns() - now.as_ns();
        if ahead <= per {
            return;
        }

        let k = ((ahead - 1) / per).min(self.periodic_ticks as i64);
        self.expiry = self.expiry.saturating_sub(self.interval.saturating_mul(k));
        self.periodic_ticks -= k as u64;
    }

    /// Advance past a firing that was just serviced. Gravity lets the shot
    /// land before the nominal expiry; forwarding from the serviced expiry
    /// itself still moves one whole period ahead, while a starved service
    /// batches from `now` as usual.
    pub(crate) fn forward_fired(&mut self, now: TimePoint) -> u64 {
        let from = if now < self.expiry { self.expiry } else { now };
        self.forward(from)
    }

    /// Re-align after the owning clock was stepped: forward when lagging,
    /// pull back when over-deferred. Shares one boundary rule so the two
    /// directions cannot drift apart by one period.
    pub(crate) fn realign(&mut self, now: TimePoint) -> u64 {
        if self.expiry <= now {
            self.forward(now)
        } else {
            self.pull_back(now);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn periodic(start_ns: i64, per_ns: i64) -> Timer {
        let mut t = Timer::new(ClockId(0), CpuId(0), WakeContext::Irq, None);
        t.flags = TimerFlags::RUNNING | TimerFlags::PERIODIC;
        t.start_date = TimePoint::from_ns(start_ns);
        t.expiry = TimePoint::from_ns(start_ns);
        t.interval = TimeSpan::from_ns(per_ns);
        t
    }

    #[test]
    fn test_forward_single_period() {
        let mut t = periodic(1_000, 1_000);
        let k = t.forward(TimePoint::from_ns(1_000));
        assert_eq!(k, 1);
        assert_eq!(t.expiry.as_ns(), 2_000);
        assert_eq!(t.periodic_ticks, 1);
    }

    #[test]
    fn test_forward_skips_whole_periods() {
        // Starved for 5.5 periods: 5 expiries elapsed, next lands on the
        // first multiple still in the future.
        let mut t = periodic(1_000_000, 1_000_000);
        let k = t.forward(TimePoint::from_ns(5_500_000));
        assert_eq!(k, 5);
        assert_eq!(t.expiry.as_ns(), 6_000_000);
        assert_eq!(t.periodic_ticks, 5);
    }

    #[test]
    fn test_forward_exact_boundary_is_strict() {
        // now == expiry must advance by exactly one period.
        let mut t = periodic(1_000, 500);
        let k = t.forward(TimePoint::from_ns(2_000));
        assert_eq!(k, 3);
        assert_eq!(t.expiry.as_ns(), 2_500);
    }

    #[test]
    fn test_forward_fired_from_early_service() {
        // Serviced at a gravity-early shot date: still one whole period.
        let mut t = periodic(1_000, 1_000);
        let k = t.forward_fired(TimePoint::from_ns(600));
        assert_eq!(k, 1);
        assert_eq!(t.expiry.as_ns(), 2_000);

        // A starved service still batches from `now`.
        let mut t = periodic(1_000, 1_000);
        assert_eq!(t.forward_fired(TimePoint::from_ns(3_500)), 3);
        assert_eq!(t.expiry.as_ns(), 4_000);
    }

    #[test]
    fn test_pull_back_realigns() {
        let mut t = periodic(0, 1_000);
        t.forward(TimePoint::from_ns(3_500)); // ticks = 4, expiry = 4_000
        t.flags.insert(TimerFlags::FIRED);

        // As if the clock stepped back: expiry now far in the future.
        t.expiry += TimeSpan::from_ns(3_000); // 7_000
        t.pull_back(TimePoint::from_ns(3_500));
        assert_eq!(t.expiry.as_ns(), 4_000);
        assert_eq!(t.periodic_ticks, 1);
    }

    #[test]
    fn test_pull_back_ignores_unfired() {
        let mut t = periodic(10_000, 1_000);
        t.pull_back(TimePoint::from_ns(0));
        assert_eq!(t.expiry.as_ns(), 10_000);
    }

    #[test]
    fn test_phase_invariant_holds() {
        let mut t = periodic(500, 300);
        t.forward(TimePoint::from_ns(2_000));
        let expect = t.start_date.as_ns() + t.periodic_ticks as i64 * 300;
        assert_eq!(t.expiry.as_ns(), expect);
    }
}
