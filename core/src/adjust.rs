//! # Clock Adjustment
//!
//! Stepping a slave clock's epoch moves its timeline without moving its
//! master's. Every outstanding timer armed against the stepped clock keeps
//! its absolute date in that clock's timeline, so its master-time expiry
//! must shift by the opposite of the step. The sweep visits each online
//! CPU's base in turn, under that base's lock only, and is never run from
//! the dispatch path.

use alloc::vec::Vec;

use crate::clock::{ClockId, ClockSource, TimerCore};
use crate::error::{TimeError, TimeResult};
use crate::time::{TimePoint, TimeSpan};
use crate::timer::TimerId;

impl TimerCore {
    /// Set a slave clock's current reading to `date`, retuning its offset
    /// and reprojecting every timer armed against it. Master clocks have no
    /// externally steppable epoch and report `NotSupported`.
    pub fn set_time(&self, clock: ClockId, date: TimePoint) -> TimeResult<()> {
        let delta = {
            let current = {
                self.with_clock(clock, |c| match &c.source {
                    ClockSource::WallClock { .. } => Ok(()),
                    _ => Err(TimeError::NotSupported),
                })??;
                self.read(clock)?
            };
            let delta = date - current;
            if delta.is_zero() {
                return Ok(());
            }
            self.with_clock_mut(clock, |c| c.offset = c.offset + delta)?;
            delta
        };

        log::debug!("clock {:?} stepped by {}", clock, delta);
        self.step_clock(clock, delta)
    }

    /// Reproject every queued timer bound to `clock` after its timeline
    /// moved forward by `delta`. Expiries shift by `-delta` so absolute
    /// dates keep their meaning; a periodic timer left lagging (or
    /// over-deferred) by the shift is realigned by whole periods instead of
    /// replaying each missed tick through its handler.
    pub(crate) fn step_clock(&self, clock: ClockId, delta: TimeSpan) -> TimeResult<()> {
        let view = self.master_view(clock)?;

        for cpu in self.online_cpus().iter() {
            let mut base = view.base(cpu).lock();
            let now = view.now();

            let touched: Vec<TimerId> = base
                .queue
                .iter()
                .map(|(_, id)| id)
                .filter(|id| {
                    base.timers
                        .get(id)
                        .map_or(false, |t| t.clock == clock)
                })
                .collect();

            for id in touched {
                // Date changes invalidate the queue key; remove, repair,
                // reinsert.
                base.dequeue(id);
                if let Some(timer) = base.timers.get_mut(&id) {
                    timer.expiry -= delta;
                    if timer.is_periodic() {
                        timer.start_date -= delta;
                        timer.realign(now);
                    }
                }
                base.enqueue(id);
            }
            self.reprogram(&view, &mut base);
        }
        Ok(())
    }
}
