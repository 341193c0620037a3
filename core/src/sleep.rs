//! # Blocking Sleep
//!
//! A thin blocking facade over a one-shot timer: arm, block, free. An
//! interrupted wait stashes its absolute deadline in the caller-owned
//! [`SleepToken`]; retrying the call consumes the stash instead of
//! recomputing from a relative span, so a signal cannot stretch the total
//! wait.

use alloc::boxed::Box;

use crate::clock::{ClockId, TimerCore};
use crate::error::{TimeError, TimeResult};
use crate::platform::WaitVerdict;
use crate::time::{TimePoint, TimeSpan};
use crate::timer::WakeContext;

/// When a sleep ends, in the chosen clock's timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Wake when the clock reads at least this date.
    Absolute(TimePoint),
    /// Wake this far from the clock's reading at call time.
    Relative(TimeSpan),
}

/// Caller-owned resumption state for one blocking wait. Holds the absolute
/// deadline of an interrupted attempt until the retry consumes it.
#[derive(Debug, Default)]
pub struct SleepToken {
    pending: Option<TimePoint>,
}

impl SleepToken {
    /// A token with no interrupted wait to resume.
    pub fn new() -> Self {
        SleepToken { pending: None }
    }

    /// True between an `Interrupted` return and the retry that resumes it.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl TimerCore {
    /// Block the calling thread until `clock` reaches `deadline`.
    ///
    /// Returns `Interrupted` if the wait was broken by a signal; the
    /// absolute deadline is then parked in `token`, and calling again with
    /// the same token resumes the original wait regardless of the deadline
    /// argument passed to the retry.
    pub fn sleep(
        &self,
        clock: ClockId,
        deadline: Deadline,
        token: &mut SleepToken,
    ) -> TimeResult<()> {
        let date = match token.pending.take() {
            Some(date) => date,
            None => match deadline {
                Deadline::Absolute(date) => date,
                Deadline::Relative(span) => {
                    if span.is_negative() {
                        return Err(TimeError::InvalidArgument);
                    }
                    self.read(clock)? + span
                }
            },
        };

        let waker = self.scheduler().clone();
        let thread = waker.current_thread();
        let timer = self.new_timer(
            clock,
            WakeContext::Kernel,
            Some(Box::new(move |_| waker.wake(thread))),
        )?;

        let outcome = loop {
            match self.read(clock) {
                Err(e) => break Err(e),
                Ok(now) if now >= date => break Ok(()),
                Ok(_) => {}
            }
            if let Err(e) = self.start_timer(timer, date, TimeSpan::ZERO) {
                break Err(e);
            }
            match self.scheduler().block_current() {
                WaitVerdict::Woken => continue,
                WaitVerdict::Interrupted => {
                    token.pending = Some(date);
                    break Err(TimeError::Interrupted);
                }
            }
        };

        let _ = self.free_timer(timer);
        outcome
    }
}
