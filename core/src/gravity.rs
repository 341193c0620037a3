//! # Gravity - Latency Compensation
//!
//! Every clock carries three duration thresholds estimating how long it
//! takes a reprogrammed shot to actually land, depending on the criticality
//! of the woken context: an interrupt handler, a kernel thread, or a user
//! thread. The arming logic subtracts the applicable threshold from the
//! requested expiry so the timer still fires no later than requested once
//! reprogramming overhead is accounted for.
//!
//! The textual setter accepts EVL-style suffix tokens, e.g. `"2000i 500k
//! 1000u"`. A malformed token rejects the whole update and leaves the prior
//! values untouched.

use crate::error::{TimeError, TimeResult};
use crate::time::TimeSpan;
use crate::timer::WakeContext;

/// Platform baseline applied when a component was never tuned.
pub const DEFAULT_GRAVITY: TimeSpan = TimeSpan::from_micros(2);

/// Per-clock latency-compensation thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gravity {
    /// Compensation for timers firing into an interrupt handler.
    pub irq: TimeSpan,
    /// Compensation for timers waking a kernel thread.
    pub kernel: TimeSpan,
    /// Compensation for timers waking a user thread.
    pub user: TimeSpan,
}

impl Default for Gravity {
    fn default() -> Self {
        Gravity {
            irq: TimeSpan::ZERO,
            kernel: DEFAULT_GRAVITY,
            user: DEFAULT_GRAVITY,
        }
    }
}

impl Gravity {
    /// All-zero gravity, for clocks (and tests) that want raw dates.
    pub const ZERO: Gravity = Gravity {
        irq: TimeSpan::ZERO,
        kernel: TimeSpan::ZERO,
        user: TimeSpan::ZERO,
    };

    /// The threshold applicable to a timer waking `ctx`.
    #[inline]
    pub fn applicable(&self, ctx: WakeContext) -> TimeSpan {
        match ctx {
            WakeContext::Irq => self.irq,
            WakeContext::Kernel => self.kernel,
            WakeContext::User => self.user,
        }
    }

    /// Parse a token list and update `self` atomically: either every token
    /// parses and all mentioned components are updated, or nothing changes.
    ///
    /// Token grammar: `<nanoseconds><i|k|u>`, whitespace separated.
    pub fn parse_update(&mut self, input: &str) -> TimeResult<()> {
        let mut staged = *self;

        for token in input.split_whitespace() {
            let (digits, suffix) = token.split_at(token.len().saturating_sub(1));
            let ns: i64 = digits.parse().map_err(|_| TimeError::InvalidValue)?;
            if ns < 0 {
                return Err(TimeError::InvalidValue);
            }
            match suffix {
                "i" => staged.irq = TimeSpan::from_ns(ns),
                "k" => staged.kernel = TimeSpan::from_ns(ns),
                "u" => staged.user = TimeSpan::from_ns(ns),
                _ => return Err(TimeError::InvalidValue),
            }
        }

        *self = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_falls_back_to_baseline() {
        let g = Gravity::default();
        assert_eq!(g.irq, TimeSpan::ZERO);
        assert_eq!(g.kernel, DEFAULT_GRAVITY);
        assert_eq!(g.user, DEFAULT_GRAVITY);
    }

    #[test]
    fn test_parse_updates_components() {
        let mut g = Gravity::ZERO;
        g.parse_update("2000i 500k 1000u").unwrap();
        assert_eq!(g.irq, TimeSpan::from_ns(2000));
        assert_eq!(g.kernel, TimeSpan::from_ns(500));
        assert_eq!(g.user, TimeSpan::from_ns(1000));
    }

    #[test]
    fn test_partial_update_keeps_others() {
        let mut g = Gravity::ZERO;
        g.parse_update("750u").unwrap();
        assert_eq!(g.irq, TimeSpan::ZERO);
        assert_eq!(g.user, TimeSpan::from_ns(750));
    }

    #[test]
    fn test_malformed_token_leaves_prior_untouched() {
        let mut g = Gravity::ZERO;
        g.parse_update("100i").unwrap();

        assert_eq!(g.parse_update("200k banana"), Err(TimeError::InvalidValue));
        assert_eq!(g.irq, TimeSpan::from_ns(100));
        assert_eq!(g.kernel, TimeSpan::ZERO);

        assert_eq!(g.parse_update("-5i"), Err(TimeError::InvalidValue));
        assert_eq!(g.parse_update(""), Ok(()));
    }

    #[test]
    fn test_applicable_selects_component() {
        let g = Gravity {
            irq: TimeSpan::from_ns(1),
            kernel: TimeSpan::from_ns(2),
            user: TimeSpan::from_ns(3),
        };
        assert_eq!(g.applicable(WakeContext::Irq), TimeSpan::from_ns(1));
        assert_eq!(g.applicable(WakeContext::Kernel), TimeSpan::from_ns(2));
        assert_eq!(g.applicable(WakeContext::User), TimeSpan::from_ns(3));
    }
}
