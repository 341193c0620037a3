//! Error types and result handling for the timer core.
//!
//! Validation failures are synchronous error returns at the API boundary.
//! Structural-invariant violations (a base left non-empty at clock teardown,
//! removing a timer that is not a queue member) are caller bugs and are
//! reported with `log::warn!` instead of being propagated, so the dispatch
//! path never carries recoverable-error plumbing.

use core::fmt;

/// Result type alias for timer-core operations.
pub type TimeResult<T> = Result<T, TimeError>;

/// Error conditions surfaced by the clock and timer APIs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum TimeError {
    /// Invalid argument (bad affinity, negative interval, ...)
    InvalidArgument = 1,

    /// Malformed textual input (unparsable gravity token)
    InvalidValue = 2,

    /// Operation not supported by this clock (e.g. set-time without a hook)
    NotSupported = 3,

    /// Non-blocking operation found nothing pending
    WouldBlock = 4,

    /// Blocking wait interrupted; the pending deadline is preserved and the
    /// call may be retried toward the same instant
    Interrupted = 5,

    /// Caller-supplied buffer too small
    BufferTooSmall = 6,

    /// No such clock, or the clock slot was released
    NoSuchClock = 7,

    /// No such timer, or the timer was freed
    NoSuchTimer = 8,

    /// Out of registry slots or memory
    NoMemory = 9,

    /// Target object was shut down while waiters were pending
    Closed = 10,
}

impl TimeError {
    /// Short lowercase mnemonic, stable for log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeError::InvalidArgument => "invalid-argument",
            TimeError::InvalidValue => "invalid-value",
            TimeError::NotSupported => "not-supported",
            TimeError::WouldBlock => "would-block",
            TimeError::Interrupted => "interrupted",
            TimeError::BufferTooSmall => "buffer-too-small",
            TimeError::NoSuchClock => "no-such-clock",
            TimeError::NoSuchTimer => "no-such-timer",
            TimeError::NoMemory => "no-memory",
            TimeError::Closed => "closed",
        }
    }
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
