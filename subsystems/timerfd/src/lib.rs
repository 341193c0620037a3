//! # Kairos Timerfd
//!
//! The timerfd-style consumer surface over [`kairos-core`](kairos_core):
//! binds one timer to a wait queue and a pollable readiness object, giving
//! callers outside the dispatch path a blocking/non-blocking `read()` that
//! consumes expiry counts and a `poll()` readiness query.
//!
//! ```text
//!  consumer thread            timer core (irq context)
//!  ───────────────            ────────────────────────
//!  fd.set(...)  ─────────────► arm timer on clock
//!  fd.read(blocking) ── park ─┐
//!                             │   tick: timer fires,
//!                             │   handler marks READABLE,
//!  ◄── wake ──────────────────┘   wakes parked readers
//!  read returns 1 + overruns
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

mod fd;
mod wait;

pub use fd::{ItimerSpec, PollEvents, SetFlags, TimerFd};
pub use wait::{WaitEntry, WaitQueue, WaitState};
