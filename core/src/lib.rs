//! # Kairos Core
//!
//! Clock and timer infrastructure for dual-context (real-time + general
//! purpose) kernels: named clocks over per-CPU ordered timer queues, an
//! interrupt-priority tick dispatcher, epoch stepping with whole-period
//! catch-up, and gravity-based latency compensation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        TimerCore                          │
//! │  clock registry (fixed arena, refcounted)                 │
//! ├──────────────┬──────────────┬─────────────────────────────┤
//! │  Clock #0    │  Clock #1    │      per (clock, CPU):      │
//! │  (master)    │  (slave)     │  TimerBase = queue + lock   │
//! ├──────────────┴──────────────┴─────────────────────────────┤
//! │  tick dispatch   │  epoch adjust   │  blocking sleep      │
//! └──────────────────┴─────────────────┴──────────────────────┘
//! ```
//!
//! Masters read hardware through a [`Clocksource`]; slaves report a fixed
//! offset view of a master and share its timer storage. The dispatch path
//! takes exactly one per-CPU lock; registration and teardown go through a
//! coarse registry lock the hot path never touches.
//!
//! The crate is `no_std` + `alloc`; the embedding kernel supplies hardware
//! and scheduling through the [`Clocksource`] and [`Scheduler`] traits.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

mod adjust;
mod base;
mod clock;
mod cpu;
mod dispatch;
mod error;
mod gravity;
mod platform;
mod queue;
mod sleep;
mod time;
mod timer;

#[cfg(test)]
mod testkit;

pub use clock::{ClockId, ClockSource, TimerCore, MAX_CLOCKS};
pub use cpu::{CpuId, CpuSet, ThreadId, MAX_CPUS};
pub use dispatch::{DispatchOutcome, TickContext};
pub use error::{TimeError, TimeResult};
pub use gravity::{Gravity, DEFAULT_GRAVITY};
pub use platform::{Clocksource, Scheduler, WaitVerdict};
pub use sleep::{Deadline, SleepToken};
pub use time::{TimePoint, TimeSpan};
pub use timer::{TimerEvent, TimerFlags, TimerHandle, TimerHandler, TimerId, WakeContext};

static_assertions::assert_impl_all!(TimePoint: Send, Sync, Copy);
static_assertions::assert_impl_all!(TimerHandle: Send, Sync, Copy);
static_assertions::assert_impl_all!(TimerCore: Send, Sync);
