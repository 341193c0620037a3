//! # Platform Collaborators
//!
//! Seams to everything the timer core consumes but does not implement:
//! the hardware time source with its shot-programming hooks, and the
//! run-queue/scheduler abstraction supplying per-CPU context and
//! thread-blocking primitives. Hard-interrupt masking is modelled by the
//! non-preemptible base locks and has no separate surface here.

use crate::cpu::{CpuId, ThreadId};
use crate::time::TimeSpan;

/// A hardware time source backing a master clock.
///
/// `read_ns` is the hot-path read and must be callable from interrupt
/// context. The shot hooks program the per-CPU event hardware; the remote
/// variant defaults to the local one for devices that can target any CPU
/// from anywhere.
pub trait Clocksource: Send + Sync {
    /// Current time in nanoseconds since the source's epoch.
    fn read_ns(&self) -> i64;

    /// Current time in raw hardware cycles.
    fn read_cycles(&self) -> u64 {
        self.read_ns() as u64
    }

    /// Program the next shot on `cpu`, firing after `delay`.
    fn program_shot(&self, cpu: CpuId, delay: TimeSpan);

    /// Program a shot on a CPU other than the calling one.
    fn program_remote_shot(&self, cpu: CpuId, delay: TimeSpan) {
        self.program_shot(cpu, delay);
    }

    /// Disable event scheduling on `cpu` (empty queue).
    fn stop_shot(&self, cpu: CpuId);
}

/// Outcome of a blocking wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitVerdict {
    /// A waker ran; re-check the condition.
    Woken,
    /// A pending cancellation signal arrived; the caller surfaces
    /// `TimeError::Interrupted` with any resumable deadline preserved.
    Interrupted,
}

/// The run-queue/scheduler abstraction, consumed as given.
pub trait Scheduler: Send + Sync {
    /// The processor the caller is running on.
    fn current_cpu(&self) -> CpuId;

    /// The calling thread.
    fn current_thread(&self) -> ThreadId;

    /// Whether the caller runs in a real-time (out-of-band) context.
    fn is_rt_context(&self) -> bool {
        false
    }

    /// Block the calling thread until woken or interrupted. The caller
    /// re-checks its wait condition on `Woken`; spurious wakeups are
    /// allowed.
    fn block_current(&self) -> WaitVerdict;

    /// Make `thread` runnable again.
    fn wake(&self, thread: ThreadId);
}
