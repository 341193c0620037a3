//! Shared test doubles: a manually advanced clock source and a scriptable
//! scheduler.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use spin::Mutex;

use crate::cpu::{CpuId, ThreadId};
use crate::platform::{Clocksource, Scheduler, WaitVerdict};
use crate::time::{TimePoint, TimeSpan};

/// A clock source whose time only moves when a test advances it. Records
/// every programmed shot so tests can assert on hardware interaction.
pub(crate) struct TestClock {
    now_ns: AtomicI64,
    shots: Mutex<Vec<(CpuId, TimeSpan)>>,
    stops: Mutex<Vec<CpuId>>,
}

impl TestClock {
    pub(crate) fn new() -> Self {
        TestClock {
            now_ns: AtomicI64::new(0),
            shots: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_ns(&self, ns: i64) {
        self.now_ns.store(ns, Ordering::SeqCst);
    }

    pub(crate) fn advance_ns(&self, ns: i64) {
        self.now_ns.fetch_add(ns, Ordering::SeqCst);
    }

    pub(crate) fn now(&self) -> TimePoint {
        TimePoint::from_ns(self.now_ns.load(Ordering::SeqCst))
    }

    pub(crate) fn last_shot(&self) -> Option<(CpuId, TimeSpan)> {
        self.shots.lock().last().copied()
    }

    pub(crate) fn stop_count(&self) -> usize {
        self.stops.lock().len()
    }
}

impl Clocksource for TestClock {
    fn read_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn read_cycles(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst) as u64
    }

    fn program_shot(&self, cpu: CpuId, delay: TimeSpan) {
        self.shots.lock().push((cpu, delay));
    }

    fn stop_shot(&self, cpu: CpuId) {
        self.stops.lock().push(cpu);
    }
}

type BlockHook = Box<dyn FnMut() -> WaitVerdict + Send>;

/// A scheduler stub pinned to a configurable "current" CPU. Blocking runs a
/// test-installed hook, letting sleep tests drive the clock and dispatch
/// from inside the wait.
pub(crate) struct StubScheduler {
    current: AtomicU32,
    rt: AtomicU32,
    woken: Mutex<Vec<ThreadId>>,
    on_block: Mutex<Option<BlockHook>>,
}

impl StubScheduler {
    pub(crate) fn new() -> Self {
        StubScheduler {
            current: AtomicU32::new(0),
            rt: AtomicU32::new(0),
            woken: Mutex::new(Vec::new()),
            on_block: Mutex::new(None),
        }
    }

    pub(crate) fn on_block(&self, hook: BlockHook) {
        *self.on_block.lock() = Some(hook);
    }

    pub(crate) fn woken(&self) -> Vec<ThreadId> {
        self.woken.lock().clone()
    }
}

impl Scheduler for StubScheduler {
    fn current_cpu(&self) -> CpuId {
        CpuId(self.current.load(Ordering::SeqCst))
    }

    fn current_thread(&self) -> ThreadId {
        ThreadId(1)
    }

    fn is_rt_context(&self) -> bool {
        self.rt.load(Ordering::SeqCst) != 0
    }

    fn block_current(&self) -> WaitVerdict {
        let mut hook = self.on_block.lock();
        match hook.as_mut() {
            Some(f) => f(),
            None => WaitVerdict::Woken,
        }
    }

    fn wake(&self, thread: ThreadId) {
        self.woken.lock().push(thread);
    }
}
