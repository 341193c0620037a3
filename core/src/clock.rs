//! # Clocks and the Timer Core
//!
//! A clock is a named time source owning (or borrowing) one timer base per
//! online CPU. The [`TimerCore`] is the registry: a fixed arena of clock
//! slots addressed by [`ClockId`], reference counted, guarded by a coarse
//! lock that only registration and teardown ever take. The dispatch path
//! touches per-clock state only through cheap read guards and the per-base
//! locks.
//!
//! Master clocks read hardware through their [`Clocksource`]; slave clocks
//! report a fixed-offset view of their master's time and share the master's
//! per-CPU storage by reference.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::base::TimerBase;
use crate::cpu::{CpuId, CpuSet};
use crate::error::{TimeError, TimeResult};
use crate::gravity::Gravity;
use crate::platform::{Clocksource, Scheduler};
use crate::time::{TimePoint, TimeSpan};
use crate::timer::{Timer, TimerEvent, TimerFlags, TimerHandle, TimerHandler, TimerId, WakeContext};

/// Number of registry slots. Real deployments carry a handful of clocks
/// (core monotonic, wall clock, a few externals).
pub const MAX_CLOCKS: usize = 8;

/// Stable index of a clock in the registry arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockId(pub u32);

/// The concrete kind of a clock, resolved by direct match on the hot path
/// instead of an indirect call per tick.
pub enum ClockSource {
    /// The core monotonic clock, backed by hardware.
    CoreMonotonic(Arc<dyn Clocksource>),
    /// A wall-clock view of a master: `read = master.read + offset`. The
    /// only kind with a set-time hook, hence the only one a step can reach.
    WallClock { master: ClockId },
    /// An externally registered hardware clock.
    External(Arc<dyn Clocksource>),
}

pub(crate) type BaseVec = Vec<Mutex<TimerBase>>;
pub(crate) type LocationMap = Arc<Mutex<BTreeMap<TimerId, CpuId>>>;

/// One registered clock.
pub(crate) struct Clock {
    pub(crate) name: String,
    pub(crate) resolution: TimeSpan,
    pub(crate) gravity: Gravity,
    pub(crate) source: ClockSource,
    /// Backing master; equals the clock's own id for masters.
    pub(crate) master: ClockId,
    /// `read(self) - read(master)` for slaves, retuned by set-time.
    pub(crate) offset: TimeSpan,
    pub(crate) affinity: CpuSet,
    /// Per-CPU bases. Masters hold the owning reference; slaves hold a
    /// borrowed clone of their master's.
    pub(crate) bases: Option<Arc<BaseVec>>,
    /// Control-path map from timer id to owning CPU. Never touched by
    /// dispatch.
    pub(crate) locations: LocationMap,
    pub(crate) refs: usize,
}

/// Snapshot of the master-side state a dispatch or sweep pass needs:
/// taken under a brief read guard, then used lock-free.
pub(crate) struct MasterView {
    pub(crate) master: ClockId,
    pub(crate) source: Arc<dyn Clocksource>,
    pub(crate) bases: Arc<BaseVec>,
}

impl MasterView {
    #[inline(always)]
    pub(crate) fn now(&self) -> TimePoint {
        TimePoint::from_ns(self.source.read_ns())
    }

    #[inline(always)]
    pub(crate) fn base(&self, cpu: CpuId) -> &Mutex<TimerBase> {
        &self.bases[cpu.0 as usize]
    }
}

// =============================================================================
// TimerCore
// =============================================================================

/// The clock registry plus every per-CPU timer base: the root object of the
/// timer subsystem.
pub struct TimerCore {
    slots: Vec<RwLock<Option<Clock>>>,
    /// Coarse lock serializing register/unregister. Never taken by tick
    /// dispatch.
    registry: Mutex<()>,
    online: CpuSet,
    oob: CpuSet,
    nr_cpus: u32,
    next_timer_id: AtomicU64,
    sched: Arc<dyn Scheduler>,
}

impl TimerCore {
    /// Build a core for `nr_cpus` online processors, of which `oob` are
    /// capable of out-of-band (real-time) dispatch.
    pub fn new(nr_cpus: u32, oob: CpuSet, sched: Arc<dyn Scheduler>) -> Self {
        let nr = nr_cpus.min(crate::cpu::MAX_CPUS).max(1);
        let online = CpuSet::first_n(nr);
        TimerCore {
            slots: (0..MAX_CLOCKS).map(|_| RwLock::new(None)).collect(),
            registry: Mutex::new(()),
            online,
            oob: oob.intersect(online),
            nr_cpus: nr,
            next_timer_id: AtomicU64::new(1),
            sched,
        }
    }

    /// The set of online processors.
    #[inline(always)]
    pub fn online_cpus(&self) -> CpuSet {
        self.online
    }

    /// The processors capable of out-of-band dispatch.
    #[inline(always)]
    pub fn oob_cpus(&self) -> CpuSet {
        self.oob
    }

    /// The scheduler collaborator this core was built with.
    #[inline(always)]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    fn slot(&self, id: ClockId) -> TimeResult<&RwLock<Option<Clock>>> {
        self.slots
            .get(id.0 as usize)
            .ok_or(TimeError::NoSuchClock)
    }

    pub(crate) fn with_clock<R>(
        &self,
        id: ClockId,
        f: impl FnOnce(&Clock) -> R,
    ) -> TimeResult<R> {
        let guard = self.slot(id)?.read();
        let clock = guard.as_ref().ok_or(TimeError::NoSuchClock)?;
        Ok(f(clock))
    }

    pub(crate) fn with_clock_mut<R>(
        &self,
        id: ClockId,
        f: impl FnOnce(&mut Clock) -> R,
    ) -> TimeResult<R> {
        let mut guard = self.slot(id)?.write();
        let clock = guard.as_mut().ok_or(TimeError::NoSuchClock)?;
        Ok(f(clock))
    }

    // =========================================================================
    // Registration and lifecycle
    // =========================================================================

    /// Register a master clock.
    ///
    /// `affinity` must intersect the out-of-band-capable CPU set; an empty
    /// set means "pick one valid CPU deterministically" (the lowest). Any
    /// failure after partial allocation unwinds completely: the registry
    /// never exposes a half-built clock.
    pub fn register(
        &self,
        name: &str,
        source: ClockSource,
        resolution: TimeSpan,
        affinity: CpuSet,
    ) -> TimeResult<ClockId> {
        if matches!(source, ClockSource::WallClock { .. }) {
            return Err(TimeError::InvalidArgument);
        }
        if !resolution.is_positive() {
            return Err(TimeError::InvalidArgument);
        }

        let effective = if affinity.is_empty() {
            CpuSet::single(self.oob.first().ok_or(TimeError::InvalidArgument)?)
        } else {
            let eff = affinity.intersect(self.oob);
            if eff.is_empty() {
                return Err(TimeError::InvalidArgument);
            }
            eff
        };

        // One base per online CPU, each with its own queue and lock.
        let mut bases = Vec::with_capacity(self.nr_cpus as usize);
        for i in 0..self.nr_cpus {
            bases.push(Mutex::new(TimerBase::new(CpuId(i))));
        }

        let _reg = self.registry.lock();
        let idx = self
            .slots
            .iter()
            .position(|s| s.read().is_none())
            .ok_or(TimeError::NoMemory)?;
        let id = ClockId(idx as u32);

        *self.slots[idx].write() = Some(Clock {
            name: String::from(name),
            resolution,
            gravity: Gravity::default(),
            source,
            master: id,
            offset: TimeSpan::ZERO,
            affinity: effective,
            bases: Some(Arc::new(bases)),
            locations: Arc::new(Mutex::new(BTreeMap::new())),
            refs: 1,
        });

        log::debug!("clock '{}' registered as {:?}", name, id);
        Ok(id)
    }

    /// Register a slave clock sharing `master`'s affinity and per-CPU
    /// storage by reference. `seed` is read exactly once to fix the initial
    /// offset: `read(self) - read(master)` at registration time.
    pub fn register_slave(
        &self,
        name: &str,
        master: ClockId,
        seed: &dyn Clocksource,
        resolution: TimeSpan,
    ) -> TimeResult<ClockId> {
        if !resolution.is_positive() {
            return Err(TimeError::InvalidArgument);
        }

        let _reg = self.registry.lock();

        let (bases, affinity, offset) = {
            let mut guard = self.slot(master)?.write();
            let mc = guard.as_mut().ok_or(TimeError::NoSuchClock)?;
            if mc.master != master {
                // Chaining slaves is not a thing; point at the real master.
                return Err(TimeError::InvalidArgument);
            }
            let master_now = match &mc.source {
                ClockSource::CoreMonotonic(s) | ClockSource::External(s) => {
                    TimePoint::from_ns(s.read_ns())
                }
                ClockSource::WallClock { .. } => return Err(TimeError::InvalidArgument),
            };
            let offset = TimePoint::from_ns(seed.read_ns()) - master_now;
            // The slave holds a reference on its master for its lifetime.
            mc.refs += 1;
            (
                mc.bases.clone().ok_or(TimeError::NoSuchClock)?,
                mc.affinity,
                offset,
            )
        };

        let idx = match self.slots.iter().position(|s| s.read().is_none()) {
            Some(idx) => idx,
            None => {
                // Unwind the master reference taken above.
                if let Ok(mut g) = self.slot(master).map(|s| s.write()) {
                    if let Some(mc) = g.as_mut() {
                        mc.refs -= 1;
                    }
                }
                return Err(TimeError::NoMemory);
            }
        };
        let id = ClockId(idx as u32);

        *self.slots[idx].write() = Some(Clock {
            name: String::from(name),
            resolution,
            gravity: Gravity::default(),
            source: ClockSource::WallClock { master },
            master,
            offset,
            affinity,
            bases: Some(bases),
            locations: Arc::new(Mutex::new(BTreeMap::new())),
            refs: 1,
        });

        log::debug!(
            "slave clock '{}' registered as {:?} (master {:?}, offset {})",
            name,
            id,
            master,
            offset
        );
        Ok(id)
    }

    /// Take an additional reference on a clock.
    pub fn clock_get(&self, id: ClockId) -> TimeResult<()> {
        self.with_clock_mut(id, |c| c.refs += 1)
    }

    /// Release one reference; the last release tears the clock down. A
    /// master torn down with non-empty bases is a caller bug, reported
    /// loudly while teardown proceeds.
    pub fn clock_put(&self, id: ClockId) -> TimeResult<()> {
        let put_master = {
            let _reg = self.registry.lock();
            let mut guard = self.slot(id)?.write();
            let clock = guard.as_mut().ok_or(TimeError::NoSuchClock)?;
            clock.refs -= 1;
            if clock.refs > 0 {
                return Ok(());
            }

            let clock = guard.take().ok_or(TimeError::NoSuchClock)?;
            if clock.master == id {
                if let Some(bases) = &clock.bases {
                    for base in bases.iter() {
                        let base = base.lock();
                        if !base.queue.is_empty() || !base.timers.is_empty() {
                            log::warn!(
                                "clock '{}': torn down with {} timers ({} queued) on {}",
                                clock.name,
                                base.timers.len(),
                                base.queue.len(),
                                base.cpu
                            );
                        }
                    }
                }
                None
            } else {
                Some(clock.master)
            }
        };

        // A dying slave releases its master reference outside the registry
        // lock; the coarse lock is not reentrant.
        if let Some(master) = put_master {
            self.clock_put(master)?;
        }
        Ok(())
    }

    /// Unregister a clock: drops the registration reference.
    pub fn unregister(&self, id: ClockId) -> TimeResult<()> {
        self.clock_put(id)
    }

    // =========================================================================
    // Clock reads and attributes
    // =========================================================================

    /// Current time on `clock`, in its own timeline.
    pub fn read(&self, id: ClockId) -> TimeResult<TimePoint> {
        let (master, offset) = {
            let guard = self.slot(id)?.read();
            let clock = guard.as_ref().ok_or(TimeError::NoSuchClock)?;
            match &clock.source {
                ClockSource::CoreMonotonic(s) | ClockSource::External(s) => {
                    return Ok(TimePoint::from_ns(s.read_ns()));
                }
                ClockSource::WallClock { master } => (*master, clock.offset),
            }
        };
        Ok(self.read(master)? + offset)
    }

    /// Current time in raw hardware cycles. Slaves delegate to their master;
    /// the offset has no meaning in cycles.
    pub fn read_cycles(&self, id: ClockId) -> TimeResult<u64> {
        let master = {
            let guard = self.slot(id)?.read();
            let clock = guard.as_ref().ok_or(TimeError::NoSuchClock)?;
            match &clock.source {
                ClockSource::CoreMonotonic(s) | ClockSource::External(s) => {
                    return Ok(s.read_cycles());
                }
                ClockSource::WallClock { master } => *master,
            }
        };
        self.read_cycles(master)
    }

    /// The clock's nominal resolution.
    pub fn resolution(&self, id: ClockId) -> TimeResult<TimeSpan> {
        self.with_clock(id, |c| c.resolution)
    }

    /// The clock's current gravity thresholds.
    pub fn gravity(&self, id: ClockId) -> TimeResult<Gravity> {
        self.with_clock(id, |c| c.gravity)
    }

    /// Replace the clock's gravity thresholds. Applies to timers armed
    /// from now on; existing armings keep their snapshot.
    pub fn set_gravity(&self, id: ClockId, gravity: Gravity) -> TimeResult<()> {
        self.with_clock_mut(id, |c| c.gravity = gravity)
    }

    /// Textual gravity update (`"<ns>i <ns>k <ns>u"` tokens). A malformed
    /// token rejects the whole update.
    pub fn update_gravity(&self, id: ClockId, input: &str) -> TimeResult<()> {
        self.with_clock_mut(id, |c| c.gravity.parse_update(input))?
    }

    /// Restore the platform-default gravity thresholds.
    pub fn reset_gravity(&self, id: ClockId) -> TimeResult<()> {
        self.with_clock_mut(id, |c| c.gravity = Gravity::default())
    }

    /// Resolve the master-side view (hardware source + shared bases) for
    /// any clock, slave or master.
    pub(crate) fn master_view(&self, id: ClockId) -> TimeResult<MasterView> {
        let master = {
            let guard = self.slot(id)?.read();
            let clock = guard.as_ref().ok_or(TimeError::NoSuchClock)?;
            match &clock.source {
                ClockSource::CoreMonotonic(s) | ClockSource::External(s) => {
                    return Ok(MasterView {
                        master: id,
                        source: s.clone(),
                        bases: clock.bases.clone().ok_or(TimeError::NoSuchClock)?,
                    });
                }
                ClockSource::WallClock { master } => *master,
            }
        };

        let guard = self.slot(master)?.read();
        let clock = guard.as_ref().ok_or(TimeError::NoSuchClock)?;
        match &clock.source {
            ClockSource::CoreMonotonic(s) | ClockSource::External(s) => Ok(MasterView {
                master,
                source: s.clone(),
                bases: clock.bases.clone().ok_or(TimeError::NoSuchClock)?,
            }),
            ClockSource::WallClock { .. } => Err(TimeError::NoSuchClock),
        }
    }

    // =========================================================================
    // Timer control surface
    // =========================================================================

    /// Allocate an unarmed timer bound to `clock`, affine to the clock's
    /// deterministic default CPU. The timer holds a clock reference until
    /// freed.
    pub fn new_timer(
        &self,
        clock: ClockId,
        wake: WakeContext,
        handler: Option<TimerHandler>,
    ) -> TimeResult<TimerHandle> {
        self.new_timer_inner(clock, wake, handler, TimerFlags::empty())
    }

    /// Allocate the reserved sentinel timer whose firing is never handled
    /// inline: the dispatcher reports it through its outcome instead, and
    /// the general-purpose caller runs [`TimerCore::propagate_tick`].
    pub fn new_tick_proxy(
        &self,
        clock: ClockId,
        handler: Option<TimerHandler>,
    ) -> TimeResult<TimerHandle> {
        self.new_timer_inner(clock, WakeContext::Kernel, handler, TimerFlags::TICK_PROXY)
    }

    fn new_timer_inner(
        &self,
        clock: ClockId,
        wake: WakeContext,
        handler: Option<TimerHandler>,
        extra: TimerFlags,
    ) -> TimeResult<TimerHandle> {
        self.clock_get(clock)?;

        let placed = (|| -> TimeResult<TimerHandle> {
            let (cpu, locations) = self.with_clock(clock, |c| {
                (c.affinity.first(), c.locations.clone())
            })?;
            let cpu = cpu.ok_or(TimeError::InvalidArgument)?;
            let view = self.master_view(clock)?;

            let id = TimerId(self.next_timer_id.fetch_add(1, Ordering::Relaxed));
            let mut timer = Timer::new(clock, cpu, wake, handler);
            timer.flags.insert(extra);

            view.base(cpu).lock().timers.insert(id, timer);
            locations.lock().insert(id, cpu);
            Ok(TimerHandle { clock, timer: id })
        })();

        if placed.is_err() {
            let _ = self.clock_put(clock);
        }
        placed
    }

    /// Locate a timer's owning CPU and master view. Control path only.
    pub(crate) fn locate(
        &self,
        handle: TimerHandle,
    ) -> TimeResult<(MasterView, CpuId, LocationMap)> {
        let locations = self.with_clock(handle.clock, |c| c.locations.clone())?;
        let cpu = *locations
            .lock()
            .get(&handle.timer)
            .ok_or(TimeError::NoSuchTimer)?;
        let view = self.master_view(handle.clock)?;
        Ok((view, cpu, locations))
    }

    /// Arm a timer: fire at absolute `value` (in the timer's clock
    /// timeline), then every `interval` if one is given. Re-arming an armed
    /// timer atomically replaces the previous arming.
    pub fn start_timer(
        &self,
        handle: TimerHandle,
        value: TimePoint,
        interval: TimeSpan,
    ) -> TimeResult<()> {
        if interval.is_negative() {
            return Err(TimeError::InvalidArgument);
        }

        let (gravity, offset) =
            self.with_clock(handle.clock, |c| (c.gravity, c.offset))?;
        let (view, cpu, _) = self.locate(handle)?;

        let mut base = view.base(cpu).lock();
        if !base.timers.contains_key(&handle.timer) {
            return Err(TimeError::NoSuchTimer);
        }

        base.dequeue(handle.timer);
        if let Some(timer) = base.timers.get_mut(&handle.timer) {
            // Dates are kept in the master timeline; a slave arming
            // converts through its offset.
            timer.expiry = value - offset;
            timer.start_date = timer.expiry;
            timer.interval = interval;
            timer.periodic_ticks = 0;
            timer.fired_count = 0;
            timer.gravity = gravity.applicable(timer.wake);
            timer.flags.remove(TimerFlags::FIRED);
            timer.flags.insert(TimerFlags::RUNNING);
            if interval.is_positive() {
                timer.flags.insert(TimerFlags::PERIODIC);
            } else {
                timer.flags.remove(TimerFlags::PERIODIC);
            }
        }
        base.enqueue(handle.timer);
        self.reprogram(&view, &mut base);
        Ok(())
    }

    /// Disarm a timer. The record stays allocated and can be re-armed.
    pub fn stop_timer(&self, handle: TimerHandle) -> TimeResult<()> {
        let (view, cpu, _) = self.locate(handle)?;
        let mut base = view.base(cpu).lock();
        if !base.timers.contains_key(&handle.timer) {
            return Err(TimeError::NoSuchTimer);
        }
        base.dequeue(handle.timer);
        if let Some(timer) = base.timers.get_mut(&handle.timer) {
            timer.flags.remove(TimerFlags::RUNNING | TimerFlags::FIRED);
        }
        self.reprogram(&view, &mut base);
        Ok(())
    }

    /// Disarm and destroy a timer, dropping its clock reference.
    pub fn free_timer(&self, handle: TimerHandle) -> TimeResult<()> {
        let (view, cpu, locations) = self.locate(handle)?;
        {
            let mut base = view.base(cpu).lock();
            if !base.timers.contains_key(&handle.timer) {
                return Err(TimeError::NoSuchTimer);
            }
            base.dequeue(handle.timer);
            base.timers.remove(&handle.timer);
            self.reprogram(&view, &mut base);
        }
        locations.lock().remove(&handle.timer);
        self.clock_put(handle.clock)
    }

    /// Move a timer to another online CPU's base, preserving its arming.
    /// The handle stays valid; only the owning base changes.
    pub fn migrate_timer(&self, handle: TimerHandle, target: CpuId) -> TimeResult<()> {
        if !self.online.contains(target) {
            return Err(TimeError::InvalidArgument);
        }
        let (view, cpu, locations) = self.locate(handle)?;
        if cpu == target {
            return Ok(());
        }

        let (mut record, was_queued) = {
            let mut base = view.base(cpu).lock();
            let was_queued = match base.timers.get(&handle.timer) {
                None => return Err(TimeError::NoSuchTimer),
                Some(t) => t.is_queued(),
            };
            base.dequeue(handle.timer);
            let record = base
                .timers
                .remove(&handle.timer)
                .ok_or(TimeError::NoSuchTimer)?;
            self.reprogram(&view, &mut base);
            (record, was_queued)
        };

        record.cpu = target;

        // A running record that was not queued is mid-flight: the dispatch
        // pass dequeued it for the firing in progress, and with the record
        // gone from the source base its post-firing transition would be
        // skipped. Apply it here instead so a periodic timer stays armed.
        let mut arm_on_target = was_queued;
        if !was_queued && record.is_running() {
            if record.is_periodic() {
                record.forward_fired(view.now());
                arm_on_target = true;
            } else {
                record.flags.remove(TimerFlags::RUNNING);
            }
        }

        {
            let mut base = view.base(target).lock();
            base.timers.insert(handle.timer, record);
            if arm_on_target {
                base.enqueue(handle.timer);
            }
            self.reprogram(&view, &mut base);
        }
        locations.lock().insert(handle.timer, target);
        Ok(())
    }

    /// The timer's `{interval, remaining}` pair; remaining is zero while
    /// unarmed.
    pub fn timer_value(&self, handle: TimerHandle) -> TimeResult<(TimeSpan, TimeSpan)> {
        let (view, cpu, _) = self.locate(handle)?;
        let now = view.now();
        let base = view.base(cpu).lock();
        let timer = base
            .timers
            .get(&handle.timer)
            .ok_or(TimeError::NoSuchTimer)?;
        let remaining = if timer.is_running() && timer.is_queued() {
            (timer.expiry - now).max_zero()
        } else {
            TimeSpan::ZERO
        };
        Ok((timer.interval, remaining))
    }

    /// Elapsed-tick accounting since the timer was last armed: elapsed
    /// periods for a periodic timer, handler invocations for a one-shot.
    pub fn timer_ticks(&self, handle: TimerHandle) -> TimeResult<u64> {
        let (view, cpu, _) = self.locate(handle)?;
        let base = view.base(cpu).lock();
        let timer = base
            .timers
            .get(&handle.timer)
            .ok_or(TimeError::NoSuchTimer)?;
        Ok(if timer.is_periodic() {
            timer.periodic_ticks
        } else {
            timer.fired_count
        })
    }

    /// Run the deferred propagation for a tick-proxy timer: invoked by the
    /// general-purpose caller after a dispatch pass reported
    /// `DispatchOutcome::PropagateTick`.
    pub fn propagate_tick(&self, handle: TimerHandle) -> TimeResult<()> {
        let (view, cpu, _) = self.locate(handle)?;
        let (handler, event) = {
            let mut base = view.base(cpu).lock();
            let timer = base
                .timers
                .get_mut(&handle.timer)
                .ok_or(TimeError::NoSuchTimer)?;
            (
                timer.handler.take(),
                TimerEvent {
                    handle,
                    expiry: timer.expiry,
                    cpu,
                },
            )
        };

        let mut handler = match handler {
            Some(h) => h,
            None => return Ok(()),
        };
        handler(&event);
        self.give_back_handler(handle, handler);
        Ok(())
    }

    /// Return a checked-out handler to its record. Best effort: the timer
    /// may have migrated (handler follows it) or been freed mid-flight
    /// (handler is dropped with it).
    pub(crate) fn give_back_handler(&self, handle: TimerHandle, handler: TimerHandler) {
        if let Ok((view, cpu, _)) = self.locate(handle) {
            let mut base = view.base(cpu).lock();
            if let Some(timer) = base.timers.get_mut(&handle.timer) {
                if timer.handler.is_none() {
                    timer.handler = Some(handler);
                }
            }
        }
    }

    /// Recompute and program the hardware shot for one base. Local hook on
    /// the calling CPU, remote hook otherwise; a drained queue disables
    /// event scheduling instead. Skips the hardware call when the cached
    /// shot date is already right.
    pub(crate) fn reprogram(&self, view: &MasterView, base: &mut TimerBase) {
        self.program_next_shot(view, base, false);
    }

    /// Like [`Self::reprogram`], but never trusts the cached shot date.
    /// Used at the end of a dispatch pass: the hardware event that raised
    /// the pass consumed the programmed shot, so an unchanged date still
    /// needs rearming.
    pub(crate) fn reprogram_forced(&self, view: &MasterView, base: &mut TimerBase) {
        self.program_next_shot(view, base, true);
    }

    fn program_next_shot(&self, view: &MasterView, base: &mut TimerBase, force: bool) {
        let cpu = base.cpu;
        match base.next_shot_date() {
            None => {
                if force || base.next_shot != TimePoint::MAX {
                    base.next_shot = TimePoint::MAX;
                    view.source.stop_shot(cpu);
                }
            }
            Some(at) => {
                if !force && at == base.next_shot {
                    return;
                }
                base.next_shot = at;
                let delay = (at - view.now()).max_zero();
                if cpu == self.sched.current_cpu() {
                    view.source.program_shot(cpu, delay);
                } else {
                    view.source.program_remote_shot(cpu, delay);
                }
            }
        }
    }
}
