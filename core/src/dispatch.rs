//! # Tick Dispatch
//!
//! One dispatch pass drains every due timer from the calling CPU's base for
//! one clock, then reprograms the next hardware shot. The pass holds the
//! base lock except around handler invocations: handlers are entitled to
//! start, stop, migrate, or free arbitrary timers, including the one that
//! just fired, so every assumption is re-validated after a handler returns.

use alloc::vec::Vec;

use crate::clock::{ClockId, TimerCore};
use crate::error::{TimeError, TimeResult};
use crate::timer::{TimerEvent, TimerFlags, TimerHandle};

/// The context a dispatch pass runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickContext {
    /// Interrupt / real-time context. Lowest-priority work must be deferred
    /// to the general-purpose side.
    Oob,
    /// General-purpose (preemptible) context.
    Inband,
}

/// What a dispatch pass asks of its caller. Returned by value once per pass
/// instead of accumulating in shared state.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a deferred tick propagation must be carried out by the caller"]
pub enum DispatchOutcome {
    /// Nothing left to do.
    Quiet,
    /// Tick-proxy sentinels fired during the pass; the caller must run
    /// [`TimerCore::propagate_tick`] for each handle, in firing order, once
    /// back in general-purpose context.
    PropagateTick(Vec<TimerHandle>),
}

impl TimerCore {
    /// Run one dispatch pass for `clock` on the calling CPU.
    ///
    /// Drains every due entry, a timer being due once its programmed shot
    /// date (expiry minus its gravity snapshot) is at or before the clock's
    /// current reading. A firing proxy sentinel never runs inline here: in
    /// `Inband` context the propagation happens before returning, in `Oob`
    /// context it is reported through the outcome. Expiry processing is
    /// never stalled behind it either way.
    pub fn tick(&self, clock: ClockId, context: TickContext) -> TimeResult<DispatchOutcome> {
        let view = self.master_view(clock)?;
        let cpu = self.scheduler().current_cpu();
        let mut deferred: Vec<TimerHandle> = Vec::new();

        let mut base = view.base(cpu).lock();
        loop {
            let now = view.now();
            let (key, id) = match base.earliest() {
                Some(entry) => entry,
                None => break,
            };
            let gravity = base
                .timers
                .get(&id)
                .map(|t| t.gravity)
                .unwrap_or_default();
            if key.expiry.saturating_sub(gravity) > now {
                break;
            }
            base.dequeue(id);

            let (handle, is_proxy, is_periodic) = match base.timers.get_mut(&id) {
                None => {
                    log::warn!("{}: queued timer {:?} has no record", cpu, id);
                    continue;
                }
                Some(timer) => {
                    timer.flags.insert(TimerFlags::FIRED);
                    timer.fired_count += 1;
                    (
                        TimerHandle {
                            clock: timer.clock,
                            timer: id,
                        },
                        timer.flags.contains(TimerFlags::TICK_PROXY),
                        timer.is_periodic(),
                    )
                }
            };

            if is_proxy {
                if is_periodic {
                    if let Some(timer) = base.timers.get_mut(&id) {
                        timer.forward_fired(now);
                    }
                    base.enqueue(id);
                }
                deferred.push(handle);
                continue;
            }

            let handler = match base.timers.get_mut(&id) {
                Some(timer) => timer.handler.take(),
                None => None,
            };
            let event = TimerEvent {
                handle,
                expiry: key.expiry,
                cpu,
            };

            if let Some(mut handler) = handler {
                drop(base);
                handler(&event);
                self.give_back_handler(handle, handler);
                base = view.base(cpu).lock();
            }

            // The handler (or anyone it woke) may have re-armed, migrated,
            // or freed this timer; only a record still owned here, still
            // periodic, still armed and not already requeued is ours to
            // advance.
            let now = view.now();
            let requeue = match base.timers.get_mut(&id) {
                Some(timer) if timer.cpu == cpu => {
                    if timer.is_periodic() && timer.is_running() && !timer.is_queued() {
                        timer.forward_fired(now);
                        true
                    } else {
                        if !timer.is_periodic() && !timer.is_queued() {
                            timer.flags.remove(TimerFlags::RUNNING);
                        }
                        false
                    }
                }
                _ => false,
            };
            if requeue {
                base.enqueue(id);
            }
        }
        // The hardware event that raised this pass consumed the programmed
        // shot; the cached date cannot be trusted, rearm unconditionally.
        self.reprogram_forced(&view, &mut base);
        drop(base);

        if deferred.is_empty() {
            return Ok(DispatchOutcome::Quiet);
        }
        match context {
            TickContext::Inband => {
                for handle in deferred {
                    match self.propagate_tick(handle) {
                        // An earlier propagation may have freed this one.
                        Ok(()) | Err(TimeError::NoSuchTimer) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(DispatchOutcome::Quiet)
            }
            TickContext::Oob => Ok(DispatchOutcome::PropagateTick(deferred)),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU64, Ordering};

    use spin::Mutex;

    use super::*;
    use crate::clock::ClockSource;
    use crate::cpu::{CpuId, CpuSet};
    use crate::gravity::Gravity;
    use crate::testkit::{StubScheduler, TestClock};
    use crate::time::{TimePoint, TimeSpan};
    use crate::timer::WakeContext;

    fn setup() -> (Arc<TimerCore>, Arc<TestClock>, ClockId) {
        let clk = Arc::new(TestClock::new());
        let core = Arc::new(TimerCore::new(
            2,
            CpuSet::first_n(2),
            Arc::new(StubScheduler::new()),
        ));
        let id = core
            .register(
                "monotonic",
                ClockSource::CoreMonotonic(clk.clone()),
                TimeSpan::from_ns(1),
                CpuSet::EMPTY,
            )
            .unwrap();
        (core, clk, id)
    }

    #[test]
    fn test_one_shot_fires_once() {
        let (core, clk, mono) = setup();
        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(999);
        assert_eq!(
            core.tick(mono, TickContext::Oob).unwrap(),
            DispatchOutcome::Quiet
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // One-shot: disarmed after firing, nothing further.
        let (_, remaining) = core.timer_value(h).unwrap();
        assert_eq!(remaining, TimeSpan::ZERO);
        clk.set_ns(10_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stopped_timer_never_fires() {
        // Arm at now+10ms, stop at now+5ms: the queue drops it and the
        // handler never runs.
        let (core, clk, mono) = setup();
        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(10_000_000), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(5_000_000);
        core.stop_timer(h).unwrap();

        let (view, cpu, _) = core.locate(h).unwrap();
        assert!(view.base(cpu).lock().queue.is_empty());

        clk.set_ns(20_000_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_starved_periodic_batches_overruns() {
        // Period 1ms, serviced after 5.5ms: exactly one handler invocation,
        // overrun 4, expiry realigned to the next future multiple.
        let (core, clk, mono) = setup();
        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000_000), TimeSpan::from_millis(1))
            .unwrap();

        clk.set_ns(5_500_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // 5 periods elapsed, 1 handled: 4 overruns.
        assert_eq!(core.timer_ticks(h).unwrap(), 5);

        let (view, cpu, _) = core.locate(h).unwrap();
        let base = view.base(cpu).lock();
        assert_eq!(base.timers[&h.timer].expiry, TimePoint::from_ns(6_000_000));
    }

    #[test]
    fn test_periodic_requeues_in_order() {
        let (core, clk, mono) = setup();
        let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let h1 = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| o1.lock().push(1))),
            )
            .unwrap();
        let o2 = order.clone();
        let h2 = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| o2.lock().push(2))),
            )
            .unwrap();

        core.start_timer(h1, TimePoint::from_ns(2_000), TimeSpan::ZERO)
            .unwrap();
        core.start_timer(h2, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(3_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(order.lock().as_slice(), &[2, 1]);
    }

    #[test]
    fn test_handler_rearm_is_respected() {
        // A handler re-arming its own timer wins over the automatic
        // periodic requeue.
        let (core, clk, mono) = setup();
        let core2 = core.clone();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |ev| {
                    if let Some(h) = *slot2.lock() {
                        let _ = core2.start_timer(
                            h,
                            ev.expiry + TimeSpan::from_ns(123),
                            TimeSpan::ZERO,
                        );
                    }
                })),
            )
            .unwrap();
        *slot.lock() = Some(h);

        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::from_millis(1))
            .unwrap();
        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        let (view, cpu, _) = core.locate(h).unwrap();
        let base = view.base(cpu).lock();
        let t = &base.timers[&h.timer];
        assert!(t.is_queued());
        assert_eq!(t.expiry, TimePoint::from_ns(1_123));
    }

    #[test]
    fn test_handler_free_leaves_no_record() {
        let (core, clk, mono) = setup();
        let core2 = core.clone();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    if let Some(h) = slot2.lock().take() {
                        let _ = core2.free_timer(h);
                    }
                })),
            )
            .unwrap();
        *slot.lock() = Some(h);

        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::from_millis(1))
            .unwrap();
        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        assert_eq!(core.locate(h).map(|_| ()), Err(crate::TimeError::NoSuchTimer));
    }

    #[test]
    fn test_proxy_deferred_in_oob_context() {
        let (core, clk, mono) = setup();
        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let h = core
            .new_tick_proxy(
                mono,
                Some(Box::new(move |_| {
                    ran2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(500), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(500);
        let outcome = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(outcome, DispatchOutcome::PropagateTick(vec![h]));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        core.propagate_tick(h).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_proxy_runs_inline_in_inband_context() {
        let (core, clk, mono) = setup();
        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();
        let h = core
            .new_tick_proxy(
                mono,
                Some(Box::new(move |_| {
                    ran2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(500), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(500);
        let outcome = core.tick(mono, TickContext::Inband).unwrap();
        assert_eq!(outcome, DispatchOutcome::Quiet);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_proxy_never_stalls_expiry_processing() {
        // The proxy firing first must not delay the ordinary timer due in
        // the same pass.
        let (core, clk, mono) = setup();
        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();

        let proxy = core.new_tick_proxy(mono, None).unwrap();
        core.start_timer(proxy, TimePoint::from_ns(100), TimeSpan::ZERO)
            .unwrap();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(200), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(300);
        let outcome = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(outcome, DispatchOutcome::PropagateTick(vec![proxy]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_every_fired_proxy_is_deferred() {
        let (core, clk, mono) = setup();
        let p1 = core.new_tick_proxy(mono, None).unwrap();
        let p2 = core.new_tick_proxy(mono, None).unwrap();
        core.start_timer(p1, TimePoint::from_ns(100), TimeSpan::ZERO)
            .unwrap();
        core.start_timer(p2, TimePoint::from_ns(200), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(300);
        let outcome = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(outcome, DispatchOutcome::PropagateTick(vec![p1, p2]));
    }

    #[test]
    fn test_shot_reprogrammed_after_pass() {
        let (core, clk, mono) = setup();
        let h = core.new_timer(mono, WakeContext::Irq, None).unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::from_micros(2))
            .unwrap();

        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        // Next expiry is 3_000; the shot is armed for the remaining delay.
        assert_eq!(
            clk.last_shot(),
            Some((CpuId(0), TimeSpan::from_ns(2_000)))
        );
    }

    #[test]
    fn test_empty_queue_stops_shot() {
        let (core, clk, mono) = setup();
        let h = core.new_timer(mono, WakeContext::Irq, None).unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();

        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(clk.stop_count(), 1);
    }

    #[test]
    fn test_gravity_timer_due_at_shot_date() {
        // irq gravity 400ns, one-shot at 1_000: the shot lands at 600 and
        // the timer is serviced right there rather than left armed with no
        // pending hardware event.
        let (core, clk, mono) = setup();
        core.set_gravity(
            mono,
            Gravity {
                irq: TimeSpan::from_ns(400),
                ..Gravity::ZERO
            },
        )
        .unwrap();

        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();
        assert_eq!(clk.last_shot(), Some((CpuId(0), TimeSpan::from_ns(600))));

        clk.set_ns(600);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // One-shot serviced, queue drained.
        assert_eq!(clk.stop_count(), 1);
    }

    #[test]
    fn test_gravity_periodic_rearms_next_shot() {
        // Period 1_000 with irq gravity 400: serviced at the 600 shot, the
        // next firing keeps its phase (expiry 2_000) and the next shot is
        // armed for 1_600.
        let (core, clk, mono) = setup();
        core.set_gravity(
            mono,
            Gravity {
                irq: TimeSpan::from_ns(400),
                ..Gravity::ZERO
            },
        )
        .unwrap();

        let fired = Arc::new(AtomicU64::new(0));
        let fired2 = fired.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::from_ns(1_000))
            .unwrap();

        clk.set_ns(600);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(core.timer_ticks(h).unwrap(), 1);

        let (view, cpu, _) = core.locate(h).unwrap();
        {
            let base = view.base(cpu).lock();
            assert_eq!(base.timers[&h.timer].expiry, TimePoint::from_ns(2_000));
        }
        assert_eq!(clk.last_shot(), Some((CpuId(0), TimeSpan::from_ns(1_000))));
    }

    #[test]
    fn test_early_tick_rearms_consumed_shot() {
        // A pass that pops nothing still reprograms: the hardware event
        // that raised it is gone, and the unchanged earliest expiry needs a
        // fresh shot.
        let (core, clk, mono) = setup();
        let h = core.new_timer(mono, WakeContext::Irq, None).unwrap();
        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();
        assert_eq!(clk.last_shot(), Some((CpuId(0), TimeSpan::from_ns(1_000))));

        clk.set_ns(500);
        let _ = core.tick(mono, TickContext::Oob).unwrap();
        assert_eq!(clk.last_shot(), Some((CpuId(0), TimeSpan::from_ns(500))));
    }

    #[test]
    fn test_handler_migration_keeps_periodic_armed() {
        // A handler moving its own timer mid-firing must leave it queued on
        // the target base, advanced past the serviced period.
        let (core, clk, mono) = setup();
        let core2 = core.clone();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    if let Some(h) = *slot2.lock() {
                        let _ = core2.migrate_timer(h, CpuId(1));
                    }
                })),
            )
            .unwrap();
        *slot.lock() = Some(h);

        core.start_timer(h, TimePoint::from_ns(1_000_000), TimeSpan::from_millis(1))
            .unwrap();
        clk.set_ns(1_000_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        let (view, cpu, _) = core.locate(h).unwrap();
        assert_eq!(cpu, CpuId(1));
        let base = view.base(cpu).lock();
        let t = &base.timers[&h.timer];
        assert!(t.is_running());
        assert!(t.is_queued());
        assert_eq!(t.expiry, TimePoint::from_ns(2_000_000));
    }

    #[test]
    fn test_handler_migration_retires_one_shot() {
        let (core, clk, mono) = setup();
        let core2 = core.clone();
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));
        let slot2 = slot.clone();
        let h = core
            .new_timer(
                mono,
                WakeContext::Irq,
                Some(Box::new(move |_| {
                    if let Some(h) = *slot2.lock() {
                        let _ = core2.migrate_timer(h, CpuId(1));
                    }
                })),
            )
            .unwrap();
        *slot.lock() = Some(h);

        core.start_timer(h, TimePoint::from_ns(1_000), TimeSpan::ZERO)
            .unwrap();
        clk.set_ns(1_000);
        let _ = core.tick(mono, TickContext::Oob).unwrap();

        // The one-shot fired; ending up on another CPU must not leave it
        // marked running.
        let (view, cpu, _) = core.locate(h).unwrap();
        assert_eq!(cpu, CpuId(1));
        let base = view.base(cpu).lock();
        let t = &base.timers[&h.timer];
        assert!(!t.is_running());
        assert!(!t.is_queued());
    }
}
