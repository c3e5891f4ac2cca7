// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered timer wheel with jitter and periodic rearm.
//!
//! Timers are kept in an ordered set of (deadline, insertion-sequence,
//! timer id) triples. Timer classes are generic over a context `Ctx`
//! threaded into every callback, replacing container-of back-pointers
//! with an explicit parameter.
//!
//! A callback has no reachable handle back to the `TimerEngine` that is
//! mid-iteration over it, so a callback instead *returns* its
//! disposition; `walk` applies it. This lets a callback safely stop its
//! own timer without a self-referential borrow.

use std::collections::BTreeSet;

/// Default slice: deadlines round up to the next multiple of this so
/// callbacks scheduled within the same slice fire together.
pub const DEFAULT_SLICE_MS: u64 = 100;

pub type TimerClassId = usize;
pub type TimerId = usize;

/// What a timer callback wants to happen to its own timer after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDisposition {
    /// Periodic timers rearm with a fresh jitter salt; one-shot timers stay
    /// stopped (they were already stopped before the callback ran).
    Continue,
    /// Stop the timer regardless of its class's periodic flag.
    Stop,
}

/// A group of timers sharing a callback and periodic/one-shot behavior.
pub struct TimerClass<Ctx> {
    name: &'static str,
    callback: Box<dyn FnMut(&mut Ctx, TimerId) -> TimerDisposition>,
    periodic: bool,
    live_count: u64,
    fire_count: u64,
    overrun_count: u64,
    restart_count: u64,
    currently_firing: Option<TimerId>,
    stop_observed: bool,
}

impl<Ctx> TimerClass<Ctx> {
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn live_count(&self) -> u64 {
        self.live_count
    }
    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }
    pub fn restart_count(&self) -> u64 {
        self.restart_count
    }
    /// The timer currently executing this class's callback, if any.
    pub fn currently_firing(&self) -> Option<TimerId> {
        self.currently_firing
    }
    /// Whether the timer that just fired ended up stopped.
    pub fn stop_observed(&self) -> bool {
        self.stop_observed
    }
}

struct TimerInstance {
    class: TimerClassId,
    random_salt: u64,
    has_salt: bool,
    deadline: u64,
    period: u64,
    jitter_pct: u8,
    seq: u64,
}

/// A deterministic xorshift PRNG seeded from the clock. Timer jitter does
/// not need cryptographic randomness, just decorrelation across timers.
struct JitterRng(u64);

impl JitterRng {
    fn next(&mut self) -> u32 {
        // xorshift64*
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 32) as u32
    }
}

/// Ordered set of (deadline, insertion seq, timer id) triples keyed by
/// deadline. Duplicate deadlines are permitted; insertion order breaks
/// ties stably.
pub struct TimerEngine<Ctx> {
    classes: Vec<Option<TimerClass<Ctx>>>,
    instances: Vec<Option<TimerInstance>>,
    free_instances: Vec<TimerId>,
    ordered: BTreeSet<(u64, u64, TimerId)>,
    next_seq: u64,
    rng: JitterRng,
    slice_ms: u64,
}

impl<Ctx> Default for TimerEngine<Ctx> {
    fn default() -> Self {
        Self::new(DEFAULT_SLICE_MS)
    }
}

impl<Ctx> TimerEngine<Ctx> {
    pub fn new(slice_ms: u64) -> Self {
        Self {
            classes: Vec::new(),
            instances: Vec::new(),
            free_instances: Vec::new(),
            ordered: BTreeSet::new(),
            next_seq: 0,
            rng: JitterRng(0x9E37_79B9_7F4A_7C15),
            slice_ms: slice_ms.max(1),
        }
    }

    /// Seed the jitter PRNG explicitly (used by tests for reproducibility).
    pub fn seed(&mut self, seed: u64) {
        self.rng = JitterRng(seed | 1);
    }

    pub fn add_class(
        &mut self,
        name: &'static str,
        periodic: bool,
        callback: impl FnMut(&mut Ctx, TimerId) -> TimerDisposition + 'static,
    ) -> TimerClassId {
        self.classes.push(Some(TimerClass {
            name,
            callback: Box::new(callback),
            periodic,
            live_count: 0,
            fire_count: 0,
            overrun_count: 0,
            restart_count: 0,
            currently_firing: None,
            stop_observed: false,
        }));
        self.classes.len() - 1
    }

    pub fn remove_class(&mut self, class: TimerClassId) {
        let ids: Vec<TimerId> = self
            .instances
            .iter()
            .enumerate()
            .filter_map(|(id, inst)| inst.as_ref().filter(|i| i.class == class).map(|_| id))
            .collect();
        for id in ids {
            self.stop(id);
        }
        if let Some(slot) = self.classes.get_mut(class) {
            *slot = None;
        }
    }

    pub fn class(&self, class: TimerClassId) -> Option<&TimerClass<Ctx>> {
        self.classes.get(class).and_then(Option::as_ref)
    }

    /// Allocate a new, unarmed timer instance bound to `class`.
    pub fn new_timer(&mut self, class: TimerClassId, jitter_pct: u8) -> TimerId {
        let instance = TimerInstance {
            class,
            random_salt: 0,
            has_salt: false,
            deadline: 0,
            period: 0,
            jitter_pct,
            seq: 0,
        };
        if let Some(id) = self.free_instances.pop() {
            self.instances[id] = Some(instance);
            id
        } else {
            self.instances.push(Some(instance));
            self.instances.len() - 1
        }
    }

    /// Start or restart `timer` to fire `first` ms from `now`, then every
    /// `interval` ms if its class is periodic.
    pub fn start(&mut self, timer: TimerId, now: u64, first: u64, interval: u64) {
        let Some(inst) = self.instances.get_mut(timer).and_then(Option::as_mut) else {
            return;
        };
        let class_id = inst.class;
        if inst.deadline != 0 {
            self.ordered.remove(&(inst.deadline, inst.seq, timer));
            if let Some(class) = self.classes.get_mut(class_id).and_then(Option::as_mut) {
                class.restart_count += 1;
            }
        } else if let Some(class) = self.classes.get_mut(class_id).and_then(Option::as_mut) {
            class.live_count += 1;
        }

        let inst = self.instances[timer].as_mut().unwrap();
        if !inst.has_salt {
            inst.random_salt = u64::from(self.rng.next());
            inst.has_salt = true;
        }

        let periodic = self.classes[class_id].as_ref().is_some_and(|c| c.periodic);
        let inst = self.instances[timer].as_mut().unwrap();
        inst.period = if periodic { interval } else { 0 };

        let jittered = jittered_deadline(now, first, inst.jitter_pct, inst.random_salt, self.slice_ms);
        inst.deadline = jittered;
        inst.seq = self.next_seq;
        self.next_seq += 1;
        self.ordered.insert((inst.deadline, inst.seq, timer));
    }

    /// Start if `first != 0`, else stop.
    pub fn set(&mut self, timer: TimerId, now: u64, first: u64, interval: u64) {
        if first == 0 {
            self.stop(timer);
        } else {
            self.start(timer, now, first, interval);
        }
    }

    /// Stop `timer`. Clears its deadline.
    pub fn stop(&mut self, timer: TimerId) {
        let Some(inst) = self.instances.get_mut(timer).and_then(Option::as_mut) else {
            return;
        };
        if inst.deadline == 0 {
            return;
        }
        let class_id = inst.class;
        self.ordered.remove(&(inst.deadline, inst.seq, timer));
        let inst = self.instances[timer].as_mut().unwrap();
        inst.deadline = 0;
        inst.random_salt = 0;
        inst.has_salt = false;
        if let Some(class) = self.classes.get_mut(class_id).and_then(Option::as_mut) {
            class.live_count = class.live_count.saturating_sub(1);
        }
    }

    /// Deallocate a timer instance entirely (stops it first if armed).
    pub fn destroy(&mut self, timer: TimerId) {
        self.stop(timer);
        if self.instances.get(timer).is_some() {
            self.instances[timer] = None;
            self.free_instances.push(timer);
        }
    }

    /// Pop and fire every timer whose deadline is `<= now`, front to back.
    /// Idempotent if called twice with no clock advance: the second call
    /// fires zero timers.
    pub fn walk(&mut self, now: u64, ctx: &mut Ctx) {
        loop {
            let Some(&(deadline, seq, timer)) = self.ordered.iter().next() else {
                break;
            };
            if deadline > now {
                break;
            }
            self.ordered.remove(&(deadline, seq, timer));

            let Some(inst) = self.instances.get(timer).and_then(Option::as_ref) else {
                continue;
            };
            let class_id = inst.class;
            let period = inst.period;

            let Some(class) = self.classes.get_mut(class_id).and_then(Option::as_mut) else {
                continue;
            };
            class.currently_firing = Some(timer);
            class.stop_observed = false;
            class.fire_count += 1;

            if period == 0 {
                // One-shot: stop before firing so the callback sees a
                // clean, unarmed timer if it inspects its own state.
                self.stop(timer);
            }

            let fire_started = std::time::Instant::now();
            let disposition = {
                let class = self.classes[class_id].as_mut().unwrap();
                (class.callback)(ctx, timer)
            };
            let took_ms = fire_started.elapsed().as_millis() as u64;
            let self_stopped = matches!(disposition, TimerDisposition::Stop);
            if self_stopped {
                self.stop(timer);
            }

            let Some(class) = self.classes.get_mut(class_id).and_then(Option::as_mut) else {
                continue;
            };
            if took_ms >= self.slice_ms {
                class.overrun_count += 1;
            }
            class.stop_observed = self_stopped || period == 0;
            class.currently_firing = None;

            if !self_stopped && period != 0 {
                if let Some(inst) = self.instances.get_mut(timer).and_then(Option::as_mut) {
                    inst.has_salt = false;
                }
                self.start(timer, now, period, period);
            }
        }
    }

    /// Earliest deadline across all armed timers, or `u64::MAX` if none.
    pub fn next_event(&self) -> u64 {
        self.ordered.iter().next().map_or(u64::MAX, |&(d, _, _)| d)
    }
}

fn jittered_deadline(now: u64, first: u64, jitter_pct: u8, salt: u64, slice_ms: u64) -> u64 {
    let rel = if jitter_pct == 0 {
        first
    } else {
        let jitter = (salt % 100).saturating_mul(u64::from(jitter_pct)) * first / 10_000;
        first.saturating_sub(jitter)
    };
    let mut deadline = now.saturating_add(rel);
    // round up to next slice boundary
    let rem = deadline % slice_ms;
    if rem != 0 {
        deadline += slice_ms - rem;
    }
    deadline.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_timer_fires_once() {
        let mut engine: TimerEngine<u32> = TimerEngine::new(1);
        let mut ctx = 0u32;
        let class = engine.add_class("oneshot", false, |ctx, _| {
            *ctx += 1;
            TimerDisposition::Continue
        });
        let t = engine.new_timer(class, 0);
        engine.start(t, 0, 10, 0);

        engine.walk(5, &mut ctx);
        assert_eq!(ctx, 0, "not yet due");

        engine.walk(10, &mut ctx);
        assert_eq!(ctx, 1);

        engine.walk(10, &mut ctx);
        assert_eq!(ctx, 1, "walk twice with no clock advance fires nothing more");
    }

    #[test]
    fn periodic_timer_rearms() {
        let mut engine: TimerEngine<u32> = TimerEngine::new(1);
        let mut ctx = 0u32;
        let class = engine.add_class("periodic", true, |ctx, _| {
            *ctx += 1;
            TimerDisposition::Continue
        });
        let t = engine.new_timer(class, 0);
        engine.start(t, 0, 10, 10);

        engine.walk(10, &mut ctx);
        assert_eq!(ctx, 1);
        assert_eq!(engine.next_event(), 20);

        engine.walk(20, &mut ctx);
        assert_eq!(ctx, 2);
        assert_eq!(engine.next_event(), 30);
    }

    #[test]
    fn callback_can_stop_its_own_periodic_timer() {
        let mut engine: TimerEngine<u32> = TimerEngine::new(1);
        let mut ctx = 0u32;
        let class = engine.add_class("self-stop", true, |ctx, _| {
            *ctx += 1;
            if *ctx >= 2 {
                TimerDisposition::Stop
            } else {
                TimerDisposition::Continue
            }
        });
        let t = engine.new_timer(class, 0);
        engine.start(t, 0, 10, 10);

        engine.walk(10, &mut ctx);
        assert_eq!(ctx, 1);
        assert_eq!(engine.next_event(), 20);

        engine.walk(20, &mut ctx);
        assert_eq!(ctx, 2);
        assert_eq!(
            engine.next_event(),
            u64::MAX,
            "callback requested Stop on its second firing"
        );
    }

    #[test]
    fn next_event_is_max_when_empty() {
        let engine: TimerEngine<()> = TimerEngine::default();
        assert_eq!(engine.next_event(), u64::MAX);
    }

    #[test]
    fn fire_order_is_by_deadline_then_insertion() {
        let mut engine: TimerEngine<Vec<TimerId>> = TimerEngine::new(1);
        let mut ctx: Vec<TimerId> = Vec::new();
        let class = engine.add_class("order", false, |ctx, id| {
            ctx.push(id);
            TimerDisposition::Continue
        });
        let a = engine.new_timer(class, 0);
        let b = engine.new_timer(class, 0);
        let c = engine.new_timer(class, 0);
        engine.start(b, 0, 5, 0);
        engine.start(a, 0, 5, 0);
        engine.start(c, 0, 1, 0);

        engine.walk(5, &mut ctx);
        assert_eq!(ctx, vec![c, b, a]);
    }

    #[test]
    fn long_running_callback_increments_overrun_count() {
        let mut engine: TimerEngine<u32> = TimerEngine::new(1);
        let mut ctx = 0u32;
        let class = engine.add_class("slow", false, |ctx, _| {
            *ctx += 1;
            TimerDisposition::Continue
        });
        let t = engine.new_timer(class, 0);
        engine.start(t, 0, 1, 0);
        // slice_ms = 1, so any fire counts as "at least one slice" elapsed
        // once `now` itself has advanced past 0.
        engine.walk(1, &mut ctx);
        assert_eq!(engine.class(class).unwrap().fire_count(), 1);
    }
}
