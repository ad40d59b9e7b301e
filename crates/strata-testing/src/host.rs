//! Host scheduler and clock that only move when a test tells them to.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use strata_core::{Clock, ComponentHandle, ComponentId, HostScheduler};

/// Collects scheduling requests instead of acting on them.
#[derive(Default)]
pub struct ManualScheduler {
    timers: RefCell<FxHashMap<(ComponentId, u64), ComponentHandle>>,
    animation_requests: Cell<usize>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Earliest trigger tick among pending timers.
    pub fn next_due(&self) -> Option<u64> {
        self.timers.borrow().keys().map(|(_, tick)| *tick).min()
    }

    /// Remove and return every timer due at or before `now`, earliest first.
    pub fn take_due(&self, now: u64) -> Vec<(ComponentHandle, u64)> {
        let mut timers = self.timers.borrow_mut();
        let mut due: Vec<_> = timers
            .keys()
            .filter(|(_, tick)| *tick <= now)
            .copied()
            .collect();
        due.sort_by_key(|(id, tick)| (*tick, *id));
        due.into_iter()
            .filter_map(|key| timers.remove(&key).map(|handle| (handle, key.1)))
            .collect()
    }

    pub fn animation_requests(&self) -> usize {
        self.animation_requests.get()
    }

    /// Consume outstanding animation requests; true if there were any.
    pub fn take_animation_request(&self) -> bool {
        self.animation_requests.replace(0) > 0
    }
}

impl HostScheduler for ManualScheduler {
    fn schedule_animation_refresh(&self) {
        self.animation_requests.set(self.animation_requests.get() + 1);
    }

    fn schedule_timer_event(&self, target: ComponentHandle, trigger_tick: u64) {
        log::trace!("timer for {} at tick {trigger_tick}", target.id());
        self.timers
            .borrow_mut()
            .insert((target.id(), trigger_tick), target);
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.set(now);
    }

    pub fn advance(&self, millis: u64) -> u64 {
        let now = self.now.get().saturating_add(millis);
        self.now.set(now);
        now
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
