use crate::host::{ManualClock, ManualScheduler};
use std::any::Any;
use std::rc::Rc;
use strata_core::{
    Clock, ComponentHandle, Context, HostScheduler, System, SystemConfig, TraversalResult,
};

const MAX_PUMP_ITERATIONS: usize = 100;

/// Headless harness for exercising a [`System`] in tests.
///
/// The harness owns a manual scheduler and clock. Time only moves through
/// [`advance_time`](Self::advance_time) and animation frames only run through
/// [`advance_frame`](Self::advance_frame), so every pass a test observes is
/// one it asked for.
pub struct TestSystem {
    system: System,
    scheduler: Rc<ManualScheduler>,
    clock: Rc<ManualClock>,
}

impl TestSystem {
    pub fn new(controller: impl FnMut(&Context) -> TraversalResult + 'static) -> Self {
        let scheduler = Rc::new(ManualScheduler::new());
        let clock = Rc::new(ManualClock::default());
        let host_scheduler: Rc<dyn HostScheduler> = scheduler.clone();
        let host_clock: Rc<dyn Clock> = clock.clone();
        let system = System::with_host(controller, host_scheduler, host_clock);
        Self {
            system,
            scheduler,
            clock,
        }
    }

    pub fn with_config(mut self, config: SystemConfig) -> Self {
        self.system = self.system.with_config(config);
        self
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn root(&self) -> ComponentHandle {
        self.system.root()
    }

    /// Run refresh passes until the root is clean.
    pub fn refresh(&mut self) -> TraversalResult<usize> {
        self.system.refresh()
    }

    pub fn dispatch_to<E: Any>(
        &mut self,
        target: &ComponentHandle,
        event: E,
    ) -> TraversalResult<E> {
        let event = self.system.dispatch_targeted(target, event)?;
        self.pump_until_idle()?;
        Ok(event)
    }

    pub fn broadcast<E: Any>(&mut self, event: E) -> TraversalResult<E> {
        let event = self.system.broadcast(event)?;
        self.pump_until_idle()?;
        Ok(event)
    }

    /// Move the clock forward and deliver every timer that came due. Returns
    /// the number of timer passes run.
    pub fn advance_time(&mut self, millis: u64) -> TraversalResult<usize> {
        self.clock.advance(millis);
        let fired = self.fire_due_timers()?;
        self.pump_until_idle()?;
        Ok(fired)
    }

    /// Move the clock forward and run one animation frame if one was
    /// requested. Returns whether a frame ran.
    pub fn advance_frame(&mut self, millis: u64) -> TraversalResult<bool> {
        self.clock.advance(millis);
        let requested = self.scheduler.take_animation_request();
        if requested {
            self.system.refresh()?;
        }
        self.pump_until_idle()?;
        Ok(requested)
    }

    /// Drive the system until the root is clean and no timer is due at the
    /// current tick.
    ///
    /// Panics when the system keeps producing work; that is a feedback loop in
    /// the code under test.
    pub fn pump_until_idle(&mut self) -> TraversalResult {
        for _ in 0..MAX_PUMP_ITERATIONS {
            let mut progressed = false;
            if self.system.needs_refresh() {
                log::debug!("pump_until_idle: root is dirty");
                self.system.refresh()?;
                progressed = true;
            }
            if self.fire_due_timers()? > 0 {
                log::debug!("pump_until_idle: delivered due timers");
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
        panic!("pump_until_idle looped too many times!");
    }

    fn fire_due_timers(&mut self) -> TraversalResult<usize> {
        let now = self.clock.now_millis();
        let due = self.scheduler.take_due(now);
        for (target, tick) in &due {
            self.system.fire_timer(target, *tick)?;
        }
        Ok(due.len())
    }
}

/// Convenience helper for tests that only need temporary access to a
/// [`TestSystem`].
pub fn run_test_system<R>(
    controller: impl FnMut(&Context) -> TraversalResult + 'static,
    f: impl FnOnce(&mut TestSystem) -> R,
) -> R {
    let mut system = TestSystem::new(controller);
    f(&mut system)
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
