//! Host platform abstraction.
//!
//! The engine never blocks and never owns an event loop. It asks the host to
//! call back into [`System`](crate::System) later, either for another
//! animation frame or for a timer that targets one component.

use crate::component::ComponentHandle;
use std::time::Instant;

/// Schedules future passes on behalf of the engine.
pub trait HostScheduler {
    /// Request another refresh pass on the next animation frame.
    fn schedule_animation_refresh(&self);

    /// Request that [`System::fire_timer`](crate::System::fire_timer) be called
    /// for `target` once the tick counter reaches `trigger_tick`.
    fn schedule_timer_event(&self, target: ComponentHandle, trigger_tick: u64);
}

/// Millisecond tick source sampled once per pass.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// Clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Scheduler that drops every request; useful for hosts that drive refreshes
/// themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl HostScheduler for NoopScheduler {
    fn schedule_animation_refresh(&self) {}

    fn schedule_timer_event(&self, _target: ComponentHandle, _trigger_tick: u64) {}
}
