use crate::context::Context;
use crate::owned::Owned;

/// Payload of a timer pass, targeted at the component that started the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub trigger_tick: u64,
}

#[derive(Debug, Default)]
struct TimerState {
    expiry: Option<u64>,
}

/// One-shot timer stored at the current call site.
pub struct Timer<'a> {
    ctx: &'a Context,
    state: Owned<TimerState>,
}

impl Context {
    pub fn timer(&self) -> Timer<'_> {
        let (state, _) = self.get_data::<TimerState>();
        Timer { ctx: self, state }
    }
}

impl Timer<'_> {
    pub fn is_active(&self) -> bool {
        self.state.with(|state| state.expiry.is_some())
    }

    pub fn expiry(&self) -> Option<u64> {
        self.state.with(|state| state.expiry)
    }

    /// Arm the timer to fire `delay_ms` after the current tick. Restarting an
    /// armed timer replaces its expiry; the stale event is ignored.
    pub fn start(&self, delay_ms: u64) {
        let trigger_tick = self.ctx.tick().saturating_add(delay_ms);
        self.state.update(|state| state.expiry = Some(trigger_tick));
        let Some(container) = self.ctx.active_container() else {
            log::warn!("timer started outside a component; it will never fire");
            return;
        };
        if let Some(system) = self.ctx.try_system() {
            system.schedule_timer_event(container.handle(), trigger_tick);
        }
    }

    pub fn stop(&self) {
        self.state.update(|state| state.expiry = None);
    }

    /// True once, in the pass delivering this timer's expiry to its component.
    pub fn is_triggered(&self) -> bool {
        let Some(expiry) = self.expiry() else {
            return false;
        };
        let fired = self
            .ctx
            .on_targeted_event(|_, event: &mut TimerEvent| event.trigger_tick == expiry)
            .unwrap_or(false);
        if fired {
            self.stop();
        }
        fired
    }
}
