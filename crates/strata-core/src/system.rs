//! Pass driver: owns the data graph and the root component and turns host
//! requests into refresh and event passes.

use crate::component::{ComponentContainer, ComponentHandle, ComponentPath};
use crate::context::Context;
use crate::data_graph::{DataTraversal, DataTraversalOptions, GraphHost};
use crate::error::{TraversalError, TraversalResult};
use crate::event::{EventTraversal, PassKind, RefreshEvent};
use crate::platform::{Clock, HostScheduler, NoopScheduler, SystemClock};
use crate::timer::TimerEvent;
use std::any::Any;
use std::rc::Rc;

/// Application entry point run on every pass.
pub type Controller = Box<dyn FnMut(&Context) -> TraversalResult>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    /// Upper bound on back-to-back refresh passes in [`System::refresh`].
    pub max_refresh_passes: usize,
    /// Refresh after a dispatch that left the root dirty.
    pub refresh_after_dispatch: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_refresh_passes: 16,
            refresh_after_dispatch: true,
        }
    }
}

impl SystemConfig {
    pub fn with_max_refresh_passes(mut self, passes: usize) -> Self {
        self.max_refresh_passes = passes.max(1);
        self
    }

    pub fn with_refresh_after_dispatch(mut self, enabled: bool) -> Self {
        self.refresh_after_dispatch = enabled;
        self
    }
}

/// What application code can reach of the running system.
#[derive(Clone)]
pub struct SystemHandle {
    scheduler: Rc<dyn HostScheduler>,
    root: ComponentHandle,
}

impl SystemHandle {
    pub fn root(&self) -> &ComponentHandle {
        &self.root
    }

    pub fn schedule_animation_refresh(&self) {
        self.scheduler.schedule_animation_refresh();
    }

    pub fn schedule_timer_event(&self, target: ComponentHandle, trigger_tick: u64) {
        self.scheduler.schedule_timer_event(target, trigger_tick);
    }
}

pub struct System {
    graph: Rc<GraphHost>,
    root: ComponentContainer,
    controller: Controller,
    scheduler: Rc<dyn HostScheduler>,
    clock: Rc<dyn Clock>,
    config: SystemConfig,
    passes: u64,
}

impl System {
    /// System with no host scheduling and a wall clock.
    pub fn new(controller: impl FnMut(&Context) -> TraversalResult + 'static) -> Self {
        Self::with_host(controller, Rc::new(NoopScheduler), Rc::new(SystemClock::new()))
    }

    pub fn with_host(
        controller: impl FnMut(&Context) -> TraversalResult + 'static,
        scheduler: Rc<dyn HostScheduler>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            graph: GraphHost::new(),
            root: ComponentContainer::new(),
            controller: Box::new(controller),
            scheduler,
            clock,
            config: SystemConfig::default(),
            passes: 0,
        }
    }

    pub fn with_config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn graph(&self) -> &Rc<GraphHost> {
        &self.graph
    }

    pub fn root(&self) -> ComponentHandle {
        self.root.handle()
    }

    pub fn handle(&self) -> SystemHandle {
        SystemHandle {
            scheduler: Rc::clone(&self.scheduler),
            root: self.root.handle(),
        }
    }

    /// Number of passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    pub fn needs_refresh(&self) -> bool {
        self.root.is_dirty()
    }

    pub fn is_animating(&self) -> bool {
        self.root.is_animating()
    }

    /// Run one pass of `kind` carrying `event`, returning the payload after
    /// handlers have seen it.
    ///
    /// Garbage collection and cache clearing are enabled only for refresh
    /// passes. An abort ends an event pass successfully.
    pub fn run_pass(
        &mut self,
        kind: PassKind,
        event: Box<dyn Any>,
        target: Option<&ComponentHandle>,
    ) -> TraversalResult<Box<dyn Any>> {
        let path = match (kind, target) {
            (PassKind::Targeted, Some(target)) => target
                .upgrade()
                .map(|container| container.path_from_root())
                .unwrap_or_default(),
            _ => ComponentPath::new(),
        };
        let events = EventTraversal::from_boxed(kind, path, event, "<boxed event>");
        self.execute(kind, events)
    }

    fn execute(&mut self, kind: PassKind, events: EventTraversal) -> TraversalResult<Box<dyn Any>> {
        let options = if kind == PassKind::Refresh {
            DataTraversalOptions::refresh()
        } else {
            DataTraversalOptions::event()
        };
        let tick = self.clock.now_millis();
        self.passes += 1;
        log::debug!(
            "pass {} ({kind:?}, {}) at tick {tick}",
            self.passes,
            events.event_type_name()
        );

        let handle = self.handle();
        let root = self.root.clone();
        let controller = &mut self.controller;
        let result = DataTraversal::traverse(&self.graph, options, |data| {
            let ctx = Context::new()
                .with_data(data.clone())
                .with_events(events.clone())
                .with_tick(tick)
                .with_system(handle);
            let _root = events.begin_component(&root);
            controller(&ctx)
        });

        match result {
            Ok(()) => {}
            Err(TraversalError::Aborted) if kind != PassKind::Refresh => {
                log::debug!("pass {} aborted by a handler", self.passes);
            }
            Err(error) => {
                log::error!("pass {} failed: {error}", self.passes);
                return Err(error);
            }
        }

        if kind == PassKind::Refresh && self.root.is_animating() {
            self.scheduler.schedule_animation_refresh();
        }
        Ok(events
            .take_event()
            .unwrap_or_else(|| Box::new(()) as Box<dyn Any>))
    }

    /// Refresh until the root is clean. Returns the number of passes run.
    pub fn refresh(&mut self) -> TraversalResult<usize> {
        for pass in 1..=self.config.max_refresh_passes {
            let events = EventTraversal::new(PassKind::Refresh, ComponentPath::new(), RefreshEvent);
            self.execute(PassKind::Refresh, events)?;
            if !self.root.is_dirty() {
                return Ok(pass);
            }
        }
        let passes = self.config.max_refresh_passes;
        log::error!("root still dirty after {passes} refresh passes");
        Err(TraversalError::RefreshOverrun { passes })
    }

    /// Deliver `event` along the path to `target` and return it.
    pub fn dispatch_targeted<E: Any>(
        &mut self,
        target: &ComponentHandle,
        event: E,
    ) -> TraversalResult<E> {
        let path = target
            .upgrade()
            .map(|container| container.path_from_root())
            .unwrap_or_default();
        if path.is_empty() {
            log::debug!("dispatch to dropped component {}", target.id());
        }
        let events = EventTraversal::new(PassKind::Targeted, path, event);
        self.finish_dispatch(PassKind::Targeted, events)
    }

    /// Deliver `event` to every component and return it.
    pub fn broadcast<E: Any>(&mut self, event: E) -> TraversalResult<E> {
        let events = EventTraversal::new(PassKind::Broadcast, ComponentPath::new(), event);
        self.finish_dispatch(PassKind::Broadcast, events)
    }

    /// Deliver a timer expiry to the component that started the timer.
    pub fn fire_timer(&mut self, target: &ComponentHandle, trigger_tick: u64) -> TraversalResult {
        self.dispatch_targeted(target, TimerEvent { trigger_tick })
            .map(|_| ())
    }

    fn finish_dispatch<E: Any>(
        &mut self,
        kind: PassKind,
        events: EventTraversal,
    ) -> TraversalResult<E> {
        let payload = self.execute(kind, events)?;
        if self.config.refresh_after_dispatch && self.root.is_dirty() {
            self.refresh()?;
        }
        match payload.downcast::<E>() {
            Ok(event) => Ok(*event),
            Err(_) => unreachable!("event payload replaced during dispatch"),
        }
    }
}
