//! Per-pass context handed to application code.
//!
//! A context is a bundle of optional capabilities. Code that needs a capability
//! asks for it through an accessor; asking for one the context does not carry
//! is a programming error and panics with the capability's name.

use crate::component::ComponentContainer;
use crate::data_graph::{DataTraversal, NamingContext, SwitchBlock};
use crate::error::{TraversalError, TraversalResult};
use crate::event::{ComponentFacts, ComponentScope, EventTraversal};
use crate::identity::Identity;
use crate::owned::Owned;
use crate::system::SystemHandle;
use bitflags::bitflags;
use std::any::Any;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const DATA = 1 << 0;
        const EVENTS = 1 << 1;
        const TICK = 1 << 2;
        const SYSTEM = 1 << 3;
    }
}

#[derive(Clone, Default)]
pub struct Context {
    data: Option<DataTraversal>,
    events: Option<EventTraversal>,
    tick: Option<u64>,
    system: Option<SystemHandle>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: DataTraversal) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_events(mut self, events: EventTraversal) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_system(mut self, system: SystemHandle) -> Self {
        self.system = Some(system);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::DATA, self.data.is_some());
        caps.set(Capabilities::EVENTS, self.events.is_some());
        caps.set(Capabilities::TICK, self.tick.is_some());
        caps.set(Capabilities::SYSTEM, self.system.is_some());
        caps
    }

    pub fn has(&self, caps: Capabilities) -> bool {
        self.capabilities().contains(caps)
    }

    /// Copy of this context restricted to `keep`.
    pub fn narrow(&self, keep: Capabilities) -> Self {
        Self {
            data: self.data.clone().filter(|_| keep.contains(Capabilities::DATA)),
            events: self
                .events
                .clone()
                .filter(|_| keep.contains(Capabilities::EVENTS)),
            tick: self.tick.filter(|_| keep.contains(Capabilities::TICK)),
            system: self
                .system
                .clone()
                .filter(|_| keep.contains(Capabilities::SYSTEM)),
        }
    }

    pub fn try_data(&self) -> Option<&DataTraversal> {
        self.data.as_ref()
    }

    pub fn try_events(&self) -> Option<&EventTraversal> {
        self.events.as_ref()
    }

    pub fn try_tick(&self) -> Option<u64> {
        self.tick
    }

    pub fn try_system(&self) -> Option<&SystemHandle> {
        self.system.as_ref()
    }

    pub fn data(&self) -> &DataTraversal {
        self.data
            .as_ref()
            .unwrap_or_else(|| missing(Capabilities::DATA))
    }

    pub fn events(&self) -> &EventTraversal {
        self.events
            .as_ref()
            .unwrap_or_else(|| missing(Capabilities::EVENTS))
    }

    pub fn tick(&self) -> u64 {
        self.tick.unwrap_or_else(|| missing(Capabilities::TICK))
    }

    pub fn system(&self) -> &SystemHandle {
        self.system
            .as_ref()
            .unwrap_or_else(|| missing(Capabilities::SYSTEM))
    }

    // ── data ────────────────────────────────────────────────────────────────

    pub fn get_data<T: Default + 'static>(&self) -> (Owned<T>, bool) {
        self.data().get_data()
    }

    pub fn get_data_with<T: 'static>(&self, init: impl FnOnce() -> T) -> (Owned<T>, bool) {
        self.data().get_data_with(init)
    }

    pub fn get_cached_data<T: Default + 'static>(&self) -> (Owned<T>, bool) {
        self.data().get_cached_data()
    }

    pub fn get_cached_data_with<T: 'static>(&self, init: impl FnOnce() -> T) -> (Owned<T>, bool) {
        self.data().get_cached_data_with(init)
    }

    pub fn scoped<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
        self.data().scoped(|_| f(self))
    }

    pub fn if_<R>(
        &self,
        condition: bool,
        f: impl FnOnce(&Context) -> TraversalResult<R>,
    ) -> TraversalResult<Option<R>> {
        self.data().if_(condition, |_| f(self))
    }

    pub fn if_else<R>(
        &self,
        condition: bool,
        then: impl FnOnce(&Context) -> TraversalResult<R>,
        otherwise: impl FnOnce(&Context) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        self.data()
            .if_else(condition, |_| then(self), |_| otherwise(self))
    }

    pub fn for_each<I, F>(&self, items: I, mut body: F) -> TraversalResult
    where
        I: IntoIterator,
        F: FnMut(&Context, I::Item) -> TraversalResult,
    {
        self.data().for_each(items, |_, item| body(self, item))
    }

    pub fn for_each_keyed<I, K, KF, F>(&self, items: I, key: KF, mut body: F) -> TraversalResult
    where
        I: IntoIterator,
        K: Identity,
        KF: FnMut(&I::Item) -> K,
        F: FnMut(&Context, I::Item) -> TraversalResult,
    {
        self.data()
            .for_each_keyed(items, key, |_, item| body(self, item))
    }

    pub fn while_<C, F>(&self, condition: C, mut body: F) -> TraversalResult
    where
        C: FnMut() -> bool,
        F: FnMut(&Context) -> TraversalResult,
    {
        self.data().while_(condition, |_| body(self))
    }

    /// Open a naming context. Blocks opened through it run with the same
    /// traversal as this context, so `self` stays usable inside them.
    pub fn naming_context<R>(&self, f: impl FnOnce(&NamingContext<'_>) -> R) -> R {
        self.data().naming_context(f)
    }

    pub fn switch<R>(&self, f: impl FnOnce(&SwitchBlock<'_>) -> R) -> R {
        self.data().switch(f)
    }

    pub fn with_gc_disabled<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
        self.data().with_gc_disabled(|_| f(self))
    }

    pub fn with_cache_clearing_disabled<R>(&self, f: impl FnOnce(&Context) -> R) -> R {
        self.data().with_cache_clearing_disabled(|_| f(self))
    }

    // ── components and events ───────────────────────────────────────────────

    /// Enter the component whose container lives at the current call site.
    pub fn begin_component(&self) -> ComponentScope {
        let (slot, _) = self.data().get_data::<ComponentContainer>();
        let container = slot.get();
        self.events().begin_component(&container)
    }

    /// Run `f` as a component: a container slot followed by a content block.
    pub fn component<R>(
        &self,
        f: impl FnOnce(&Context, ComponentFacts) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        let scope = self.begin_component();
        let facts = scope.facts();
        let result = self.data().scoped(|_| f(self, facts));
        drop(scope);
        result
    }

    pub fn facts(&self) -> ComponentFacts {
        self.events().facts()
    }

    pub fn is_refresh(&self) -> bool {
        self.events().is_refresh()
    }

    pub fn active_container(&self) -> Option<ComponentContainer> {
        self.events().active_container()
    }

    /// Request a refresh of the active component and its ancestors.
    pub fn mark_dirty(&self) {
        if let Some(container) = self.active_container() {
            container.mark_dirty();
        }
    }

    /// Tick of the current pass. Marks the active component as animating so
    /// the host keeps scheduling frames while it is read.
    pub fn animation_tick(&self) -> u64 {
        if let Some(container) = self.active_container() {
            container.mark_animating();
        }
        self.tick()
    }

    /// Handle the pass payload if it is an `E` and the active component is on
    /// the route.
    pub fn on_event<E: Any, R>(&self, f: impl FnOnce(&Context, &mut E) -> R) -> Option<R> {
        let events = self.events();
        if !events.facts().on_route {
            return None;
        }
        events.with_event(|event| f(self, event))
    }

    /// Handle the pass payload only when the active component is the target.
    pub fn on_targeted_event<E: Any, R>(
        &self,
        f: impl FnOnce(&Context, &mut E) -> R,
    ) -> Option<R> {
        let events = self.events();
        if !events.facts().is_target {
            return None;
        }
        events.with_event(|event| f(self, event))
    }

    /// See [`EventTraversal::abort`].
    pub fn abort_traversal(&self) -> TraversalError {
        self.events().abort()
    }
}

fn missing(capability: Capabilities) -> ! {
    panic!("context is missing the {capability:?} capability")
}
