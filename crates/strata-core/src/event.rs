//! Event routing through the component tree.
//!
//! Every pass is an event pass: refresh passes carry [`RefreshEvent`] and visit
//! everything, broadcast passes deliver to every component, and targeted passes
//! follow the container path from the root to one component.

use crate::component::{ComponentContainer, ComponentId, ComponentPath};
use crate::error::TraversalError;
use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Refresh,
    Broadcast,
    Targeted,
}

/// Payload of a refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshEvent;

/// What a component learns about itself when the traversal enters it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentFacts {
    /// The container was dirty when entered.
    pub was_dirty: bool,
    /// The container requested animation frames before this pass.
    pub was_animating: bool,
    /// The container lies on the path to the event target, or the pass is
    /// not targeted.
    pub on_route: bool,
    /// The container is the event target.
    pub is_target: bool,
}

struct EventTraversalCore {
    kind: PassKind,
    path: ComponentPath,
    consumed: Cell<usize>,
    event_type: TypeId,
    event_type_name: &'static str,
    event: RefCell<Option<Box<dyn Any>>>,
    aborted: Cell<bool>,
    active: RefCell<Option<ComponentContainer>>,
    facts: Cell<ComponentFacts>,
}

/// Routing state of one pass. Cloning shares the state.
#[derive(Clone)]
pub struct EventTraversal {
    core: Rc<EventTraversalCore>,
}

impl EventTraversal {
    pub(crate) fn new<E: Any>(kind: PassKind, path: ComponentPath, event: E) -> Self {
        Self::from_boxed(kind, path, Box::new(event), type_name::<E>())
    }

    pub(crate) fn from_boxed(
        kind: PassKind,
        path: ComponentPath,
        event: Box<dyn Any>,
        event_type_name: &'static str,
    ) -> Self {
        Self {
            core: Rc::new(EventTraversalCore {
                kind,
                path,
                consumed: Cell::new(0),
                event_type: (*event).type_id(),
                event_type_name,
                event: RefCell::new(Some(event)),
                aborted: Cell::new(false),
                active: RefCell::new(None),
                facts: Cell::new(ComponentFacts {
                    on_route: true,
                    ..ComponentFacts::default()
                }),
            }),
        }
    }

    pub fn kind(&self) -> PassKind {
        self.core.kind
    }

    pub fn is_refresh(&self) -> bool {
        self.core.kind == PassKind::Refresh
    }

    pub fn is_targeted(&self) -> bool {
        self.core.kind == PassKind::Targeted
    }

    pub fn event_type_name(&self) -> &'static str {
        self.core.event_type_name
    }

    pub fn event_is<E: Any>(&self) -> bool {
        self.core.event_type == TypeId::of::<E>()
    }

    /// Run `f` against the payload if it is an `E`.
    pub fn with_event<E: Any, R>(&self, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        if !self.event_is::<E>() {
            return None;
        }
        let mut event = self.core.event.borrow_mut().take()?;
        let result = event.downcast_mut::<E>().map(f);
        *self.core.event.borrow_mut() = Some(event);
        result
    }

    pub(crate) fn take_event(&self) -> Option<Box<dyn Any>> {
        self.core.event.borrow_mut().take()
    }

    /// Stop the current pass. The caller returns the error; the driver treats
    /// it as a successful dispatch.
    ///
    /// # Panics
    ///
    /// Panics during a refresh pass, which must always run to completion.
    pub fn abort(&self) -> TraversalError {
        assert!(
            !self.is_refresh(),
            "abort_traversal called during a refresh pass"
        );
        self.core.aborted.set(true);
        TraversalError::Aborted
    }

    pub fn is_aborted(&self) -> bool {
        self.core.aborted.get()
    }

    pub fn active_container(&self) -> Option<ComponentContainer> {
        self.core.active.borrow().clone()
    }

    /// Facts of the innermost component currently entered.
    pub fn facts(&self) -> ComponentFacts {
        self.core.facts.get()
    }

    /// Target path has been fully consumed.
    pub fn target_reached(&self) -> bool {
        self.core.consumed.get() >= self.core.path.len()
    }

    /// Enter `container` as a child of the currently active one.
    pub fn begin_component(&self, container: &ComponentContainer) -> ComponentScope {
        let parent = self.active_container();
        container.set_parent(parent.as_ref());

        let refresh = self.is_refresh();
        let was_dirty = if refresh {
            container.take_dirty()
        } else {
            container.is_dirty()
        };
        let was_animating = if refresh {
            container.take_animating()
        } else {
            container.is_animating()
        };

        let (on_route, is_target) = match self.core.kind {
            PassKind::Refresh | PassKind::Broadcast => (true, false),
            PassKind::Targeted if parent.is_none() && self.core.path.is_empty() => (true, false),
            PassKind::Targeted => self.consume_path(container.id()),
        };

        let facts = ComponentFacts {
            was_dirty,
            was_animating,
            on_route,
            is_target,
        };
        let previous = self.core.active.replace(Some(container.clone()));
        let previous_facts = self.core.facts.replace(facts);
        ComponentScope {
            events: self.clone(),
            previous,
            previous_facts,
            facts,
        }
    }

    fn consume_path(&self, id: ComponentId) -> (bool, bool) {
        let index = self.core.consumed.get();
        if self.core.path.get(index) == Some(&id) {
            self.core.consumed.set(index + 1);
            (true, index + 1 == self.core.path.len())
        } else {
            (false, false)
        }
    }
}

/// Restores the enclosing component when dropped.
pub struct ComponentScope {
    events: EventTraversal,
    previous: Option<ComponentContainer>,
    previous_facts: ComponentFacts,
    facts: ComponentFacts,
}

impl ComponentScope {
    pub fn facts(&self) -> ComponentFacts {
        self.facts
    }
}

impl Drop for ComponentScope {
    fn drop(&mut self) {
        if let Ok(mut active) = self.events.core.active.try_borrow_mut() {
            *active = self.previous.take();
        }
        self.events.core.facts.set(self.previous_facts);
    }
}
