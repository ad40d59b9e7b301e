//! Component containers: the event-routing skeleton of the tree.
//!
//! A container lives in a data slot of its component and links to the
//! container that enclosed it on the last pass. Dirty and animating flags
//! propagate upward along those links so a driver only has to look at the root.

use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_COMPONENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Process-unique container identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(usize);

impl ComponentId {
    fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type ComponentPath = SmallVec<[ComponentId; 16]>;

struct ContainerInner {
    id: ComponentId,
    parent: RefCell<Weak<ContainerInner>>,
    dirty: Cell<bool>,
    animating: Cell<bool>,
}

#[derive(Clone)]
pub struct ComponentContainer {
    inner: Rc<ContainerInner>,
}

impl Default for ComponentContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentContainer {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ContainerInner {
                id: ComponentId::next(),
                parent: RefCell::new(Weak::new()),
                dirty: Cell::new(false),
                animating: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.inner.id
    }

    pub fn handle(&self) -> ComponentHandle {
        ComponentHandle {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn parent(&self) -> Option<ComponentContainer> {
        self.inner
            .parent
            .borrow()
            .upgrade()
            .map(|inner| ComponentContainer { inner })
    }

    /// Re-link to `parent`. Returns whether the link changed.
    pub(crate) fn set_parent(&self, parent: Option<&ComponentContainer>) -> bool {
        let mut link = self.inner.parent.borrow_mut();
        let unchanged = match (link.upgrade(), parent) {
            (Some(current), Some(parent)) => Rc::ptr_eq(&current, &parent.inner),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return false;
        }
        *link = parent.map_or_else(Weak::new, |parent| Rc::downgrade(&parent.inner));
        log::trace!(
            "component {} reparented under {:?}",
            self.inner.id,
            parent.map(ComponentContainer::id)
        );
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_animating(&self) -> bool {
        self.inner.animating.get()
    }

    /// Flag this container and its ancestors for refresh.
    pub fn mark_dirty(&self) {
        propagate(&self.inner, |inner| &inner.dirty);
    }

    /// Flag this container and its ancestors as wanting animation frames.
    pub fn mark_animating(&self) {
        propagate(&self.inner, |inner| &inner.animating);
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.inner.dirty.replace(false)
    }

    pub(crate) fn take_animating(&self) -> bool {
        self.inner.animating.replace(false)
    }

    /// Container ids from the root down to this container.
    pub(crate) fn path_from_root(&self) -> ComponentPath {
        let mut path = ComponentPath::new();
        path.push(self.inner.id);
        let mut current = self.inner.parent.borrow().upgrade();
        while let Some(inner) = current {
            path.push(inner.id);
            current = inner.parent.borrow().upgrade();
        }
        path.reverse();
        path
    }
}

/// Set the flag on `start` and its ancestors, stopping at the first one that
/// already has it set.
fn propagate(start: &Rc<ContainerInner>, flag: impl Fn(&ContainerInner) -> &Cell<bool>) {
    let mut current = Some(Rc::clone(start));
    while let Some(inner) = current {
        if flag(&inner).replace(true) {
            break;
        }
        current = inner.parent.borrow().upgrade();
    }
}

impl fmt::Debug for ComponentContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContainer")
            .field("id", &self.inner.id)
            .field("dirty", &self.inner.dirty.get())
            .field("animating", &self.inner.animating.get())
            .finish()
    }
}

/// Non-owning reference to a container, used to target events at it.
#[derive(Clone)]
pub struct ComponentHandle {
    id: ComponentId,
    inner: Weak<ContainerInner>,
}

impl ComponentHandle {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn upgrade(&self) -> Option<ComponentContainer> {
        self.inner.upgrade().map(|inner| ComponentContainer { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Mark the container dirty if it still exists.
    pub fn mark_dirty(&self) -> bool {
        self.upgrade().map(|c| c.mark_dirty()).is_some()
    }

    pub fn mark_animating(&self) -> bool {
        self.upgrade().map(|c| c.mark_animating()).is_some()
    }
}

impl PartialEq for ComponentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentHandle {}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
