//! Identity values: opaque, cloneable, totally ordered tokens that say whether
//! something has conceptually changed between passes.
//!
//! Any `Clone + Ord + Debug + 'static` type is an identity. Identities of
//! different concrete types never compare equal; across types they are ordered
//! by `TypeId` so they can share one ordered map.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

pub trait Identity: Any + fmt::Debug {
    /// Long-lived clone of this identity.
    fn clone_id(&self) -> Box<dyn Identity>;

    /// Deep-copy this identity into `target` if it already holds the same type.
    /// Returns `false` (and leaves `target` untouched) on a type mismatch.
    fn copy_into(&self, target: &mut dyn Identity) -> bool;

    fn id_eq(&self, other: &dyn Identity) -> bool;

    fn id_cmp(&self, other: &dyn Identity) -> Ordering;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Identity for T
where
    T: Any + Clone + Ord + fmt::Debug,
{
    fn clone_id(&self) -> Box<dyn Identity> {
        Box::new(self.clone())
    }

    fn copy_into(&self, target: &mut dyn Identity) -> bool {
        match target.as_any_mut().downcast_mut::<T>() {
            Some(existing) => {
                existing.clone_from(self);
                true
            }
            None => false,
        }
    }

    fn id_eq(&self, other: &dyn Identity) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn id_cmp(&self, other: &dyn Identity) -> Ordering {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self.cmp(other),
            None => self
                .as_any()
                .type_id()
                .cmp(&other.as_any().type_id()),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PartialEq for dyn Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id_eq(other)
    }
}

impl Eq for dyn Identity {}

impl PartialOrd for dyn Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.id_cmp(other))
    }
}

impl Ord for dyn Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id_cmp(other)
    }
}

/// Synthetic identity used for the default arm of a switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefaultCase;

/// Owns a long-lived copy of an identity handed over for the duration of a call.
#[derive(Default)]
pub struct CapturedId {
    id: Option<Box<dyn Identity>>,
}

impl CapturedId {
    pub fn new(id: &dyn Identity) -> Self {
        Self {
            id: Some(id.clone_id()),
        }
    }

    /// Store `id`, reusing the existing allocation when the type is unchanged.
    pub fn capture(&mut self, id: &dyn Identity) {
        if let Some(existing) = self.id.as_mut() {
            if id.copy_into(&mut **existing) {
                return;
            }
        }
        self.id = Some(id.clone_id());
    }

    pub fn matches(&self, id: &dyn Identity) -> bool {
        self.id.as_deref().is_some_and(|captured| captured.id_eq(id))
    }

    pub fn is_captured(&self) -> bool {
        self.id.is_some()
    }

    pub fn get(&self) -> Option<&dyn Identity> {
        self.id.as_deref()
    }

    pub fn clear(&mut self) {
        self.id = None;
    }
}

impl Clone for CapturedId {
    fn clone(&self) -> Self {
        Self {
            id: self.id.as_deref().map(Identity::clone_id),
        }
    }
}

impl fmt::Debug for CapturedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id.as_deref() {
            Some(id) => write!(f, "CapturedId({id:?})"),
            None => f.write_str("CapturedId(<none>)"),
        }
    }
}
