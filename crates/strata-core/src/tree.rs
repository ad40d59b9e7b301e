//! Ordered-tree reconciler.
//!
//! Application code declares, on every refresh pass, the children each node
//! should have and in what order. The reconciler compares that declaration with
//! the physical sibling lists kept in its arena and issues the minimal
//! [`PlacedObject::relocate`] and [`PlacedObject::remove`] calls to make the
//! backend match.
//!
//! Placement is settled when a child list closes: physical children that were
//! not declared are detached, then each declared child that is not already
//! behind its declared predecessor is relocated there. Detached children get
//! their `remove` call only once the whole pass is over and nothing re-declared
//! them, so a node moving to a list that closes later is relocated once.

use crate::data_graph::DataTraversal;
use crate::error::TraversalResult;
use crate::identity::{CapturedId, Identity};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// Backend object owned by a tree node.
pub trait PlacedObject: 'static {
    /// Insert or move this object under `parent`, directly after `after` or
    /// first when `after` is `None`.
    fn relocate(&mut self, parent: &Self, after: Option<&Self>);

    /// Detach this object from its current parent.
    fn remove(&mut self);
}

new_key_type! {
    pub struct TreeNodeId;
}

/// The link that points at a node: its parent's child head or its previous
/// sibling's `next`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SiblingSlot {
    ChildrenOf(TreeNodeId),
    NextOf(TreeNodeId),
}

struct TreeNode<O> {
    object: O,
    parent: Option<TreeNodeId>,
    /// `None` while the node is not placed.
    prev: Option<SiblingSlot>,
    next: Option<TreeNodeId>,
    children: Option<TreeNodeId>,
    /// Parent that declared this node, and in which pass.
    claim: Option<(TreeNodeId, u64)>,
    /// List close that last placed this node.
    placed_in: u64,
}

struct TreeArena<O> {
    nodes: SlotMap<TreeNodeId, TreeNode<O>>,
    root: TreeNodeId,
    pass: u64,
    list_closes: u64,
    /// Detached this pass without a `remove` call yet.
    pending_removal: Vec<TreeNodeId>,
}

type Graveyard = Rc<RefCell<Vec<TreeNodeId>>>;

struct TreeHost<O> {
    arena: RefCell<TreeArena<O>>,
    graveyard: Graveyard,
}

/// Shared handle to a reconciled tree.
pub struct Tree<O: PlacedObject> {
    host: Rc<TreeHost<O>>,
}

impl<O: PlacedObject> Clone for Tree<O> {
    fn clone(&self) -> Self {
        Self {
            host: Rc::clone(&self.host),
        }
    }
}

impl<O> TreeArena<O>
where
    O: PlacedObject,
{
    fn slot_target(&self, slot: SiblingSlot) -> Option<TreeNodeId> {
        match slot {
            SiblingSlot::ChildrenOf(parent) => self.nodes.get(parent)?.children,
            SiblingSlot::NextOf(prev) => self.nodes.get(prev)?.next,
        }
    }

    fn set_slot(&mut self, slot: SiblingSlot, target: Option<TreeNodeId>) {
        match slot {
            SiblingSlot::ChildrenOf(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent) {
                    parent.children = target;
                }
            }
            SiblingSlot::NextOf(prev) => {
                if let Some(prev) = self.nodes.get_mut(prev) {
                    prev.next = target;
                }
            }
        }
    }

    fn unlink(&mut self, id: TreeNodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let Some(prev) = node.prev.take() else {
            return;
        };
        let next = node.next.take();
        node.parent = None;
        self.set_slot(prev, next);
        if let Some(next) = next.and_then(|next| self.nodes.get_mut(next)) {
            next.prev = Some(prev);
        }
    }

    fn link_at(&mut self, id: TreeNodeId, slot: SiblingSlot, parent: TreeNodeId) {
        let next = self.slot_target(slot);
        if let Some(next) = next.and_then(|next| self.nodes.get_mut(next)) {
            next.prev = Some(SiblingSlot::NextOf(id));
        }
        self.set_slot(slot, Some(id));
        if let Some(node) = self.nodes.get_mut(id) {
            node.prev = Some(slot);
            node.next = next;
            node.parent = Some(parent);
        }
    }

    fn relocate_object(&mut self, id: TreeNodeId, parent: TreeNodeId, after: Option<TreeNodeId>) {
        match after {
            Some(after) => {
                if let Some([node, parent, after]) = self.nodes.get_disjoint_mut([id, parent, after]) {
                    node.object.relocate(&parent.object, Some(&after.object));
                }
            }
            None => {
                if let Some([node, parent]) = self.nodes.get_disjoint_mut([id, parent]) {
                    node.object.relocate(&parent.object, None);
                }
            }
        }
    }

    fn children_of(&self, parent: TreeNodeId) -> SmallVec<[TreeNodeId; 8]> {
        let mut children = SmallVec::new();
        let mut cursor = self.nodes.get(parent).and_then(|node| node.children);
        while let Some(id) = cursor {
            children.push(id);
            cursor = self.nodes.get(id).and_then(|node| node.next);
        }
        children
    }

    /// Make the physical children of `parent` match `declared`.
    fn close_list(&mut self, parent: TreeNodeId, declared: &[TreeNodeId]) {
        let claim = Some((parent, self.pass));
        for id in self.children_of(parent) {
            match self.nodes[id].claim {
                current if current == claim => {}
                // Declared under another parent this pass; that list relocates it.
                Some((_, pass)) if pass == self.pass => self.unlink(id),
                _ => {
                    self.unlink(id);
                    self.pending_removal.push(id);
                }
            }
        }

        self.list_closes += 1;
        let close = self.list_closes;
        let mut after: Option<TreeNodeId> = None;
        for &id in declared {
            match self.nodes.get(id) {
                Some(node) if node.claim == claim && node.placed_in != close => {}
                _ => continue,
            }
            let expected = match after {
                Some(after) => SiblingSlot::NextOf(after),
                None => SiblingSlot::ChildrenOf(parent),
            };
            if self.nodes[id].prev != Some(expected) {
                log::debug!("tree: placing {id:?} under {parent:?} after {after:?}");
                self.unlink(id);
                self.relocate_object(id, parent, after);
                self.link_at(id, expected, parent);
            }
            self.nodes[id].placed_in = close;
            after = Some(id);
        }
    }

    /// Issue `remove` for detached nodes that no list re-placed.
    fn flush_removals(&mut self) {
        for id in std::mem::take(&mut self.pending_removal) {
            match self.nodes.get_mut(id) {
                Some(node) if node.prev.is_none() => {
                    log::debug!("tree: removing {id:?}");
                    node.object.remove();
                }
                _ => {}
            }
        }
    }

    fn release(&mut self, id: TreeNodeId) {
        if id == self.root || !self.nodes.contains_key(id) {
            return;
        }
        let pending = self.pending_removal.iter().position(|&pending| pending == id);
        if let Some(index) = pending {
            self.pending_removal.swap_remove(index);
            self.nodes[id].object.remove();
        } else if self.nodes[id].prev.is_some() {
            self.nodes[id].object.remove();
            self.unlink(id);
        }
        for child in self.children_of(id) {
            if let Some(child) = self.nodes.get_mut(child) {
                child.prev = None;
                child.next = None;
                child.parent = None;
            }
        }
        self.nodes.remove(id);
    }
}

impl<O: PlacedObject> Tree<O> {
    /// Tree whose root wraps `root`. The root object is never relocated or
    /// removed.
    pub fn new(root: O) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(TreeNode {
            object: root,
            parent: None,
            prev: None,
            next: None,
            children: None,
            claim: None,
            placed_in: 0,
        });
        Self {
            host: Rc::new(TreeHost {
                arena: RefCell::new(TreeArena {
                    nodes,
                    root,
                    pass: 0,
                    list_closes: 0,
                    pending_removal: Vec::new(),
                }),
                graveyard: Rc::new(RefCell::new(Vec::new())),
            }),
        }
    }

    pub fn root(&self) -> TreeNodeId {
        self.host.arena.borrow().root
    }

    /// Add an unplaced node. It joins the backend once a pass declares it.
    pub fn create(&self, object: O) -> TreeNodeId {
        self.host.arena.borrow_mut().nodes.insert(TreeNode {
            object,
            parent: None,
            prev: None,
            next: None,
            children: None,
            claim: None,
            placed_in: 0,
        })
    }

    /// Remove `id` from the backend and drop it. Its children become unplaced.
    pub fn release(&self, id: TreeNodeId) {
        self.host.arena.borrow_mut().release(id);
    }

    pub fn contains(&self, id: TreeNodeId) -> bool {
        self.host.arena.borrow().nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.host.arena.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, id: TreeNodeId) -> Option<TreeNodeId> {
        self.host.arena.borrow().nodes.get(id)?.parent
    }

    pub fn is_placed(&self, id: TreeNodeId) -> bool {
        self.host
            .arena
            .borrow()
            .nodes
            .get(id)
            .is_some_and(|node| node.prev.is_some())
    }

    /// Physical children of `id` in order.
    pub fn children(&self, id: TreeNodeId) -> Vec<TreeNodeId> {
        self.host.arena.borrow().children_of(id).into_vec()
    }

    pub fn with_object<R>(&self, id: TreeNodeId, f: impl FnOnce(&O) -> R) -> Option<R> {
        let arena = self.host.arena.borrow();
        arena.nodes.get(id).map(|node| f(&node.object))
    }

    /// Create a node owned by the returned slot. Dropping the slot schedules
    /// the node for release at the next traversal boundary.
    pub fn create_slot(&self, object: O) -> TreeNodeSlot<O> {
        TreeNodeSlot {
            id: self.create(object),
            graveyard: Rc::downgrade(&self.host.graveyard),
            _marker: PhantomData,
        }
    }

    /// Release nodes whose owning slots were dropped.
    pub fn collect_garbage(&self) {
        let dead = std::mem::take(&mut *self.host.graveyard.borrow_mut());
        if dead.is_empty() {
            return;
        }
        log::debug!("tree: releasing {} dropped nodes", dead.len());
        let mut arena = self.host.arena.borrow_mut();
        for id in dead {
            arena.release(id);
        }
    }

    /// Run one reconciliation pass. `f` declares the root's children; the
    /// root list is settled when `f` returns.
    pub fn traverse<R>(&self, f: impl FnOnce(&TreeTraversal<O>) -> R) -> R {
        let root = {
            let mut arena = self.host.arena.borrow_mut();
            // Leftovers of a pass that unwound before settling.
            arena.flush_removals();
            arena.pass += 1;
            arena.root
        };
        self.collect_garbage();
        let traversal = TreeTraversal {
            tree: self.clone(),
            frames: RefCell::new(SmallVec::new()),
        };
        let result = traversal.with_children(root, f);
        self.host.arena.borrow_mut().flush_removals();
        self.collect_garbage();
        result
    }
}

struct ListFrame {
    parent: TreeNodeId,
    declared: SmallVec<[TreeNodeId; 8]>,
}

/// Cursor of one reconciliation pass.
pub struct TreeTraversal<O: PlacedObject> {
    tree: Tree<O>,
    frames: RefCell<SmallVec<[ListFrame; 8]>>,
}

impl<O: PlacedObject> TreeTraversal<O> {
    pub fn tree(&self) -> &Tree<O> {
        &self.tree
    }

    /// Declare `id` as the next child of the active parent.
    pub fn refresh_node(&self, id: TreeNodeId) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let mut arena = self.tree.host.arena.borrow_mut();
        let pass = arena.pass;
        let Some(node) = arena.nodes.get_mut(id) else {
            log::warn!("tree: declared unknown node {id:?}");
            return;
        };
        node.claim = Some((frame.parent, pass));
        frame.declared.push(id);
    }

    /// Declare the children of `parent` inside `f`.
    pub fn with_children<R>(&self, parent: TreeNodeId, f: impl FnOnce(&Self) -> R) -> R {
        self.frames.borrow_mut().push(ListFrame {
            parent,
            declared: SmallVec::new(),
        });
        let result = f(self);
        let frame = self.frames.borrow_mut().pop();
        if let Some(frame) = frame {
            self.tree
                .host
                .arena
                .borrow_mut()
                .close_list(frame.parent, &frame.declared);
        }
        result
    }

    /// Declare `id` and then its children.
    pub fn node_with_children<R>(&self, id: TreeNodeId, f: impl FnOnce(&Self) -> R) -> R {
        self.refresh_node(id);
        self.with_children(id, f)
    }

    /// Re-declare the run recorded in `cache` without running `f` when the
    /// content is unchanged and the run sits at the same place. Returns whether
    /// `f` ran.
    pub fn cached_subtree(
        &self,
        cache: &mut SubtreeCache,
        content: &dyn Identity,
        force_update: bool,
        f: impl FnOnce(&Self),
    ) -> bool {
        let current = self.frames.borrow().last().map(|frame| {
            (
                frame.parent,
                frame.declared.last().copied(),
                frame.declared.len(),
            )
        });
        let Some((parent, preceding, start)) = current else {
            f(self);
            return true;
        };

        if !force_update
            && cache.content.matches(content)
            && cache.parent == Some(parent)
            && cache.preceding == preceding
            && self.run_intact(cache, parent)
        {
            for &id in &cache.run {
                self.refresh_node(id);
            }
            return false;
        }

        f(self);
        let frames = self.frames.borrow();
        if let Some(frame) = frames.last() {
            cache.run = frame.declared.iter().skip(start).copied().collect();
        }
        cache.parent = Some(parent);
        cache.preceding = preceding;
        cache.content.capture(content);
        true
    }

    fn run_intact(&self, cache: &SubtreeCache, parent: TreeNodeId) -> bool {
        let arena = self.tree.host.arena.borrow();
        cache.run.iter().all(|&id| {
            arena
                .nodes
                .get(id)
                .is_some_and(|node| node.parent == Some(parent))
        })
    }
}

/// Remembers what a cached subtree declared last time it ran.
#[derive(Debug, Default)]
pub struct SubtreeCache {
    content: CapturedId,
    parent: Option<TreeNodeId>,
    preceding: Option<TreeNodeId>,
    run: SmallVec<[TreeNodeId; 4]>,
}

/// Data-graph owner of a tree node. Dropping it (typically because the data
/// block holding it was collected) releases the node at the next traversal
/// boundary.
pub struct TreeNodeSlot<O> {
    id: TreeNodeId,
    graveyard: Weak<RefCell<Vec<TreeNodeId>>>,
    _marker: PhantomData<fn() -> O>,
}

impl<O> TreeNodeSlot<O> {
    pub fn id(&self) -> TreeNodeId {
        self.id
    }
}

impl<O> Drop for TreeNodeSlot<O> {
    fn drop(&mut self) {
        if let Some(graveyard) = self.graveyard.upgrade() {
            if let Ok(mut graveyard) = graveyard.try_borrow_mut() {
                graveyard.push(self.id);
            }
        }
    }
}

/// Tree node bound to the current data-graph call site, created with `make` on
/// first visit and declared as the next child of the active parent.
pub fn tree_node<O: PlacedObject>(
    data: &DataTraversal,
    tree: &TreeTraversal<O>,
    make: impl FnOnce() -> O,
) -> TreeNodeId {
    let (slot, _) = data.get_data::<Option<TreeNodeSlot<O>>>();
    let id = slot.update(|slot| {
        if let Some(existing) = slot.as_ref().filter(|slot| tree.tree().contains(slot.id)) {
            return existing.id;
        }
        let created = tree.tree().create_slot(make());
        let id = created.id;
        *slot = Some(created);
        id
    });
    tree.refresh_node(id);
    id
}

/// Run `f` in its own data block unless the subtree it declares can be reused.
/// Returns whether `f` ran.
pub fn cached_subtree<O: PlacedObject>(
    data: &DataTraversal,
    tree: &TreeTraversal<O>,
    content: &dyn Identity,
    force_update: bool,
    f: impl FnOnce(&DataTraversal, &TreeTraversal<O>) -> TraversalResult,
) -> TraversalResult<bool> {
    let (cache, _) = data.get_data::<SubtreeCache>();
    let block = data.block_node();
    let mut outcome = Ok(());
    let ran = tree.cached_subtree(&mut cache.borrow_mut(), content, force_update, |tree| {
        let _scope = data.enter_block(block);
        outcome = f(data, tree);
    });
    outcome.map(|()| ran)
}
