use super::{BlockId, DataNodeId, GraphHost, Link, NamedRefId, NamingMapId, NodeContent};
use crate::error::{TraversalError, TraversalResult};
use crate::identity::Identity;
use crate::owned::Owned;
use std::any::{type_name, Any};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Per-pass switches of a [`DataTraversal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTraversalOptions {
    pub gc_enabled: bool,
    pub cache_clearing_enabled: bool,
}

impl DataTraversalOptions {
    /// Full refresh: unvisited content is collected and skipped arms lose
    /// their caches.
    pub fn refresh() -> Self {
        Self {
            gc_enabled: true,
            cache_clearing_enabled: true,
        }
    }

    /// Partial pass: nothing is collected or cleared.
    pub fn event() -> Self {
        Self {
            gc_enabled: false,
            cache_clearing_enabled: false,
        }
    }
}

impl Default for DataTraversalOptions {
    fn default() -> Self {
        Self::refresh()
    }
}

#[derive(Clone, Copy, Default)]
struct RefList {
    head: Option<NamedRefId>,
    tail: Option<NamedRefId>,
}

#[derive(Clone, Copy)]
struct TraversalState {
    active_block: BlockId,
    next_data: Link,
    predicted: Option<NamedRefId>,
    used: RefList,
    gc_enabled: bool,
    cache_clearing_enabled: bool,
}

/// Block-local part of [`TraversalState`], saved around nested blocks.
#[derive(Clone, Copy)]
struct BlockState {
    active_block: BlockId,
    next_data: Link,
    predicted: Option<NamedRefId>,
    used: RefList,
}

struct DataTraversalCore {
    graph: Rc<GraphHost>,
    state: RefCell<TraversalState>,
}

/// Cursor over a [`DataGraph`](super::DataGraph) for the duration of one pass.
///
/// Cloning is cheap and every clone shares the same cursor.
#[derive(Clone)]
pub struct DataTraversal {
    core: Rc<DataTraversalCore>,
}

impl DataTraversal {
    /// Run `f` with a traversal positioned at the start of the graph's root
    /// block. The root block is closed when `f` returns.
    pub fn traverse<R>(
        graph: &Rc<GraphHost>,
        options: DataTraversalOptions,
        f: impl FnOnce(&DataTraversal) -> R,
    ) -> R {
        let root = graph.borrow().root_block();
        let traversal = DataTraversal {
            core: Rc::new(DataTraversalCore {
                graph: Rc::clone(graph),
                state: RefCell::new(TraversalState {
                    active_block: root,
                    next_data: Link::BlockHead(root),
                    predicted: None,
                    used: RefList::default(),
                    gc_enabled: options.gc_enabled,
                    cache_clearing_enabled: options.cache_clearing_enabled,
                }),
            }),
        };
        let _scope = traversal.enter_block(root);
        f(&traversal)
    }

    pub fn graph(&self) -> &Rc<GraphHost> {
        &self.core.graph
    }

    pub fn gc_enabled(&self) -> bool {
        self.state().gc_enabled
    }

    pub fn cache_clearing_enabled(&self) -> bool {
        self.state().cache_clearing_enabled
    }

    fn state(&self) -> Ref<'_, TraversalState> {
        self.core.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, TraversalState> {
        self.core.state.borrow_mut()
    }

    fn next_link(&self) -> Link {
        self.state().next_data
    }

    fn advance(&self, node: DataNodeId) {
        self.state_mut().next_data = Link::After(node);
    }

    // ── data slots ──────────────────────────────────────────────────────────

    /// Persistent value at the current call site, default-initialized on
    /// first visit. Returns the handle and whether it was just created.
    pub fn get_data<T: Default + 'static>(&self) -> (Owned<T>, bool) {
        self.get_data_with(T::default)
    }

    /// Persistent value at the current call site, created with `init` on first
    /// visit.
    ///
    /// When the slot previously held a different type the old value is
    /// destroyed and replaced.
    pub fn get_data_with<T: 'static>(&self, init: impl FnOnce() -> T) -> (Owned<T>, bool) {
        let link = self.next_link();
        let found = self.core.graph.mutate(|graph| {
            let node = graph.claim_node(
                link,
                |content| matches!(content, NodeContent::Value(_)),
                |_| NodeContent::Value(Box::new(())),
            );
            let existing = match graph.node_content(node) {
                Some(NodeContent::Value(value)) => match value.downcast_ref::<Owned<T>>() {
                    Some(owned) => Some(owned.clone()),
                    None => {
                        if !value.is::<()>() {
                            log::warn!(
                                "data slot {node:?} changed type to {}; old value dropped",
                                type_name::<T>()
                            );
                        }
                        None
                    }
                },
                _ => None,
            };
            (node, existing)
        });
        match found {
            (node, Some(existing)) => {
                self.advance(node);
                (existing, false)
            }
            (node, None) => {
                self.advance(node);
                let owned = Owned::new(init());
                let stored = NodeContent::Value(Box::new(owned.clone()));
                self.core
                    .graph
                    .mutate(|graph| graph.replace_content(node, stored));
                log::trace!("data slot {node:?} initialized as {}", type_name::<T>());
                (owned, true)
            }
        }
    }

    /// Cached value at the current call site. The value is regenerated with
    /// `T::default()` whenever the enclosing cache was cleared.
    pub fn get_cached_data<T: Default + 'static>(&self) -> (Owned<T>, bool) {
        self.get_cached_data_with(T::default)
    }

    pub fn get_cached_data_with<T: 'static>(
        &self,
        init: impl FnOnce() -> T,
    ) -> (Owned<T>, bool) {
        let link = self.next_link();
        let found = self.core.graph.mutate(|graph| {
            let node = graph.claim_node(
                link,
                |content| matches!(content, NodeContent::Cached(_)),
                |_| NodeContent::Cached(None),
            );
            let existing = match graph.node_content(node) {
                Some(NodeContent::Cached(Some(value))) => {
                    value.downcast_ref::<Owned<T>>().cloned()
                }
                _ => None,
            };
            (node, existing)
        });
        let (node, existing) = found;
        self.advance(node);
        if let Some(existing) = existing {
            return (existing, false);
        }
        let owned = Owned::new(init());
        let value: Box<dyn Any> = Box::new(owned.clone());
        self.core.graph.mutate(|graph| {
            if let Some(NodeContent::Cached(slot)) = graph.node_content_mut(node) {
                if let Some(old) = slot.replace(value) {
                    graph.trash.push(old);
                }
            }
        });
        (owned, true)
    }

    // ── blocks ──────────────────────────────────────────────────────────────

    pub(crate) fn block_node(&self) -> BlockId {
        let link = self.next_link();
        let (node, block) = self
            .core
            .graph
            .mutate(|graph| graph.claim_block_node(link));
        self.advance(node);
        block
    }

    pub(crate) fn naming_map_node(&self) -> NamingMapId {
        let link = self.next_link();
        let (node, map) = self
            .core
            .graph
            .mutate(|graph| graph.claim_naming_map(link));
        self.advance(node);
        map
    }

    /// Make `block` the active block until the returned scope is dropped.
    pub(crate) fn enter_block(&self, block: BlockId) -> BlockScope {
        let predicted = self.core.graph.mutate(|graph| graph.open_block(block));
        let mut state = self.state_mut();
        let saved = BlockState {
            active_block: state.active_block,
            next_data: state.next_data,
            predicted: state.predicted,
            used: state.used,
        };
        state.active_block = block;
        state.next_data = Link::BlockHead(block);
        state.predicted = predicted;
        state.used = RefList::default();
        BlockScope {
            traversal: self.clone(),
            saved,
        }
    }

    fn skip_block(&self, block: BlockId) {
        if self.cache_clearing_enabled() {
            self.core
                .graph
                .mutate(|graph| graph.clear_block_cache(block));
        }
    }

    /// Run `f` inside a nested block at the current call site.
    pub fn scoped<R>(&self, f: impl FnOnce(&DataTraversal) -> R) -> R {
        let block = self.block_node();
        let _scope = self.enter_block(block);
        f(self)
    }

    /// Conditional block. When `condition` is false the body is skipped and,
    /// if cache clearing is enabled, its caches are released.
    pub fn if_<R>(
        &self,
        condition: bool,
        f: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<Option<R>> {
        let block = self.block_node();
        if condition {
            let _scope = self.enter_block(block);
            f(self).map(Some)
        } else {
            self.skip_block(block);
            Ok(None)
        }
    }

    pub fn if_else<R>(
        &self,
        condition: bool,
        then: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
        otherwise: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        let then_block = self.block_node();
        let else_block = self.block_node();
        if condition {
            self.skip_block(else_block);
            let _scope = self.enter_block(then_block);
            then(self)
        } else {
            self.skip_block(then_block);
            let _scope = self.enter_block(else_block);
            otherwise(self)
        }
    }

    // ── loops ───────────────────────────────────────────────────────────────

    fn loop_cursor(&self) -> LoopCursor {
        let link = self.next_link();
        let node = self.core.graph.mutate(|graph| graph.claim_loop_node(link));
        self.advance(node);
        LoopCursor {
            traversal: self.clone(),
            link: Link::LoopHead(node),
        }
    }

    /// Run `body` once per item, each iteration in its own block addressed by
    /// position. Iteration blocks beyond the last one visited are destroyed on
    /// exit when garbage collection is enabled.
    pub fn for_each<I, F>(&self, items: I, mut body: F) -> TraversalResult
    where
        I: IntoIterator,
        F: FnMut(&DataTraversal, I::Item) -> TraversalResult,
    {
        let mut cursor = self.loop_cursor();
        for item in items {
            let block = cursor.next_block();
            let _scope = self.enter_block(block);
            body(self, item)?;
        }
        Ok(())
    }

    pub fn while_<C, F>(&self, mut condition: C, mut body: F) -> TraversalResult
    where
        C: FnMut() -> bool,
        F: FnMut(&DataTraversal) -> TraversalResult,
    {
        let mut cursor = self.loop_cursor();
        while condition() {
            let block = cursor.next_block();
            let _scope = self.enter_block(block);
            body(self)?;
        }
        Ok(())
    }

    // ── named blocks ────────────────────────────────────────────────────────

    /// Resolve the named block `id` of `map` for the active block and record
    /// the reference as used. The prediction is consulted first; a miss is
    /// only allowed while garbage collection is enabled.
    pub(crate) fn use_named_block(
        &self,
        map: NamingMapId,
        id: &dyn Identity,
        manual: bool,
    ) -> TraversalResult<BlockId> {
        let (predicted, used, gc_enabled) = {
            let state = self.state();
            (state.predicted, state.used, state.gc_enabled)
        };
        let resolved = self.core.graph.mutate(|graph| {
            if let Some(candidate) = predicted {
                if graph.ref_matches(candidate, map, id) {
                    let rest = graph.detach_ref(candidate);
                    if let Some(node) = graph.ref_target(candidate) {
                        graph.set_manual_delete(node, manual);
                    }
                    return Ok((candidate, rest));
                }
            }
            if !gc_enabled {
                return Err(TraversalError::NamedBlockOutOfOrder {
                    requested: format!("{id:?}"),
                });
            }
            let node = graph.find_or_create_named(map, id, manual);
            Ok((graph.new_ref(node), predicted))
        })?;
        let (reference, predicted) = resolved;
        let block = self.core.graph.mutate(|graph| {
            graph.append_ref(used.tail, reference);
            graph.activate_ref(reference);
            graph.ref_target(reference).and_then(|node| graph.named_block_of(node))
        });
        let mut state = self.state_mut();
        state.predicted = predicted;
        state.used = RefList {
            head: used.head.or(Some(reference)),
            tail: Some(reference),
        };
        drop(state);
        block.ok_or_else(|| TraversalError::NamedBlockOutOfOrder {
            requested: format!("{id:?}"),
        })
    }

    // ── pass switches ───────────────────────────────────────────────────────

    /// Run `f` with garbage collection turned off, restoring the previous
    /// setting afterwards.
    pub fn with_gc_disabled<R>(&self, f: impl FnOnce(&DataTraversal) -> R) -> R {
        let previous = std::mem::replace(&mut self.state_mut().gc_enabled, false);
        let _restore = FlagRestore {
            traversal: self.clone(),
            flag: Flag::Gc,
            previous,
        };
        f(self)
    }

    pub fn with_cache_clearing_disabled<R>(&self, f: impl FnOnce(&DataTraversal) -> R) -> R {
        let previous = std::mem::replace(&mut self.state_mut().cache_clearing_enabled, false);
        let _restore = FlagRestore {
            traversal: self.clone(),
            flag: Flag::CacheClearing,
            previous,
        };
        f(self)
    }
}

/// Closes a block entered with [`DataTraversal::enter_block`].
pub(crate) struct BlockScope {
    traversal: DataTraversal,
    saved: BlockState,
}

impl Drop for BlockScope {
    fn drop(&mut self) {
        let core = &self.traversal.core;
        let Ok(mut state) = core.state.try_borrow_mut() else {
            return;
        };
        let block = state.active_block;
        let used = state.used;
        let leftover = state.predicted;
        let collect = state.gc_enabled && !std::thread::panicking();
        state.active_block = self.saved.active_block;
        state.next_data = self.saved.next_data;
        state.predicted = self.saved.predicted;
        state.used = self.saved.used;
        drop(state);
        core.graph.try_mutate(|graph| {
            graph.close_block(block, used.head, used.tail, leftover, collect)
        });
    }
}

/// Walks the iteration blocks of a loop node and destroys the ones past the
/// end when dropped.
struct LoopCursor {
    traversal: DataTraversal,
    link: Link,
}

impl LoopCursor {
    fn next_block(&mut self) -> BlockId {
        let link = self.link;
        let (node, block) = self
            .traversal
            .core
            .graph
            .mutate(|graph| graph.claim_block_node(link));
        self.link = Link::After(node);
        block
    }
}

impl Drop for LoopCursor {
    fn drop(&mut self) {
        let gc_enabled = self
            .traversal
            .core
            .state
            .try_borrow()
            .is_ok_and(|state| state.gc_enabled);
        if gc_enabled {
            let link = self.link;
            self.traversal
                .core
                .graph
                .try_mutate(|graph| graph.truncate(link));
        }
    }
}

enum Flag {
    Gc,
    CacheClearing,
}

struct FlagRestore {
    traversal: DataTraversal,
    flag: Flag,
    previous: bool,
}

impl Drop for FlagRestore {
    fn drop(&mut self) {
        if let Ok(mut state) = self.traversal.core.state.try_borrow_mut() {
            match self.flag {
                Flag::Gc => state.gc_enabled = self.previous,
                Flag::CacheClearing => state.cache_clearing_enabled = self.previous,
            }
        }
    }
}
