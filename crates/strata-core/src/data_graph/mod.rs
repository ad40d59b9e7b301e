//! Data-association graph: persistent storage keyed by control-flow position.
//!
//! Every call site visited by a traversal owns one [`DataNode`] inside the
//! active [`DataBlock`]. Nodes of one block form a singly linked list in
//! visitation order, so the Nth visit of a stable traversal always lands on the
//! Nth node. Blocks nest (one per conditional arm, loop iteration and named
//! block), and named blocks are additionally addressable by identity through
//! naming maps so that reordered content keeps its storage.
//!
//! All nodes live in generation-checked arenas. Links are arena keys; a stale
//! key resolves to "missing" and never aliases a newer node.

mod naming;
mod traversal;

pub use naming::{ManualDelete, NamingContext, SwitchBlock};
pub use traversal::{DataTraversal, DataTraversalOptions};

use crate::identity::{CapturedId, Identity};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

new_key_type! {
    /// Handle to one call-site slot.
    pub struct DataNodeId;
    /// Handle to a run of nodes entered and skipped as a unit.
    pub struct BlockId;
    /// Handle to a block addressed by identity.
    pub struct NamedBlockId;
    /// Handle to the identity map of one naming context.
    pub struct NamingMapId;
    /// Handle to a reference edge from a data block to a named block.
    pub struct NamedRefId;
}

type NodeList = SmallVec<[DataNodeId; 16]>;

pub(crate) enum NodeContent {
    /// Persistent application data.
    Value(Box<dyn Any>),
    /// Regenerable application data; dropped when the cache is cleared.
    Cached(Option<Box<dyn Any>>),
    /// Nested block (conditional arm, loop iteration, component content).
    Block(BlockId),
    /// Head of a chain of per-iteration block nodes.
    Loop { first: Option<DataNodeId> },
    NamingMap(NamingMapId),
}

impl NodeContent {
    fn kind_name(&self) -> &'static str {
        match self {
            NodeContent::Value(_) => "value",
            NodeContent::Cached(_) => "cached",
            NodeContent::Block(_) => "block",
            NodeContent::Loop { .. } => "loop",
            NodeContent::NamingMap(_) => "naming map",
        }
    }
}

pub(crate) struct DataNode {
    next: Option<DataNodeId>,
    content: NodeContent,
}

#[derive(Default)]
pub(crate) struct DataBlock {
    nodes: Option<DataNodeId>,
    cache_clear: bool,
    named_blocks: Option<NamedRefId>,
}

pub(crate) struct NamedBlockNode {
    id: CapturedId,
    /// Back-reference to the owning map; `None` once the map is gone.
    map: Option<NamingMapId>,
    block: BlockId,
    reference_count: usize,
    active_count: usize,
    manual_delete: bool,
}

#[derive(Default)]
pub(crate) struct NamingMap {
    blocks: BTreeMap<Box<dyn Identity>, NamedBlockId>,
}

pub(crate) struct NamedRef {
    node: NamedBlockId,
    next: Option<NamedRefId>,
    active: bool,
}

/// Position a traversal writes the next node into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    BlockHead(BlockId),
    LoopHead(DataNodeId),
    After(DataNodeId),
}

/// Reference counts of a named block, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedBlockStats {
    pub reference_count: usize,
    pub active_count: usize,
    pub manual_delete: bool,
}

pub struct DataGraph {
    nodes: SlotMap<DataNodeId, DataNode>,
    blocks: SlotMap<BlockId, DataBlock>,
    named: SlotMap<NamedBlockId, NamedBlockNode>,
    maps: SlotMap<NamingMapId, NamingMap>,
    refs: SlotMap<NamedRefId, NamedRef>,
    root: BlockId,
    /// Payloads released during the current mutation; dropped by
    /// [`GraphHost::mutate`] once the graph is no longer borrowed.
    trash: Vec<Box<dyn Any>>,
}

impl Default for DataGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DataGraph {
    pub fn new() -> Self {
        let mut blocks = SlotMap::with_key();
        let root = blocks.insert(DataBlock::default());
        Self {
            nodes: SlotMap::with_key(),
            blocks,
            named: SlotMap::with_key(),
            maps: SlotMap::with_key(),
            refs: SlotMap::with_key(),
            root,
            trash: Vec::new(),
        }
    }

    pub fn root_block(&self) -> BlockId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn named_block_count(&self) -> usize {
        self.named.len()
    }

    pub fn naming_map_count(&self) -> usize {
        self.maps.len()
    }

    /// Looks `id` up in every live naming map.
    pub fn named_block_stats(&self, id: &dyn Identity) -> Vec<NamedBlockStats> {
        self.maps
            .values()
            .filter_map(|map| map.blocks.get(id))
            .filter_map(|node| self.named.get(*node))
            .map(|node| NamedBlockStats {
                reference_count: node.reference_count,
                active_count: node.active_count,
                manual_delete: node.manual_delete,
            })
            .collect()
    }

    /// Delete the named block registered under `id` in any naming map.
    ///
    /// Unreferenced blocks go immediately. Referenced ones lose their
    /// manual-delete flag and are collected once their last reference is
    /// released.
    pub fn delete_named_block(&mut self, id: &dyn Identity) {
        let matches: SmallVec<[NamedBlockId; 4]> = self
            .maps
            .values()
            .filter_map(|map| map.blocks.get(id).copied())
            .collect();
        for node in matches {
            let Some(named) = self.named.get_mut(node) else {
                continue;
            };
            if named.reference_count == 0 {
                self.delete_named(node);
            } else {
                named.manual_delete = false;
            }
        }
    }

    pub(crate) fn take_trash(&mut self) -> Vec<Box<dyn Any>> {
        std::mem::take(&mut self.trash)
    }

    // ── links ───────────────────────────────────────────────────────────────

    pub(crate) fn link_target(&self, link: Link) -> Option<DataNodeId> {
        match link {
            Link::BlockHead(block) => self.blocks.get(block)?.nodes,
            Link::LoopHead(node) => match self.nodes.get(node)?.content {
                NodeContent::Loop { first } => first,
                _ => None,
            },
            Link::After(node) => self.nodes.get(node)?.next,
        }
    }

    fn set_link(&mut self, link: Link, target: Option<DataNodeId>) {
        match link {
            Link::BlockHead(block) => {
                if let Some(block) = self.blocks.get_mut(block) {
                    block.nodes = target;
                }
            }
            Link::LoopHead(node) => {
                if let Some(DataNode {
                    content: NodeContent::Loop { first },
                    ..
                }) = self.nodes.get_mut(node)
                {
                    *first = target;
                }
            }
            Link::After(node) => {
                if let Some(node) = self.nodes.get_mut(node) {
                    node.next = target;
                }
            }
        }
    }

    fn append_node(&mut self, link: Link, content: NodeContent) -> DataNodeId {
        let next = self.link_target(link);
        let id = self.nodes.insert(DataNode { next, content });
        self.set_link(link, Some(id));
        log::trace!("data graph: new {} node {id:?}", self.nodes[id].content.kind_name());
        id
    }

    pub(crate) fn node_content(&self, id: DataNodeId) -> Option<&NodeContent> {
        self.nodes.get(id).map(|node| &node.content)
    }

    pub(crate) fn node_content_mut(&mut self, id: DataNodeId) -> Option<&mut NodeContent> {
        self.nodes.get_mut(id).map(|node| &mut node.content)
    }

    /// Swap a node's payload, destroying the previous one.
    pub(crate) fn replace_content(&mut self, id: DataNodeId, content: NodeContent) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut node.content, content);
        self.destroy_content(old);
    }

    /// Return the node at `link`, creating it with `make` when the slot is
    /// empty and replacing it when `matches` rejects its content.
    pub(crate) fn claim_node(
        &mut self,
        link: Link,
        matches: impl Fn(&NodeContent) -> bool,
        make: impl FnOnce(&mut Self) -> NodeContent,
    ) -> DataNodeId {
        match self.link_target(link) {
            Some(id) if matches(&self.nodes[id].content) => id,
            Some(id) => {
                log::warn!(
                    "data graph: call site {id:?} previously held a {} node; replacing it",
                    self.nodes[id].content.kind_name()
                );
                let content = make(self);
                self.replace_content(id, content);
                id
            }
            None => {
                let content = make(self);
                self.append_node(link, content)
            }
        }
    }

    pub(crate) fn claim_block_node(&mut self, link: Link) -> (DataNodeId, BlockId) {
        let id = self.claim_node(
            link,
            |content| matches!(content, NodeContent::Block(_)),
            |graph| NodeContent::Block(graph.blocks.insert(DataBlock::default())),
        );
        match self.nodes[id].content {
            NodeContent::Block(block) => (id, block),
            _ => unreachable!("claimed block node holds a different payload"),
        }
    }

    pub(crate) fn claim_loop_node(&mut self, link: Link) -> DataNodeId {
        self.claim_node(
            link,
            |content| matches!(content, NodeContent::Loop { .. }),
            |_| NodeContent::Loop { first: None },
        )
    }

    pub(crate) fn claim_naming_map(&mut self, link: Link) -> (DataNodeId, NamingMapId) {
        let id = self.claim_node(
            link,
            |content| matches!(content, NodeContent::NamingMap(_)),
            |graph| NodeContent::NamingMap(graph.maps.insert(NamingMap::default())),
        );
        match self.nodes[id].content {
            NodeContent::NamingMap(map) => (id, map),
            _ => unreachable!("claimed naming map node holds a different payload"),
        }
    }

    /// Destroy everything reachable from `link` onward and terminate the list there.
    pub(crate) fn truncate(&mut self, link: Link) {
        let rest = self.link_target(link);
        if rest.is_none() {
            return;
        }
        self.set_link(link, None);
        self.destroy_chain(rest);
    }

    // ── blocks ──────────────────────────────────────────────────────────────

    /// Mark `block` live for this pass and hand its named-block references to
    /// the traversal as the predicted visitation order.
    pub(crate) fn open_block(&mut self, block: BlockId) -> Option<NamedRefId> {
        let block = self.blocks.get_mut(block)?;
        block.cache_clear = false;
        block.named_blocks.take()
    }

    /// Store the references the block used this pass.
    ///
    /// With `collect`, references that were predicted but never consumed are
    /// released. Otherwise they are kept after the used ones, which preserves
    /// the recorded order when nothing was looked up out of order.
    pub(crate) fn close_block(
        &mut self,
        block: BlockId,
        used: Option<NamedRefId>,
        used_tail: Option<NamedRefId>,
        leftover: Option<NamedRefId>,
        collect: bool,
    ) {
        if !self.blocks.contains_key(block) {
            self.release_ref_list(used);
            self.release_ref_list(leftover);
            return;
        }
        let head = if collect {
            self.release_ref_list(leftover);
            used
        } else if let Some(tail) = used_tail {
            if let Some(tail) = self.refs.get_mut(tail) {
                tail.next = leftover;
            }
            used
        } else {
            leftover
        };
        self.blocks[block].named_blocks = head;
    }

    fn block_nodes(&self, block: BlockId) -> NodeList {
        let mut list = NodeList::new();
        let mut cursor = self.blocks.get(block).and_then(|block| block.nodes);
        while let Some(id) = cursor {
            list.push(id);
            cursor = self.nodes.get(id).and_then(|node| node.next);
        }
        list
    }

    fn chain_nodes(&self, first: Option<DataNodeId>) -> NodeList {
        let mut list = NodeList::new();
        let mut cursor = first;
        while let Some(id) = cursor {
            list.push(id);
            cursor = self.nodes.get(id).and_then(|node| node.next);
        }
        list
    }

    /// Clear every cache reachable from `block` and deactivate its named-block
    /// references. Nodes are visited in reverse insertion order.
    pub(crate) fn clear_block_cache(&mut self, block: BlockId) {
        let Some(data) = self.blocks.get_mut(block) else {
            return;
        };
        if data.cache_clear {
            return;
        }
        data.cache_clear = true;
        let named = data.named_blocks;
        for id in self.block_nodes(block).into_iter().rev() {
            self.clear_node_cache(id);
        }
        self.deactivate_ref_list(named);
    }

    fn clear_node_cache(&mut self, id: DataNodeId) {
        let nested = match self.nodes.get_mut(id).map(|node| &mut node.content) {
            Some(NodeContent::Cached(value)) => {
                if let Some(value) = value.take() {
                    self.trash.push(value);
                }
                return;
            }
            Some(NodeContent::Block(block)) => Some(*block),
            Some(NodeContent::Loop { first }) => {
                let first = *first;
                for iteration in self.chain_nodes(first).into_iter().rev() {
                    self.clear_node_cache(iteration);
                }
                None
            }
            _ => None,
        };
        if let Some(block) = nested {
            self.clear_block_cache(block);
        }
    }

    fn destroy_chain(&mut self, first: Option<DataNodeId>) {
        for id in self.chain_nodes(first).into_iter().rev() {
            if let Some(node) = self.nodes.remove(id) {
                self.destroy_content(node.content);
            }
        }
    }

    fn destroy_content(&mut self, content: NodeContent) {
        match content {
            NodeContent::Value(value) => self.trash.push(value),
            NodeContent::Cached(value) => self.trash.extend(value),
            NodeContent::Block(block) => self.destroy_block(block),
            NodeContent::Loop { first } => self.destroy_chain(first),
            NodeContent::NamingMap(map) => self.destroy_map(map),
        }
    }

    fn destroy_block(&mut self, block: BlockId) {
        let nodes = self.block_nodes(block);
        let Some(data) = self.blocks.remove(block) else {
            return;
        };
        for id in nodes.into_iter().rev() {
            if let Some(node) = self.nodes.remove(id) {
                self.destroy_content(node.content);
            }
        }
        self.release_ref_list(data.named_blocks);
    }

    // ── naming maps and named blocks ────────────────────────────────────────

    fn destroy_map(&mut self, map: NamingMapId) {
        let Some(data) = self.maps.remove(map) else {
            return;
        };
        for node in data.blocks.into_values() {
            let Some(named) = self.named.get_mut(node) else {
                continue;
            };
            named.map = None;
            if named.reference_count == 0 {
                self.delete_named(node);
            }
        }
    }

    pub(crate) fn find_or_create_named(
        &mut self,
        map: NamingMapId,
        id: &dyn Identity,
        manual: bool,
    ) -> NamedBlockId {
        if let Some(node) = self.maps.get(map).and_then(|map| map.blocks.get(id)).copied() {
            if let Some(named) = self.named.get_mut(node) {
                named.manual_delete = manual;
                return node;
            }
        }
        let block = self.blocks.insert(DataBlock::default());
        let node = self.named.insert(NamedBlockNode {
            id: CapturedId::new(id),
            map: Some(map),
            block,
            reference_count: 0,
            active_count: 0,
            manual_delete: manual,
        });
        if let Some(map) = self.maps.get_mut(map) {
            map.blocks.insert(id.clone_id(), node);
        }
        log::debug!("data graph: created named block {id:?}");
        node
    }

    fn delete_named(&mut self, node: NamedBlockId) {
        let Some(named) = self.named.remove(node) else {
            return;
        };
        if let (Some(map), Some(id)) = (named.map, named.id.get()) {
            if let Some(map) = self.maps.get_mut(map) {
                map.blocks.remove(id);
            }
        }
        log::debug!("data graph: collected named block {:?}", named.id);
        self.destroy_block(named.block);
    }

    pub(crate) fn named_block_of(&self, node: NamedBlockId) -> Option<BlockId> {
        self.named.get(node).map(|named| named.block)
    }

    // ── named-block references ──────────────────────────────────────────────

    /// Whether the reference `r` points at the block named `id` in `map`.
    pub(crate) fn ref_matches(&self, r: NamedRefId, map: NamingMapId, id: &dyn Identity) -> bool {
        self.refs
            .get(r)
            .and_then(|r| self.named.get(r.node))
            .is_some_and(|named| named.map == Some(map) && named.id.matches(id))
    }

    /// Unhook `r` from the predicted list, returning its successor.
    pub(crate) fn detach_ref(&mut self, r: NamedRefId) -> Option<NamedRefId> {
        self.refs.get_mut(r).and_then(|r| r.next.take())
    }

    pub(crate) fn ref_target(&self, r: NamedRefId) -> Option<NamedBlockId> {
        self.refs.get(r).map(|r| r.node)
    }

    pub(crate) fn set_manual_delete(&mut self, node: NamedBlockId, manual: bool) {
        if let Some(named) = self.named.get_mut(node) {
            named.manual_delete = manual;
        }
    }

    pub(crate) fn new_ref(&mut self, node: NamedBlockId) -> NamedRefId {
        if let Some(named) = self.named.get_mut(node) {
            named.reference_count += 1;
        }
        self.refs.insert(NamedRef {
            node,
            next: None,
            active: false,
        })
    }

    pub(crate) fn append_ref(&mut self, tail: Option<NamedRefId>, r: NamedRefId) {
        if let Some(tail) = tail.and_then(|tail| self.refs.get_mut(tail)) {
            tail.next = Some(r);
        }
    }

    pub(crate) fn activate_ref(&mut self, r: NamedRefId) {
        let Some(reference) = self.refs.get_mut(r) else {
            return;
        };
        if reference.active {
            return;
        }
        reference.active = true;
        if let Some(named) = self.named.get_mut(reference.node) {
            named.active_count += 1;
        }
    }

    fn deactivate_ref(&mut self, r: NamedRefId) {
        let Some(reference) = self.refs.get_mut(r) else {
            return;
        };
        if !reference.active {
            return;
        }
        reference.active = false;
        let node = reference.node;
        let Some(named) = self.named.get_mut(node) else {
            return;
        };
        named.active_count -= 1;
        if named.active_count == 0 {
            let block = named.block;
            self.clear_block_cache(block);
        }
    }

    fn release_ref(&mut self, r: NamedRefId) {
        self.deactivate_ref(r);
        let Some(reference) = self.refs.remove(r) else {
            return;
        };
        let Some(named) = self.named.get_mut(reference.node) else {
            return;
        };
        named.reference_count -= 1;
        if named.reference_count > 0 {
            return;
        }
        if named.manual_delete {
            let block = named.block;
            self.clear_block_cache(block);
        } else {
            self.delete_named(reference.node);
        }
    }

    fn ref_list(&self, head: Option<NamedRefId>) -> SmallVec<[NamedRefId; 8]> {
        let mut list = SmallVec::new();
        let mut cursor = head;
        while let Some(r) = cursor {
            list.push(r);
            cursor = self.refs.get(r).and_then(|r| r.next);
        }
        list
    }

    fn release_ref_list(&mut self, head: Option<NamedRefId>) {
        for r in self.ref_list(head) {
            self.release_ref(r);
        }
    }

    fn deactivate_ref_list(&mut self, head: Option<NamedRefId>) {
        for r in self.ref_list(head) {
            self.deactivate_ref(r);
        }
    }
}

/// Shared owner of a [`DataGraph`] that outlives individual traversals.
#[derive(Default)]
pub struct GraphHost {
    inner: RefCell<DataGraph>,
}

impl GraphHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn borrow(&self) -> Ref<'_, DataGraph> {
        self.inner.borrow()
    }

    /// Run `f` against the graph and drop any payloads it released only after
    /// the borrow ends, so application `Drop` impls may touch the graph.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut DataGraph) -> R) -> R {
        let (result, trash) = {
            let mut graph = self.inner.borrow_mut();
            let result = f(&mut graph);
            (result, graph.take_trash())
        };
        drop(trash);
        result
    }

    /// Like [`mutate`](Self::mutate) but gives up when the graph is already
    /// borrowed. Used from scope guards that may run during unwinding.
    pub(crate) fn try_mutate<R>(&self, f: impl FnOnce(&mut DataGraph) -> R) -> Option<R> {
        let (result, trash) = {
            let mut graph = self.try_borrow_mut()?;
            let result = f(&mut graph);
            (result, graph.take_trash())
        };
        drop(trash);
        Some(result)
    }

    fn try_borrow_mut(&self) -> Option<RefMut<'_, DataGraph>> {
        self.inner.try_borrow_mut().ok()
    }

    pub fn delete_named_block(&self, id: &dyn Identity) {
        self.mutate(|graph| graph.delete_named_block(id));
    }
}
