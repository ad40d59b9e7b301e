use super::{DataTraversal, NamingMapId};
use crate::error::TraversalResult;
use crate::identity::{DefaultCase, Identity};

/// Whether a named block survives losing its last reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManualDelete {
    /// Collected as soon as no block references it.
    #[default]
    No,
    /// Kept (with its caches cleared) until deleted explicitly.
    Yes,
}

/// Scope in which blocks are addressed by identity instead of position.
#[derive(Clone, Copy)]
pub struct NamingContext<'a> {
    traversal: &'a DataTraversal,
    map: NamingMapId,
}

impl DataTraversal {
    /// Open a naming context at the current call site.
    pub fn naming_context<R>(&self, f: impl FnOnce(&NamingContext<'_>) -> R) -> R {
        let map = self.naming_map_node();
        f(&NamingContext {
            traversal: self,
            map,
        })
    }

    /// Multi-way branch. Each case is a named block keyed by its label, so
    /// switching back to an earlier case finds its data intact.
    pub fn switch<R>(&self, f: impl FnOnce(&SwitchBlock<'_>) -> R) -> R {
        self.naming_context(|naming| f(&SwitchBlock { naming: *naming }))
    }

    /// Iterate `items` with one named block per key, so reordering the items
    /// moves their data along with them.
    pub fn for_each_keyed<I, K, KF, F>(&self, items: I, mut key: KF, mut body: F) -> TraversalResult
    where
        I: IntoIterator,
        K: Identity,
        KF: FnMut(&I::Item) -> K,
        F: FnMut(&DataTraversal, I::Item) -> TraversalResult,
    {
        self.naming_context(|naming| -> TraversalResult {
            for item in items {
                let id = key(&item);
                naming.named_block(&id, |traversal| body(traversal, item))?;
            }
            Ok(())
        })
    }
}

impl<'a> NamingContext<'a> {
    pub fn traversal(&self) -> &'a DataTraversal {
        self.traversal
    }

    pub fn named_block<R>(
        &self,
        id: &dyn Identity,
        f: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        self.named_block_with(id, ManualDelete::No, f)
    }

    /// Visit the block named `id`, creating it on first use.
    pub fn named_block_with<R>(
        &self,
        id: &dyn Identity,
        manual: ManualDelete,
        f: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        let block = self
            .traversal
            .use_named_block(self.map, id, manual == ManualDelete::Yes)?;
        let _scope = self.traversal.enter_block(block);
        f(self.traversal)
    }

    /// Delete a manually managed block. See
    /// [`DataGraph::delete_named_block`](super::DataGraph::delete_named_block).
    pub fn delete_named_block(&self, id: &dyn Identity) {
        self.traversal.graph().delete_named_block(id);
    }
}

pub struct SwitchBlock<'a> {
    naming: NamingContext<'a>,
}

impl SwitchBlock<'_> {
    pub fn case<R>(
        &self,
        label: &dyn Identity,
        f: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        self.naming.named_block(label, f)
    }

    pub fn default<R>(
        &self,
        f: impl FnOnce(&DataTraversal) -> TraversalResult<R>,
    ) -> TraversalResult<R> {
        self.naming.named_block(&DefaultCase, f)
    }
}
