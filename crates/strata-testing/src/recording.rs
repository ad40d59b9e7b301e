//! Tree backend that records placement calls as text.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;
use strata_core::{PlacedObject, Tree, TreeNodeId};

/// Shared log of backend operations, one line per call.
#[derive(Clone, Default)]
pub struct OpLog(Rc<RefCell<Vec<String>>>);

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded operations.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    fn push(&self, op: String) {
        self.0.borrow_mut().push(op);
    }
}

/// Named placed object.
///
/// Relocations are logged as `relocate <name> <parent>><after>` with `-` for
/// a first-child placement, removals as `remove <name>`.
pub struct RecordingObject {
    name: String,
    log: OpLog,
}

impl RecordingObject {
    pub fn new(name: impl Into<String>, log: &OpLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PlacedObject for RecordingObject {
    fn relocate(&mut self, parent: &Self, after: Option<&Self>) {
        let after = after.map_or("-", |after| after.name.as_str());
        self.log
            .push(format!("relocate {} {}>{}", self.name, parent.name, after));
    }

    fn remove(&mut self) {
        self.log.push(format!("remove {}", self.name));
    }
}

/// Indented outline of the placed tree below its root.
pub fn dump_tree(tree: &Tree<RecordingObject>) -> String {
    let mut out = String::new();
    dump_node(tree, tree.root(), 0, &mut out);
    out
}

fn dump_node(tree: &Tree<RecordingObject>, id: TreeNodeId, depth: usize, out: &mut String) {
    if let Some(name) = tree.with_object(id, |object| object.name.clone()) {
        let _ = writeln!(out, "{:indent$}{name}", "", indent = depth * 2);
    }
    for child in tree.children(id) {
        dump_node(tree, child, depth + 1, out);
    }
}

#[cfg(test)]
#[path = "tests/recording_tests.rs"]
mod tests;
