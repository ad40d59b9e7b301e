//! Reconciler churn and subtree caching.

use crate::data_graph::{DataTraversal, DataTraversalOptions, GraphHost};
use crate::tree::{cached_subtree, tree_node, PlacedObject, SubtreeCache, Tree, TreeNodeId};
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

struct Element {
    name: &'static str,
    log: Log,
}

impl PlacedObject for Element {
    fn relocate(&mut self, parent: &Self, after: Option<&Self>) {
        let after = after.map_or("-", |after| after.name);
        self.log
            .borrow_mut()
            .push(format!("relocate {} {}>{}", self.name, parent.name, after));
    }

    fn remove(&mut self) {
        self.log.borrow_mut().push(format!("remove {}", self.name));
    }
}

struct Fixture {
    tree: Tree<Element>,
    log: Log,
    ids: Vec<(&'static str, TreeNodeId)>,
}

impl Fixture {
    fn new(names: &[&'static str]) -> Self {
        let log = Log::default();
        let tree = Tree::new(Element {
            name: "root",
            log: Rc::clone(&log),
        });
        let ids = names
            .iter()
            .map(|&name| {
                let element = Element {
                    name,
                    log: Rc::clone(&log),
                };
                (name, tree.create(element))
            })
            .collect();
        Self { tree, log, ids }
    }

    fn id(&self, name: &str) -> TreeNodeId {
        self.ids
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
            .unwrap_or_else(|| panic!("unknown element {name}"))
    }

    fn declare(&self, names: &[&str]) -> Vec<String> {
        self.log.borrow_mut().clear();
        self.tree.traverse(|traversal| {
            for name in names {
                traversal.refresh_node(self.id(name));
            }
        });
        self.log.borrow_mut().drain(..).collect()
    }

    fn names(&self, parent: TreeNodeId) -> Vec<&'static str> {
        self.tree
            .children(parent)
            .into_iter()
            .filter_map(|id| self.tree.with_object(id, |element| element.name))
            .collect()
    }
}

#[test]
fn initial_declaration_places_every_node() {
    let fixture = Fixture::new(&["a", "b", "c"]);
    let ops = fixture.declare(&["a", "b", "c"]);
    assert_eq!(
        ops,
        vec!["relocate a root>-", "relocate b root>a", "relocate c root>b"]
    );
    assert_eq!(fixture.names(fixture.tree.root()), vec!["a", "b", "c"]);
}

#[test]
fn unchanged_declaration_is_free() {
    let fixture = Fixture::new(&["a", "b", "c"]);
    fixture.declare(&["a", "b", "c"]);
    assert!(fixture.declare(&["a", "b", "c"]).is_empty());
}

#[test]
fn swapping_neighbours_relocates_once() {
    let fixture = Fixture::new(&["a", "b", "c"]);
    fixture.declare(&["a", "b", "c"]);
    let ops = fixture.declare(&["b", "a", "c"]);
    assert_eq!(ops, vec!["relocate b root>-"]);
    assert_eq!(fixture.names(fixture.tree.root()), vec!["b", "a", "c"]);
}

#[test]
fn dropping_a_middle_node_removes_once() {
    let fixture = Fixture::new(&["a", "b", "c"]);
    fixture.declare(&["a", "b", "c"]);
    let ops = fixture.declare(&["a", "c"]);
    assert_eq!(ops, vec!["remove b"]);
    assert_eq!(fixture.names(fixture.tree.root()), vec!["a", "c"]);
    assert!(!fixture.tree.is_placed(fixture.id("b")));
}

#[test]
fn moving_last_to_front_relocates_once() {
    let fixture = Fixture::new(&["a", "b", "c", "d"]);
    fixture.declare(&["a", "b", "c", "d"]);
    let ops = fixture.declare(&["d", "a", "b", "c"]);
    assert_eq!(ops, vec!["relocate d root>-"]);
}

#[test]
fn duplicate_declaration_places_once() {
    let fixture = Fixture::new(&["a", "b"]);
    let ops = fixture.declare(&["a", "b", "a"]);
    assert_eq!(ops.len(), 2);
    assert_eq!(fixture.names(fixture.tree.root()), vec!["a", "b"]);
}

#[test]
fn nested_lists_reconcile_independently() {
    let fixture = Fixture::new(&["panel", "x", "y", "z"]);
    let (panel, x, y, z) = (
        fixture.id("panel"),
        fixture.id("x"),
        fixture.id("y"),
        fixture.id("z"),
    );
    let pass = |children: &[TreeNodeId], trailing: Option<TreeNodeId>| {
        fixture.log.borrow_mut().clear();
        fixture.tree.traverse(|traversal| {
            traversal.node_with_children(panel, |traversal| {
                for &child in children {
                    traversal.refresh_node(child);
                }
            });
            if let Some(trailing) = trailing {
                traversal.refresh_node(trailing);
            }
        });
        fixture.log.borrow_mut().drain(..).collect::<Vec<_>>()
    };

    pass(&[x, y], Some(z));
    assert_eq!(fixture.names(panel), vec!["x", "y"]);
    assert_eq!(fixture.names(fixture.tree.root()), vec!["panel", "z"]);

    // Moving a node between parents is a single relocate.
    let ops = pass(&[x, y, z], None);
    assert_eq!(ops, vec!["relocate z panel>y"]);
    assert_eq!(fixture.tree.parent(z), Some(panel));
    assert_eq!(fixture.names(fixture.tree.root()), vec!["panel"]);

    // Moving it back out is also a single relocate, not a remove and a relocate.
    let ops = pass(&[x, y], Some(z));
    assert_eq!(ops, vec!["relocate z root>panel"]);
    assert_eq!(fixture.names(panel), vec!["x", "y"]);
}

#[test]
fn leaving_a_nested_list_for_good_removes_once() {
    let fixture = Fixture::new(&["panel", "x", "y"]);
    let (panel, x, y) = (fixture.id("panel"), fixture.id("x"), fixture.id("y"));
    let pass = |children: &[TreeNodeId], trailing: &[TreeNodeId]| {
        fixture.log.borrow_mut().clear();
        fixture.tree.traverse(|traversal| {
            traversal.node_with_children(panel, |traversal| {
                for &child in children {
                    traversal.refresh_node(child);
                }
            });
            for &id in trailing {
                traversal.refresh_node(id);
            }
        });
        fixture.log.borrow_mut().drain(..).collect::<Vec<_>>()
    };

    pass(&[x, y], &[]);
    let ops = pass(&[x], &[]);
    assert_eq!(ops, vec!["remove y"]);
    assert!(!fixture.tree.is_placed(y));

    // Coming back into the root list after the panel is one relocate.
    let ops = pass(&[], &[y]);
    assert_eq!(ops, vec!["relocate y root>panel", "remove x"]);
    assert!(fixture.names(panel).is_empty());
    assert_eq!(fixture.names(fixture.tree.root()), vec!["panel", "y"]);
}

#[test]
fn releasing_a_detached_node_mid_pass_removes_once() {
    let fixture = Fixture::new(&["panel", "b"]);
    let (panel, b) = (fixture.id("panel"), fixture.id("b"));
    fixture.tree.traverse(|traversal| {
        traversal.node_with_children(panel, |traversal| traversal.refresh_node(b));
    });
    fixture.log.borrow_mut().clear();

    fixture.tree.traverse(|traversal| {
        traversal.node_with_children(panel, |_| {});
        fixture.tree.release(b);
    });
    assert_eq!(*fixture.log.borrow(), vec!["remove b"]);
    assert!(!fixture.tree.contains(b));

    fixture.log.borrow_mut().clear();
    fixture.tree.traverse(|traversal| traversal.refresh_node(panel));
    assert!(fixture.log.borrow().is_empty());
}

#[test]
fn released_nodes_leave_the_backend() {
    let fixture = Fixture::new(&["a", "b"]);
    fixture.declare(&["a", "b"]);
    fixture.log.borrow_mut().clear();
    fixture.tree.release(fixture.id("a"));
    assert_eq!(*fixture.log.borrow(), vec!["remove a"]);
    assert!(!fixture.tree.contains(fixture.id("a")));
    assert_eq!(fixture.names(fixture.tree.root()), vec!["b"]);
}

#[test]
fn cached_subtree_skips_unchanged_content() {
    let fixture = Fixture::new(&["head", "a", "b"]);
    let (head, a, b) = (fixture.id("head"), fixture.id("a"), fixture.id("b"));
    let mut cache = SubtreeCache::default();
    let mut pass = |content: u32, force: bool| -> bool {
        let mut ran = false;
        fixture.tree.traverse(|traversal| {
            traversal.refresh_node(head);
            traversal.cached_subtree(&mut cache, &content, force, |traversal| {
                ran = true;
                traversal.refresh_node(a);
                traversal.refresh_node(b);
            });
        });
        ran
    };

    assert!(pass(1, false));
    assert!(!pass(1, false));
    assert_eq!(fixture.names(fixture.tree.root()), vec!["head", "a", "b"]);
    assert!(pass(2, false));
    assert!(pass(2, true));
    assert!(!pass(2, false));
}

#[test]
fn cached_subtree_reruns_when_its_position_changes() {
    let fixture = Fixture::new(&["head", "a"]);
    let (head, a) = (fixture.id("head"), fixture.id("a"));
    let mut cache = SubtreeCache::default();
    let mut pass = |with_head: bool| -> bool {
        fixture.tree.traverse(|traversal| {
            if with_head {
                traversal.refresh_node(head);
            }
            traversal.cached_subtree(&mut cache, &"content", false, |traversal| {
                traversal.refresh_node(a);
            })
        })
    };

    assert!(pass(true));
    assert!(!pass(true));
    assert!(pass(false));
    assert_eq!(fixture.names(fixture.tree.root()), vec!["a"]);
}

#[test]
fn data_bound_nodes_follow_their_slots() {
    let graph = GraphHost::new();
    let log = Log::default();
    let tree = Tree::new(Element {
        name: "root",
        log: Rc::clone(&log),
    });
    let names = ["a", "b", "c"];
    let pass = |visible: &[&'static str]| {
        log.borrow_mut().clear();
        tree.traverse(|traversal| {
            DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
                data.for_each_keyed(
                    visible.iter().copied(),
                    |name| *name,
                    |data, name| {
                        tree_node(data, traversal, || Element {
                            name,
                            log: Rc::clone(&log),
                        });
                        Ok(())
                    },
                )
            })
        })
        .unwrap();
        log.borrow_mut().drain(..).collect::<Vec<_>>()
    };

    assert_eq!(pass(&names).len(), 3);
    assert!(pass(&names).is_empty());
    assert_eq!(pass(&["a", "c"]), vec!["remove b"]);
    assert_eq!(tree.len(), 3);
    assert_eq!(pass(&["c", "a"]), vec!["relocate c root>-"]);
}

#[test]
fn cached_subtree_reuses_data_and_nodes() {
    let graph = GraphHost::new();
    let log = Log::default();
    let tree = Tree::new(Element {
        name: "root",
        log: Rc::clone(&log),
    });
    let runs = RefCell::new(0);
    let pass = |content: u32| {
        tree.traverse(|traversal| {
            DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
                cached_subtree(data, traversal, &content, false, |data, traversal| {
                    *runs.borrow_mut() += 1;
                    tree_node(data, traversal, || Element {
                        name: "cached",
                        log: Rc::clone(&log),
                    });
                    Ok(())
                })
            })
        })
        .unwrap()
    };

    assert!(pass(1));
    assert!(!pass(1));
    assert!(pass(2));
    assert_eq!(*runs.borrow(), 2);
    assert_eq!(tree.children(tree.root()).len(), 1);
    assert_eq!(tree.len(), 2);
}
