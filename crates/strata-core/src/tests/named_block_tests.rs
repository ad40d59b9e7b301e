use crate::data_graph::{DataTraversal, DataTraversalOptions, GraphHost, ManualDelete};
use crate::error::{TraversalError, TraversalResult};
use crate::identity::Identity;
use crate::owned::Owned;
use std::collections::HashMap;
use std::rc::Rc;

fn visit_named(
    graph: &Rc<GraphHost>,
    options: DataTraversalOptions,
    keys: &[&'static str],
) -> TraversalResult<HashMap<&'static str, Owned<u32>>> {
    DataTraversal::traverse(graph, options, |data| {
        let mut slots = HashMap::new();
        data.naming_context(|naming| -> TraversalResult {
            for key in keys {
                let slot = naming.named_block(key, |data| Ok(data.get_data::<u32>().0))?;
                slots.insert(*key, slot);
            }
            Ok(())
        })?;
        Ok(slots)
    })
}

#[test]
fn named_blocks_follow_identity_across_reorders() {
    let graph = GraphHost::new();
    let first = visit_named(&graph, DataTraversalOptions::refresh(), &["a", "b", "c"]).unwrap();
    let second = visit_named(&graph, DataTraversalOptions::refresh(), &["c", "a", "b"]).unwrap();

    for key in ["a", "b", "c"] {
        assert!(first[key].ptr_eq(&second[key]), "block {key} moved storage");
    }
    assert_eq!(graph.borrow().named_block_count(), 3);
    for key in ["a", "b", "c"] {
        let stats = graph.borrow().named_block_stats(&key);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].reference_count, 1);
        assert_eq!(stats[0].active_count, 1);
    }
}

#[test]
fn unvisited_named_block_is_collected() {
    let graph = GraphHost::new();
    visit_named(&graph, DataTraversalOptions::refresh(), &["a", "b", "c"]).unwrap();
    let kept = visit_named(&graph, DataTraversalOptions::refresh(), &["a", "c"]).unwrap();

    assert_eq!(graph.borrow().named_block_count(), 2);
    assert!(graph.borrow().named_block_stats(&"b").is_empty());

    let again = visit_named(&graph, DataTraversalOptions::refresh(), &["a", "b", "c"]).unwrap();
    assert!(again["a"].ptr_eq(&kept["a"]));
    assert!(again["c"].ptr_eq(&kept["c"]));
}

#[test]
fn out_of_order_lookup_without_gc_fails() {
    let graph = GraphHost::new();
    visit_named(&graph, DataTraversalOptions::refresh(), &["a", "b"]).unwrap();
    visit_named(&graph, DataTraversalOptions::event(), &["a", "b"]).unwrap();

    let error = visit_named(&graph, DataTraversalOptions::event(), &["b", "a"]).unwrap_err();
    assert!(matches!(error, TraversalError::NamedBlockOutOfOrder { .. }));
    assert_eq!(graph.borrow().named_block_count(), 2);
}

#[test]
fn partial_visit_without_gc_keeps_unvisited_blocks() {
    let graph = GraphHost::new();
    let first = visit_named(&graph, DataTraversalOptions::refresh(), &["a", "b", "c"]).unwrap();
    visit_named(&graph, DataTraversalOptions::event(), &["a"]).unwrap();
    assert_eq!(graph.borrow().named_block_count(), 3);

    let second = visit_named(&graph, DataTraversalOptions::event(), &["a", "b", "c"]).unwrap();
    for key in ["a", "b", "c"] {
        assert!(first[key].ptr_eq(&second[key]));
    }
}

#[test]
fn manual_delete_block_survives_with_cleared_cache() {
    let graph = GraphHost::new();
    let pass = |include: bool| -> TraversalResult<Option<(Owned<u32>, Owned<u32>, bool)>> {
        DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
            data.naming_context(|naming| {
                if !include {
                    return Ok(None);
                }
                naming
                    .named_block_with(&"pinned", ManualDelete::Yes, |data| {
                        let (value, _) = data.get_data::<u32>();
                        let (cached, cached_new) = data.get_cached_data::<u32>();
                        Ok((value, cached, cached_new))
                    })
                    .map(Some)
            })
        })
    };

    let (value, cached, _) = pass(true).unwrap().unwrap();
    value.replace(3);
    cached.replace(4);

    pass(false).unwrap();
    let stats = graph.borrow().named_block_stats(&"pinned");
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].reference_count, 0);
    assert_eq!(stats[0].active_count, 0);
    assert!(stats[0].manual_delete);

    let (value_again, cached_again, cached_new) = pass(true).unwrap().unwrap();
    assert!(value_again.ptr_eq(&value));
    assert_eq!(value_again.get(), 3);
    assert!(cached_new);
    assert_eq!(cached_again.get(), 0);

    pass(false).unwrap();
    graph.delete_named_block(&"pinned");
    assert_eq!(graph.borrow().named_block_count(), 0);
}

#[test]
fn deleting_a_referenced_block_defers_to_release() {
    let graph = GraphHost::new();
    let pass = |include: bool| {
        DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
            data.naming_context(|naming| -> TraversalResult {
                if include {
                    naming.named_block_with(&7u64, ManualDelete::Yes, |_| Ok(()))?;
                }
                Ok(())
            })
        })
        .unwrap();
    };

    pass(true);
    graph.delete_named_block(&7u64);
    assert_eq!(graph.borrow().named_block_count(), 1);
    assert!(!graph.borrow().named_block_stats(&7u64)[0].manual_delete);

    pass(false);
    assert_eq!(graph.borrow().named_block_count(), 0);
}

#[test]
fn dropping_the_naming_context_destroys_its_blocks() {
    let graph = GraphHost::new();
    DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
        data.if_(true, |data| {
            data.naming_context(|naming| naming.named_block(&1u8, |_| Ok(())))
        })
    })
    .unwrap();
    assert_eq!(graph.borrow().naming_map_count(), 1);

    DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
        data.get_data::<bool>();
    });
    assert_eq!(graph.borrow().naming_map_count(), 0);
    assert_eq!(graph.borrow().named_block_count(), 0);
}

#[test]
fn switch_cases_keep_separate_state() {
    let graph = GraphHost::new();
    let pass = |label: Option<&'static str>| -> TraversalResult<Owned<u32>> {
        DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
            data.switch(|switch| match label {
                Some(label) => switch.case(&label, |data| Ok(data.get_data::<u32>().0)),
                None => switch.default(|data| Ok(data.get_data::<u32>().0)),
            })
        })
    };

    pass(Some("one")).unwrap().replace(1);
    pass(Some("two")).unwrap().replace(2);
    pass(None).unwrap().replace(9);

    assert_eq!(pass(Some("one")).unwrap().get(), 0);
    assert_eq!(pass(None).unwrap().get(), 0);
    assert_eq!(graph.borrow().named_block_count(), 1);
}

#[test]
fn keyed_loop_moves_data_with_items() {
    let graph = GraphHost::new();
    let pass = |items: &[(u32, &'static str)]| -> Vec<(u32, String)> {
        DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
            let mut seen = Vec::new();
            data.for_each_keyed(
                items.iter().copied(),
                |(key, _)| *key,
                |data, (key, label)| {
                    let (slot, is_new) = data.get_data::<String>();
                    if is_new {
                        slot.replace(label.to_owned());
                    }
                    seen.push((key, slot.get()));
                    Ok(())
                },
            )
            .unwrap();
            seen
        })
    };

    pass(&[(1, "one"), (2, "two")]);
    let reordered = pass(&[(2, "changed"), (1, "changed"), (3, "three")]);
    assert_eq!(
        reordered,
        vec![
            (2, "two".to_owned()),
            (1, "one".to_owned()),
            (3, "three".to_owned()),
        ]
    );
}

#[test]
fn identities_of_different_types_name_different_blocks() {
    let graph = GraphHost::new();
    DataTraversal::traverse(&graph, DataTraversalOptions::refresh(), |data| {
        data.naming_context(|naming| -> TraversalResult {
            let keys: [&dyn Identity; 2] = [&1u32, &1u64];
            for key in keys {
                naming.named_block(key, |_| Ok(()))?;
            }
            Ok(())
        })
    })
    .unwrap();
    assert_eq!(graph.borrow().named_block_count(), 2);
}

fn visit_rows(
    graph: &Rc<GraphHost>,
    rows: &[u32],
    panic_at: Option<(u32, &'static str)>,
) -> TraversalResult<Vec<Owned<u32>>> {
    DataTraversal::traverse(graph, DataTraversalOptions::refresh(), |data| {
        let mut slots = Vec::new();
        data.for_each(rows.iter().copied(), |data, row| {
            data.naming_context(|naming| -> TraversalResult {
                for key in ["x", "y"] {
                    let slot = naming.named_block(&key, |data| {
                        let (slot, _) = data.get_data::<u32>();
                        if panic_at == Some((row, key)) {
                            panic!("row {row} failed in {key}");
                        }
                        Ok(slot)
                    })?;
                    slots.push(slot);
                }
                Ok(())
            })
        })?;
        Ok(slots)
    })
}

#[test]
fn panic_inside_a_named_block_leaves_the_graph_usable() {
    let graph = GraphHost::new();
    let first = visit_rows(&graph, &[1, 2, 3], None).unwrap();
    let (nodes, blocks) = (graph.borrow().node_count(), graph.borrow().block_count());
    assert_eq!(graph.borrow().named_block_count(), 6);

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        visit_rows(&graph, &[1, 2, 3], Some((2, "x")))
    }));
    assert!(unwound.is_err());

    let again = visit_rows(&graph, &[1, 2, 3], None).unwrap();
    assert_eq!(again.len(), first.len());
    for (before, after) in first.iter().zip(&again) {
        assert!(before.ptr_eq(after));
    }
    assert_eq!(graph.borrow().node_count(), nodes);
    assert_eq!(graph.borrow().block_count(), blocks);
    assert_eq!(graph.borrow().named_block_count(), 6);
    for key in ["x", "y"] {
        let stats = graph.borrow().named_block_stats(&key);
        assert_eq!(stats.len(), 3);
        assert!(stats.iter().all(|stats| stats.reference_count == 1));
    }

    // Rows are positional, so the third iteration and its blocks go away.
    let reordered = visit_rows(&graph, &[3, 1], None).unwrap();
    assert!(reordered[0].ptr_eq(&first[0]));
    assert!(reordered[3].ptr_eq(&first[3]));
    assert_eq!(graph.borrow().named_block_count(), 4);
    assert_eq!(graph.borrow().naming_map_count(), 2);
}
