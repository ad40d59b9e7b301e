use super::*;
use std::cell::{Cell, RefCell};
use crate::{dump_tree, OpLog, RecordingObject};
use strata_core::{tree_node, PassKind, Tree, TreeNodeId};

fn blinker(
    blinks: Rc<Cell<u32>>,
    period: u64,
    handle: Rc<RefCell<Option<ComponentHandle>>>,
) -> impl FnMut(&Context) -> TraversalResult {
    move |ctx| {
        ctx.component(|ctx, _| {
            if let Some(container) = ctx.active_container() {
                handle.borrow_mut().get_or_insert_with(|| container.handle());
            }
            let timer = ctx.timer();
            if timer.is_triggered() {
                blinks.set(blinks.get() + 1);
                ctx.mark_dirty();
            }
            if !timer.is_active() {
                timer.start(period);
            }
            Ok(())
        })
    }
}

#[test]
fn timers_fire_when_time_reaches_them() {
    let blinks = Rc::new(Cell::new(0));
    let handle = Rc::new(RefCell::new(None));
    let mut harness = TestSystem::new(blinker(Rc::clone(&blinks), 100, Rc::clone(&handle)));
    harness.refresh().unwrap();
    assert_eq!(harness.scheduler().next_due(), Some(100));

    assert_eq!(harness.advance_time(50).unwrap(), 0);
    assert_eq!(blinks.get(), 0);

    assert_eq!(harness.advance_time(50).unwrap(), 1);
    assert_eq!(blinks.get(), 1);
    assert_eq!(harness.scheduler().next_due(), Some(200));
    assert!(!harness.system().needs_refresh());

    assert_eq!(harness.advance_time(250).unwrap(), 1);
    assert_eq!(blinks.get(), 2);
    assert_eq!(harness.scheduler().next_due(), Some(450));
    assert!(handle.borrow().as_ref().is_some_and(ComponentHandle::is_alive));
}

#[test]
#[should_panic(expected = "looped too many times")]
fn self_rearming_timer_is_reported_as_a_loop() {
    let blinks = Rc::new(Cell::new(0));
    let handle = Rc::new(RefCell::new(None));
    let mut harness = TestSystem::new(blinker(blinks, 0, handle));
    harness.refresh().unwrap();
    let _ = harness.pump_until_idle();
}

#[test]
fn animation_frames_run_only_while_requested() {
    let frames = Rc::new(Cell::new(0));
    let controller = {
        let frames = Rc::clone(&frames);
        move |ctx: &Context| {
            ctx.component(|ctx, _| {
                if ctx.is_refresh() && frames.get() < 3 {
                    frames.set(frames.get() + 1);
                    ctx.animation_tick();
                }
                Ok(())
            })
        }
    };
    let mut harness = TestSystem::new(controller);
    harness.refresh().unwrap();
    assert_eq!(harness.scheduler().animation_requests(), 1);

    assert!(harness.advance_frame(16).unwrap());
    assert!(harness.advance_frame(16).unwrap());
    assert!(harness.advance_frame(16).unwrap());
    assert_eq!(frames.get(), 3);
    assert!(!harness.system().is_animating());
    assert!(!harness.advance_frame(16).unwrap());
    assert_eq!(harness.clock().now_millis(), 64);
}

#[derive(Debug, PartialEq, Eq)]
struct Increment(u32);

#[test]
fn dispatch_settles_the_refresh_it_causes() {
    let total = Rc::new(Cell::new(0));
    let refreshes = Rc::new(Cell::new(0));
    let target = Rc::new(RefCell::new(None));
    let controller = {
        let total = Rc::clone(&total);
        let refreshes = Rc::clone(&refreshes);
        let target = Rc::clone(&target);
        move |ctx: &Context| {
            if ctx.is_refresh() {
                refreshes.set(refreshes.get() + 1);
            }
            ctx.component(|ctx, _| {
                if let Some(container) = ctx.active_container() {
                    target.borrow_mut().get_or_insert_with(|| container.handle());
                }
                ctx.on_targeted_event(|ctx, event: &mut Increment| {
                    total.set(total.get() + event.0);
                    event.0 = 0;
                    ctx.mark_dirty();
                });
                Ok(())
            })
        }
    };

    run_test_system(controller, |harness| {
        harness.refresh().unwrap();
        let target = target.borrow().clone().unwrap();
        let event = harness.dispatch_to(&target, Increment(4)).unwrap();
        assert_eq!(event, Increment(0));
        assert_eq!(total.get(), 4);
        assert_eq!(refreshes.get(), 2);
        assert!(!harness.system().needs_refresh());

        harness.broadcast(Increment(9)).unwrap();
        assert_eq!(total.get(), 4);
        assert_eq!(refreshes.get(), 2);
    });
}

#[test]
fn quiet_config_leaves_refresh_to_the_pump() {
    let controller = |ctx: &Context| {
        ctx.component(|ctx, _| {
            ctx.on_event(|ctx, _: &mut ()| ctx.mark_dirty());
            Ok(())
        })
    };
    let mut harness = TestSystem::new(controller)
        .with_config(SystemConfig::default().with_refresh_after_dispatch(false));
    harness.refresh().unwrap();

    harness.system_mut().broadcast(()).unwrap();
    assert!(harness.system().needs_refresh());
    harness.pump_until_idle().unwrap();
    assert!(!harness.system().needs_refresh());

    let passes = harness.system().pass_count();
    harness
        .system_mut()
        .run_pass(PassKind::Broadcast, Box::new(()), None)
        .unwrap();
    assert_eq!(harness.system().pass_count(), passes + 1);
}

#[test]
fn keyed_list_reconciles_through_the_harness() {
    let log = OpLog::new();
    let items = Rc::new(RefCell::new(vec!["a", "b", "c"]));
    let tree = Tree::new(RecordingObject::new("root", &log));
    let controller = {
        let (log, items, tree) = (log.clone(), Rc::clone(&items), tree.clone());
        move |ctx: &Context| {
            tree.traverse(|traversal| {
                let visible = items.borrow().clone();
                ctx.for_each_keyed(visible, |item| *item, |ctx, item| {
                    tree_node(ctx.data(), traversal, || RecordingObject::new(item, &log));
                    Ok(())
                })
            })
        }
    };
    let mut harness = TestSystem::new(controller);
    harness.refresh().unwrap();
    assert_eq!(log.take().len(), 3);

    *items.borrow_mut() = vec!["c", "a"];
    harness.root().mark_dirty();
    harness.pump_until_idle().unwrap();
    assert_eq!(log.take(), vec!["relocate c root>-", "remove b"]);
    assert_eq!(dump_tree(&tree), "root\n  c\n  a\n");

    let placed: Vec<TreeNodeId> = tree.children(tree.root());
    assert_eq!(placed.len(), 2);
}
