use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use strata_core::{
    tree_node, ComponentHandle, Context, PlacedObject, System, TraversalResult, Tree, TreeNodeId,
};

/// Row in the printed list; placement calls go to the log.
struct Row {
    label: String,
}

impl Row {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl PlacedObject for Row {
    fn relocate(&mut self, parent: &Self, after: Option<&Self>) {
        match after {
            Some(after) => log::info!(
                "place {} in {} after {}",
                self.label,
                parent.label,
                after.label
            ),
            None => log::info!("place {} first in {}", self.label, parent.label),
        }
    }

    fn remove(&mut self) {
        log::info!("remove {}", self.label);
    }
}

/// Click delivered to a single row.
#[derive(Debug)]
struct Select;

type Handles = Rc<RefCell<BTreeMap<&'static str, ComponentHandle>>>;

fn list_app(
    tree: Tree<Row>,
    items: Rc<RefCell<Vec<&'static str>>>,
    handles: Handles,
) -> impl FnMut(&Context) -> TraversalResult {
    move |ctx| {
        let visible = items.borrow().clone();
        tree.traverse(|traversal| {
            ctx.for_each_keyed(visible, |item| *item, |ctx, item| {
                ctx.component(|ctx, facts| {
                    tree_node(ctx.data(), traversal, || Row::new(item));
                    let (clicks, _) = ctx.get_data::<u32>();
                    if let Some(container) = ctx.active_container() {
                        handles.borrow_mut().insert(item, container.handle());
                    }
                    ctx.on_targeted_event(|ctx, _: &mut Select| {
                        clicks.update(|clicks| *clicks += 1);
                        ctx.mark_dirty();
                    });
                    if facts.was_dirty {
                        log::info!("{item} clicked {} time(s)", clicks.get());
                    }
                    Ok(())
                })
            })
        })
    }
}

fn print_rows(tree: &Tree<Row>) {
    let labels: Vec<String> = tree
        .children(tree.root())
        .into_iter()
        .filter_map(|id: TreeNodeId| tree.with_object(id, |row| row.label.clone()))
        .collect();
    println!("  [{}]", labels.join(", "));
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    println!("=== Strata List Demo ===");
    println!("A keyed list keeps each row's state while rows move, disappear and return.");
    println!();

    let tree = Tree::new(Row::new("list"));
    let items = Rc::new(RefCell::new(vec!["alpha", "beta", "gamma", "delta"]));
    let handles = Handles::default();
    let mut system = System::new(list_app(
        tree.clone(),
        Rc::clone(&items),
        Rc::clone(&handles),
    ));

    println!("initial:");
    system.refresh()?;
    print_rows(&tree);

    let beta = handles.borrow().get("beta").cloned();
    if let Some(beta) = beta {
        println!("click beta twice:");
        system.dispatch_targeted(&beta, Select)?;
        system.dispatch_targeted(&beta, Select)?;
    }

    println!("move delta to the front and drop gamma:");
    *items.borrow_mut() = vec!["delta", "alpha", "beta"];
    system.root().mark_dirty();
    system.refresh()?;
    print_rows(&tree);

    println!("bring gamma back at the end:");
    items.borrow_mut().push("gamma");
    system.root().mark_dirty();
    system.refresh()?;
    print_rows(&tree);

    let beta = handles.borrow().get("beta").cloned();
    if let Some(beta) = beta {
        println!("beta kept its state; click once more:");
        system.dispatch_targeted(&beta, Select)?;
    }

    let graph = system.graph().borrow();
    println!();
    println!(
        "{} passes, {} data nodes, {} named blocks, {} tree nodes",
        system.pass_count(),
        graph.node_count(),
        graph.named_block_count(),
        tree.len()
    );
    Ok(())
}
