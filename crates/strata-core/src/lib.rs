#![doc = r"Retained-state engine for declarative UI: a data-association graph keyed by control flow, a component tree with event routing, and an ordered-tree reconciler."]

pub mod component;
pub mod context;
pub mod data_graph;
pub mod error;
pub mod event;
pub mod identity;
pub mod owned;
pub mod platform;
pub mod system;
mod timer;
pub mod tree;

pub use component::{ComponentContainer, ComponentHandle, ComponentId};
pub use context::{Capabilities, Context};
pub use data_graph::{
    BlockId, DataGraph, DataTraversal, DataTraversalOptions, GraphHost, ManualDelete,
    NamedBlockStats, NamingContext, SwitchBlock,
};
pub use error::{TraversalError, TraversalResult};
pub use event::{ComponentFacts, ComponentScope, EventTraversal, PassKind, RefreshEvent};
pub use identity::{CapturedId, DefaultCase, Identity};
pub use owned::Owned;
pub use platform::{Clock, HostScheduler, NoopScheduler, SystemClock};
pub use system::{Controller, System, SystemConfig, SystemHandle};
pub use timer::{Timer, TimerEvent};
pub use tree::{
    cached_subtree, tree_node, PlacedObject, SubtreeCache, Tree, TreeNodeId, TreeNodeSlot,
    TreeTraversal,
};

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod identity_tests;

#[cfg(test)]
#[path = "tests/data_graph_tests.rs"]
mod data_graph_tests;

#[cfg(test)]
#[path = "tests/named_block_tests.rs"]
mod named_block_tests;

#[cfg(test)]
#[path = "tests/component_tests.rs"]
mod component_tests;

#[cfg(test)]
#[path = "tests/system_tests.rs"]
mod system_tests;

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tree_tests;
