#![doc = r"Headless test support for Strata: a manually driven host, a recording tree backend and a harness that pumps passes until the system is idle."]

mod host;
mod recording;
mod testing;

pub use host::{ManualClock, ManualScheduler};
pub use recording::{dump_tree, OpLog, RecordingObject};
pub use testing::{run_test_system, TestSystem};
