use std::fmt;

/// Errors that end a traversal pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    /// A named block was requested out of the order recorded on the previous
    /// pass while garbage collection was disabled.
    NamedBlockOutOfOrder { requested: String },
    /// Intentional early termination of an event dispatch. The driver consumes
    /// this at the dispatch boundary; application code only forwards it.
    Aborted,
    /// The root stayed dirty after the configured number of refresh passes.
    RefreshOverrun { passes: usize },
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalError::NamedBlockOutOfOrder { requested } => {
                write!(
                    f,
                    "named block {requested} visited out of order with garbage collection disabled"
                )
            }
            TraversalError::Aborted => f.write_str("traversal aborted"),
            TraversalError::RefreshOverrun { passes } => {
                write!(f, "system still dirty after {passes} refresh passes")
            }
        }
    }
}

impl std::error::Error for TraversalError {}

pub type TraversalResult<T = ()> = Result<T, TraversalError>;
