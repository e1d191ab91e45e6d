//! Search over interpretation decisions.
//!
//! ## Modules
//!
//! - [`log`]: `StateChangeLog`, the undo journal used to backtrack
//! - [`tree`]: `SearchNode`, `Branch` and the branch-and-bound driver

pub mod log;
pub mod tree;

pub use log::{LogMark, StateChange, StateChangeLog};
pub use tree::{Branch, BranchKind, NodeState, PruneReason, SearchNode, SearchTree};

pub(crate) use tree::SearchContext;
