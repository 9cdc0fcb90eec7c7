//! Tasktree Core - hierarchical async task execution
//!
//! Trees of nodes (leaves, composites, decorators) built with a
//! stack-cursor builder, executed against a caller-owned blackboard, with
//! a parallel trace tree recorded for every run.

pub mod behavior;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod node;
pub mod nodes;
pub mod outcome;
pub mod storage;
pub mod trace;
pub mod util;

pub use behavior::{Behavior, BehaviorOut, Condition, RetrySleep, Source, Target};
pub use builder::{BuildSpec, CacherOptions, TerminableOptions, Tree, TreeBuilder};
pub use config::{clear_default_store, set_default_store};
pub use context::{Blackboard, BoardHandle, Context};
pub use error::{Error, Result};
pub use hooks::{
    clear_spawned_task_hooks, register_spawned_task_hook, remove_spawned_task_hook, HookId,
};
pub use node::{invoke, Meta, Node, NodeRef};
pub use outcome::{Outcome, Status};
pub use storage::{FileTraceStorage, TraceStorage};
pub use trace::{TraceHandle, TraceNode, TraceStatus};
