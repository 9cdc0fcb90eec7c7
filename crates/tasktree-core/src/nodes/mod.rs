//! All built-in node kinds
//!
//! Leaves produce outcomes, composites aggregate children under a policy,
//! decorators reshape a single child's execution or outcome.

pub mod cache;
pub mod composite;
pub mod decorator;
pub mod leaf;
pub mod parallel;
pub mod timeout;

pub use cache::CacherNode;
pub use composite::{RandomSelectorNode, SelectorNode, SequenceNode, WhileNode};
pub use decorator::{
    ElseNode, ForceFailNode, ForceOkNode, IfNode, InvertNode, MappedSubtreeNode, RetryNode,
    ReturnNode, SubtreeNode, WrapperNode,
};
pub use leaf::{
    AssertNode, ConstantNode, FailureNode, FunctionNode, LogMessage, LogNode, ParseJsonNode,
    WriteBlackboardNode,
};
pub use parallel::{GatherNode, ParallelNode};
pub use timeout::{FallbackNode, TerminableNode, TimeoutNode};
