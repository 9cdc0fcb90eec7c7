//! Single-child decorators: status reshaping, branching, retry, subtrees,
//! wrappers
//!
//! Timeout and Terminable also decorate a single primary child but involve
//! task spawning and cancellation; they live in `nodes::timeout`.

use crate::behavior::{Condition, DataFactory, RetrySleep};
use crate::builder::Tree;
use crate::context::{Blackboard, BoardHandle, Context};
use crate::error::Result;
use crate::node::{invoke, Meta, Node, NodeRef};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use futures::future::BoxFuture;
use serde_json::Value;

/// Flips the child's status, keeping its data.
pub struct InvertNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for InvertNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Invert"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let out = invoke(&self.child, ctx, tracer, prev).await?;
        Ok(out.inverted())
    }
}

/// Forces the child's status to OK. Data is the child's own unless a
/// factory was supplied.
pub struct ForceOkNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) data: Option<DataFactory<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ForceOkNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "ForceOk"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let out = invoke(&self.child, ctx, tracer, prev).await?;
        let data = match &self.data {
            Some(factory) => ctx.board().read(|b| factory(b)).await,
            None => out.data,
        };
        Ok(Outcome::ok(data))
    }
}

/// Forces the child's status to FAIL. Data follows the same rule as
/// ForceOk.
pub struct ForceFailNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) data: Option<DataFactory<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ForceFailNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "ForceFail"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let out = invoke(&self.child, ctx, tracer, prev).await?;
        let data = match &self.data {
            Some(factory) => ctx.board().read(|b| factory(b)).await,
            None => out.data,
        };
        Ok(Outcome::fail(data))
    }
}

/// Keeps the child's status but replaces its data with the factory's
/// value.
pub struct ReturnNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) data: DataFactory<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ReturnNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Return"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let out = invoke(&self.child, ctx, tracer, prev).await?;
        let data = ctx.board().read(|b| (self.data)(b)).await;
        Ok(out.with_data(data))
    }
}

/// Conditional branch. Runs the then-branch when the condition holds,
/// otherwise the else-branch; no else-branch means OK(Null). The
/// else-branch slot only accepts an Else node, enforced at build time.
pub struct IfNode<B> {
    pub(crate) meta: Meta,
    pub(crate) condition: Condition<B>,
    /// `[then]` or `[then, else]`.
    pub(crate) children: Vec<NodeRef<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for IfNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "If"
    }

    fn children(&self) -> &[NodeRef<B>] {
        &self.children
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        if self.condition.eval(ctx.board()).await {
            return invoke(&self.children[0], ctx, tracer, prev).await;
        }
        match self.children.get(1) {
            Some(else_branch) => invoke(else_branch, ctx, tracer, prev).await,
            None => Ok(Outcome::none()),
        }
    }
}

/// Pass-through container for an If node's else-branch.
pub struct ElseNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ElseNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Else"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        invoke(&self.child, ctx, tracer, prev).await
    }
}

/// Re-invokes a failing child up to `max_tries` times, sleeping between
/// attempts per the schedule. First OK wins; exhaustion is FAIL(Null)
/// regardless of what the last attempt carried.
pub struct RetryNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) max_tries: usize,
    pub(crate) sleep: RetrySleep,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for RetryNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Retry"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        for attempt in 0..self.max_tries {
            let out = invoke(&self.child, ctx, tracer, prev).await?;
            if out.is_ok() {
                return Ok(out);
            }
            let last_attempt = attempt + 1 == self.max_tries;
            if !last_attempt {
                if let Some(gap) = self.sleep.gap(attempt) {
                    tokio::time::sleep(gap).await;
                }
            }
        }
        Ok(Outcome::fail(Value::Null))
    }
}

/// Runs a prebuilt tree in place against the parent's board.
pub struct SubtreeNode<B> {
    pub(crate) meta: Meta,
    pub(crate) root: NodeRef<B>,
}

impl<B: Blackboard> SubtreeNode<B> {
    pub(crate) fn from_tree(meta: Meta, tree: Tree<B>) -> Self {
        Self {
            meta,
            root: tree.into_root(),
        }
    }
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for SubtreeNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Subtree"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.root)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        invoke(&self.root, ctx, tracer, prev).await
    }
}

/// Runs a prebuilt tree against a fresh board derived from the parent's.
/// The parent board is untouched by the subtree's mutations.
pub struct MappedSubtreeNode<B, C> {
    pub(crate) meta: Meta,
    pub(crate) root: NodeRef<C>,
    pub(crate) board_factory: Box<dyn Fn(&B) -> C + Send + Sync>,
}

#[async_trait::async_trait]
impl<B: Blackboard, C: Blackboard> Node<B> for MappedSubtreeNode<B, C> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Subtree"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let board = {
            let guard = ctx.board().lock().await;
            (self.board_factory)(&guard)
        };
        let child_ctx = ctx.derive(BoardHandle::new(board));
        invoke(&self.root, &child_ctx, tracer, prev).await
    }
}

/// Wrapper callable: receives the child and everything needed to invoke
/// it, runs arbitrary code around that invocation, returns the outcome to
/// propagate.
pub type WrapFn<B> = Box<
    dyn Fn(NodeRef<B>, Context<B>, TraceHandle, Outcome) -> BoxFuture<'static, anyhow::Result<Outcome>>
        + Send
        + Sync,
>;

/// Brackets its child with caller code (setup, teardown, resource scopes).
/// The wrapper drives the child itself through [`invoke`]; a wrapper error
/// is absorbed into FAIL(Null).
pub struct WrapperNode<B: Blackboard> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) wrap: WrapFn<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for WrapperNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Wrapper"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.child)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let wrapped = (self.wrap)(
            self.child.clone(),
            ctx.clone(),
            tracer.clone(),
            prev.clone(),
        )
        .await;
        Ok(match wrapped {
            Ok(out) => out,
            Err(err) => {
                tracer.set_attribute("error", err.to_string());
                Outcome::fail(Value::Null)
            }
        })
    }
}
