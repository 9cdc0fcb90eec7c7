//! Fan-out composites: Parallel and Gather
//!
//! Both spawn one tokio task per child, optionally bounded by a semaphore,
//! wait for every task regardless of individual outcomes, and report data
//! positioned by input order with Null at failed positions. They spawn, so
//! the spawned-task hooks fire once per child.

use crate::builder::Tree;
use crate::context::{Blackboard, BoardHandle, Context};
use crate::error::{Error, Result};
use crate::node::{spawn_child, Meta, Node, NodeRef, SpawnedChild};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

async fn collect(spawned: Vec<SpawnedChild>) -> Result<Outcome> {
    let mut data = Vec::with_capacity(spawned.len());
    let mut all_ok = true;
    for child in spawned {
        let out = child
            .handle
            .await
            .map_err(|e| Error::programming(format!("spawned child task panicked: {e}")))??;
        if out.is_ok() {
            data.push(out.data);
        } else {
            all_ok = false;
            data.push(Value::Null);
        }
    }
    let data = Value::Array(data);
    Ok(if all_ok {
        Outcome::ok(data)
    } else {
        Outcome::fail(data)
    })
}

/// Runs all children concurrently and waits for every one of them; a
/// sibling's failure never cancels the others. OK only when all children
/// are OK. Data is a list in attachment order with Null where a child
/// failed.
pub struct ParallelNode<B> {
    pub(crate) meta: Meta,
    pub(crate) children: Vec<NodeRef<B>>,
    /// Validated positive at build time; None means unbounded.
    pub(crate) concurrency_limit: Option<usize>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ParallelNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Parallel"
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
        let limiter = self.concurrency_limit.map(|n| Arc::new(Semaphore::new(n)));
        let spawned: Vec<SpawnedChild> = self
            .children
            .iter()
            .map(|child| spawn_child(child, ctx, tracer, prev, limiter.clone(), true))
            .collect();
        collect(spawned).await
    }
}

/// Factory producing the (tree, blackboard) pairs a Gather runs. Called
/// fresh on every tick against the parent board.
pub type GatherFactory<B, C> = Box<dyn Fn(&B) -> (Vec<Tree<C>>, Vec<C>) + Send + Sync>;

/// Fan-out over dynamically computed subtrees, each bound to its own
/// derived blackboard. Aggregation matches Parallel; a length mismatch
/// between trees and boards is a programming error surfaced to the caller,
/// never a FAIL.
pub struct GatherNode<B, C: Blackboard> {
    pub(crate) meta: Meta,
    pub(crate) factory: GatherFactory<B, C>,
    pub(crate) concurrency_limit: Option<usize>,
}

#[async_trait::async_trait]
impl<B: Blackboard, C: Blackboard> Node<B> for GatherNode<B, C> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Gather"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        let (trees, boards) = {
            let guard = ctx.board().lock().await;
            (self.factory)(&guard)
        };
        if trees.len() != boards.len() {
            return Err(Error::GatherLengthMismatch {
                trees: trees.len(),
                boards: boards.len(),
            });
        }

        let limiter = self.concurrency_limit.map(|n| Arc::new(Semaphore::new(n)));
        let prev = Outcome::none();
        let spawned: Vec<SpawnedChild> = trees
            .into_iter()
            .zip(boards)
            .map(|(tree, board)| {
                let child_ctx = ctx.derive(BoardHandle::new(board));
                spawn_child(tree.root(), &child_ctx, tracer, &prev, limiter.clone(), true)
            })
            .collect();
        collect(spawned).await
    }
}
