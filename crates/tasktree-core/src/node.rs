//! The node execution contract

use crate::context::{Blackboard, Context};
use crate::error::Result;
use crate::hooks;
use crate::outcome::Outcome;
use crate::trace::{TraceHandle, TraceStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Identity assigned to every node at build time. `fullname` is the
/// slash-joined path from the tree root, unique within a tree; it keys the
/// node's trace spans and is stable cache-key material.
#[derive(Clone, Debug)]
pub struct Meta {
    pub name: String,
    pub fullname: String,
}

/// Shared, immutable reference to a node. Children are owned by their
/// parent through these; the graph is a tree, never cyclic.
pub type NodeRef<B> = Arc<dyn Node<B>>;

/// One executable unit of a tree: leaf, composite or decorator.
///
/// `tick` returns `Err` only for programming errors (see [`crate::error`]);
/// runtime failures come back as `Ok(Outcome::fail(..))`. `prev` is the
/// most recent sibling outcome, threaded through Sequence so taps like
/// WriteBlackboard and ParseJSON can default to it.
#[async_trait::async_trait]
pub trait Node<B: Blackboard>: Send + Sync {
    fn meta(&self) -> &Meta;

    /// Constant tag per node type, e.g. `"Sequence"`.
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn fullname(&self) -> &str {
        &self.meta().fullname
    }

    fn children(&self) -> &[NodeRef<B>] {
        &[]
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome>;
}

/// Invoke a child node: open its trace span under `parent`, tick it, close
/// the span with the result. Every in-tree invocation goes through here, so
/// the span invariant (exactly one span per invocation, closed on every
/// path) holds for custom node kinds too.
pub async fn invoke<B: Blackboard>(
    node: &NodeRef<B>,
    ctx: &Context<B>,
    parent: &TraceHandle,
    prev: &Outcome,
) -> Result<Outcome> {
    let tracer = parent.begin_child(node.fullname(), node.kind());
    debug!(node = node.fullname(), kind = node.kind(), "tick");
    let ticked = node.tick(ctx, &tracer, prev).await;
    match &ticked {
        Ok(out) => tracer.close(if out.is_ok() {
            TraceStatus::Ok
        } else {
            TraceStatus::Fail
        }),
        Err(err) => {
            error!(node = node.fullname(), error = %err, "programming error");
            tracer.close(TraceStatus::Error);
        }
    }
    ticked
}

/// A child running as its own tokio task, plus the trace span it reports
/// into. The span is opened before spawning so sibling order in the trace
/// matches attachment order, and so the owner can finalize it after an
/// abort.
pub(crate) struct SpawnedChild {
    pub tracer: TraceHandle,
    pub handle: JoinHandle<Result<Outcome>>,
}

/// Spawn a node as an independent task.
///
/// When `fire_hook` is set, the process-wide spawned-task hooks run exactly
/// once inside the task after it finishes on its own; a task that gets
/// aborted instead never reaches that point and its owner is responsible
/// for firing the hook with the cancelled outcome.
pub(crate) fn spawn_child<B: Blackboard>(
    node: &NodeRef<B>,
    ctx: &Context<B>,
    parent: &TraceHandle,
    prev: &Outcome,
    limiter: Option<Arc<tokio::sync::Semaphore>>,
    fire_hook: bool,
) -> SpawnedChild {
    let tracer = parent.begin_child(node.fullname(), node.kind());
    let task_tracer = tracer.clone();
    let node = node.clone();
    let ctx = ctx.clone();
    let prev = prev.clone();

    let handle = tokio::spawn(async move {
        let _permit = match limiter {
            Some(sem) => sem.acquire_owned().await.ok(),
            None => None,
        };
        let ticked = node.tick(&ctx, &task_tracer, &prev).await;
        match &ticked {
            Ok(out) => {
                task_tracer.close(if out.is_ok() {
                    TraceStatus::Ok
                } else {
                    TraceStatus::Fail
                });
                if fire_hook {
                    hooks::fire_spawned_task_finished(&task_tracer, out).await;
                }
            }
            Err(err) => {
                error!(node = node.fullname(), error = %err, "programming error");
                task_tracer.close(TraceStatus::Error);
            }
        }
        ticked
    });

    SpawnedChild { tracer, handle }
}
