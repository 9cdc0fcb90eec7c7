//! Cancellation decorators: Timeout and Terminable
//!
//! Both run their primary child as a spawned task so it can be aborted.
//! Cancellation is fully settled before a fallback runs: the task is
//! aborted, awaited, and its trace spans closed as cancelled. An abort
//! never leaks past the decorator as a fault.

use crate::context::{Blackboard, Context};
use crate::error::{Error, Result};
use crate::hooks;
use crate::node::{invoke, spawn_child, Meta, Node, NodeRef, SpawnedChild};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tasktree_store::KvStore;

/// Abort a spawned child and settle it: await the join, close any still
/// open trace spans as cancelled. Returns the child's own result when it
/// had already finished before the abort landed, in which case its spans
/// are closed and, if it fired hooks, they have run inside the task.
async fn settle_cancelled(mut spawned: SpawnedChild) -> Option<Result<Outcome>> {
    spawned.handle.abort();
    let joined = (&mut spawned.handle).await;
    spawned.tracer.close_cancelled();
    joined.ok()
}

/// Bounds the primary child's wall-clock time. On expiry the child task is
/// cancelled and the fallback child (when present) runs instead; without a
/// fallback the result is FAIL(Null).
pub struct TimeoutNode<B> {
    pub(crate) meta: Meta,
    pub(crate) duration: Duration,
    /// `[primary]` or `[primary, fallback]`, validated at build time.
    pub(crate) children: Vec<NodeRef<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for TimeoutNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Timeout"
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
        let mut spawned = spawn_child(&self.children[0], ctx, tracer, prev, None, false);

        match tokio::time::timeout(self.duration, &mut spawned.handle).await {
            Ok(joined) => {
                joined.map_err(|e| Error::programming(format!("timeout child panicked: {e}")))?
            }
            Err(_) => {
                let _ = settle_cancelled(spawned).await;
                match self.children.get(1) {
                    Some(fallback) => invoke(fallback, ctx, tracer, prev).await,
                    None => Ok(Outcome::fail(Value::Null)),
                }
            }
        }
    }
}

/// Pass-through container marking a Terminable's fallback branch.
pub struct FallbackNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for FallbackNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Fallback"
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

/// Runs the primary child as a spawned task while polling a store key for
/// an external termination signal. A signal cancels the child, consumes
/// the key, and hands control to the fallback branch (FAIL(Null) without
/// one). The spawned-task hooks fire exactly once for the primary task,
/// with its natural outcome or with the cancelled FAIL.
pub struct TerminableNode<B> {
    pub(crate) meta: Meta,
    pub(crate) signal_key: Box<dyn Fn(&B) -> String + Send + Sync>,
    pub(crate) monitor_interval: Duration,
    /// None falls back to the process default at tick time.
    pub(crate) store: Option<Arc<dyn KvStore>>,
    /// `[primary]` or `[primary, fallback]`, validated at build time.
    pub(crate) children: Vec<NodeRef<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for TerminableNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Terminable"
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
        let store = self
            .store
            .clone()
            .or_else(crate::config::default_store)
            .ok_or_else(|| Error::NoStore(self.meta.fullname.clone()))?;
        let key = {
            let guard = ctx.board().lock().await;
            (self.signal_key)(&guard)
        };

        let mut spawned = spawn_child(&self.children[0], ctx, tracer, prev, None, true);
        loop {
            match tokio::time::timeout(self.monitor_interval, &mut spawned.handle).await {
                Ok(joined) => {
                    return joined.map_err(|e| {
                        Error::programming(format!("terminable child panicked: {e}"))
                    })?;
                }
                Err(_) => {
                    let triggered = store.exists(&key).await.unwrap_or(false);
                    if !triggered {
                        continue;
                    }
                    let cancelled_tracer = spawned.tracer.clone();
                    if let Some(finished) = settle_cancelled(spawned).await {
                        // The child completed during the signal check. Its
                        // hook already fired in-task and the signal was
                        // never acted on, so the key stays put.
                        return finished;
                    }
                    hooks::fire_spawned_task_finished(
                        &cancelled_tracer,
                        &Outcome::fail(Value::Null),
                    )
                    .await;
                    // Consume the signal so a later run keyed the same way
                    // is not killed on entry.
                    let _ = store.delete(&key).await;
                    return match self.children.get(1) {
                        Some(fallback) => invoke(fallback, ctx, tracer, prev).await,
                        None => Ok(Outcome::fail(Value::Null)),
                    };
                }
            }
        }
    }
}
