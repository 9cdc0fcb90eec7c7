//! Serial composites: Sequence, Selector, RandomSelector, While
//!
//! Parallel and Gather live in `nodes::parallel`; they spawn tasks instead
//! of awaiting children in place.

use crate::behavior::Condition;
use crate::context::{Blackboard, Context};
use crate::error::Result;
use crate::node::{invoke, Meta, Node, NodeRef};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use crate::util::weighted_shuffle;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

/// Runs children in order, threading each child's outcome into the next as
/// `prev`. Stops at the first FAIL. A failing child that carried no data
/// fails the sequence with the last successful child's data instead, so the
/// caller still sees how far the chain got.
pub struct SequenceNode<B> {
    pub(crate) meta: Meta,
    pub(crate) children: Vec<NodeRef<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for SequenceNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Sequence"
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
        let mut last = prev.clone();
        for child in &self.children {
            let out = invoke(child, ctx, tracer, &last).await?;
            if !out.is_ok() {
                if out.data.is_null() {
                    return Ok(Outcome::fail(last.data.clone()));
                }
                return Ok(out);
            }
            last = out;
        }
        Ok(last)
    }
}

/// Runs children in order, returning the first OK outcome. All children
/// failing fails the selector with FAIL(Null); the failed attempts' data
/// is discarded.
pub struct SelectorNode<B> {
    pub(crate) meta: Meta,
    pub(crate) children: Vec<NodeRef<B>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for SelectorNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Selector"
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
        for child in &self.children {
            let out = invoke(child, ctx, tracer, prev).await?;
            if out.is_ok() {
                return Ok(out);
            }
        }
        Ok(Outcome::fail(Value::Null))
    }
}

/// Selector that tries children in a weighted-shuffled order. With a seed
/// the order is deterministic per tick; without one it draws from entropy.
/// Exhaustion fails with FAIL(Null), same as Selector.
pub struct RandomSelectorNode<B> {
    pub(crate) meta: Meta,
    pub(crate) children: Vec<NodeRef<B>>,
    pub(crate) weights: Option<Vec<f64>>,
    pub(crate) seed: Option<u64>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for RandomSelectorNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "RandomSelector"
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
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let order = weighted_shuffle(&mut rng, self.children.len(), self.weights.as_deref());

        for idx in order {
            let out = invoke(&self.children[idx], ctx, tracer, prev).await?;
            if out.is_ok() {
                return Ok(out);
            }
        }
        Ok(Outcome::fail(Value::Null))
    }
}

/// Re-runs its body while the condition holds, up to `max_loops` when set.
/// Returns the last OK body outcome. A failing body stops the loop without
/// overwriting that outcome; a condition false on entry returns FAIL(Null).
pub struct WhileNode<B> {
    pub(crate) meta: Meta,
    pub(crate) body: NodeRef<B>,
    pub(crate) condition: Condition<B>,
    pub(crate) max_loops: Option<usize>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for WhileNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "While"
    }

    fn children(&self) -> &[NodeRef<B>] {
        std::slice::from_ref(&self.body)
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let mut last_ok = Outcome::fail(Value::Null);
        let mut carried = prev.clone();
        let mut loops = 0usize;

        while self.condition.eval(ctx.board()).await {
            if self.max_loops.is_some_and(|max| loops >= max) {
                break;
            }
            loops += 1;
            let out = invoke(&self.body, ctx, tracer, &carried).await?;
            if !out.is_ok() {
                break;
            }
            carried = out.clone();
            last_ok = out;
        }
        Ok(last_ok)
    }
}
