//! Leaf nodes: Function, Assert, WriteBlackboard, ParseJSON, Log, Failure,
//! Constant

use crate::behavior::{Behavior, BehaviorKind, BehaviorOut, Source, Target};
use crate::context::{Blackboard, Context};
use crate::error::Result;
use crate::node::{Meta, Node};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use crate::util::parse_lenient;
use serde_json::Value;
use tracing::info;

/// Runs a caller-supplied callable against the blackboard. The callable's
/// shape was resolved at attachment; a failing callable is absorbed into
/// FAIL(Null) here, with the message kept as a trace attribute.
pub struct FunctionNode<B> {
    pub(crate) meta: Meta,
    pub(crate) behavior: Behavior<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for FunctionNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Function"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        let produced = match &self.behavior.kind {
            BehaviorKind::Sync(f) => {
                let mut guard = ctx.board().lock().await;
                f(&mut guard, tracer)
            }
            BehaviorKind::Async(f) => f(ctx.board().clone(), tracer.clone()).await,
        };
        Ok(match produced {
            Ok(BehaviorOut::Data(value)) => Outcome::ok(value),
            Ok(BehaviorOut::Outcome(outcome)) => outcome,
            Err(err) => {
                tracer.set_attribute("error", err.to_string());
                Outcome::fail(Value::Null)
            }
        })
    }
}

/// Evaluates a predicate: true is OK(true), false or a predicate error is
/// FAIL(Null).
pub struct AssertNode<B> {
    pub(crate) meta: Meta,
    pub(crate) predicate: Box<dyn Fn(&B) -> anyhow::Result<bool> + Send + Sync>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for AssertNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Assert"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        let checked = {
            let guard = ctx.board().lock().await;
            (self.predicate)(&guard)
        };
        Ok(match checked {
            Ok(true) => Outcome::ok(true),
            Ok(false) => Outcome::fail(Value::Null),
            Err(err) => {
                tracer.set_attribute("error", err.to_string());
                Outcome::fail(Value::Null)
            }
        })
    }
}

/// Side-effecting tap: writes the previous outcome's data onto the board,
/// then passes the previous outcome through unchanged.
pub struct WriteBlackboardNode<B> {
    pub(crate) meta: Meta,
    pub(crate) target: Target<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for WriteBlackboardNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "WriteBlackboard"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        if !self.target.write(ctx.board(), &prev.data).await {
            tracer.set_attribute("error", "blackboard rejected the write");
            return Ok(Outcome::fail(Value::Null));
        }
        Ok(prev.clone())
    }
}

/// Reads source text, strips markdown fences, parses leniently, writes the
/// parsed value to the destination. Unrepairable input returns the original
/// text as FAIL data and writes nothing.
pub struct ParseJsonNode<B> {
    pub(crate) meta: Meta,
    pub(crate) src: Source<B>,
    pub(crate) dst: Target<B>,
    /// Overrides the built-in lenient parser when set.
    pub(crate) loader: Option<Box<dyn Fn(&str) -> Option<Value> + Send + Sync>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ParseJsonNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "ParseJSON"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        prev: &Outcome,
    ) -> Result<Outcome> {
        let text: Option<String> = match &self.src {
            Source::Prev => prev.data.as_str().map(str::to_string),
            Source::Key(key) => ctx
                .board()
                .read(|b| b.get(key))
                .await
                .and_then(|v| v.as_str().map(str::to_string)),
            Source::Getter(f) => ctx.board().read(|b| f(b)).await,
        };
        let Some(text) = text else {
            tracer.set_attribute("error", "no source text to parse");
            return Ok(Outcome::fail(Value::Null));
        };

        let parsed = match &self.loader {
            Some(loader) => loader(&text),
            None => parse_lenient(&text),
        };
        let Some(parsed) = parsed else {
            tracer.set_attribute("error", "unparseable json");
            return Ok(Outcome::fail(text));
        };

        if !self.dst.write(ctx.board(), &parsed).await {
            tracer.set_attribute("error", "blackboard rejected the write");
            return Ok(Outcome::fail(Value::Null));
        }
        Ok(Outcome::ok(parsed))
    }
}

/// Log message: a literal or derived from the board.
pub enum LogMessage<B> {
    Literal(String),
    Derived(Box<dyn Fn(&B) -> String + Send + Sync>),
}

/// Emits a message through `tracing` and always succeeds with no data.
pub struct LogNode<B> {
    pub(crate) meta: Meta,
    pub(crate) message: LogMessage<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for LogNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Log"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        let message = match &self.message {
            LogMessage::Literal(text) => text.clone(),
            LogMessage::Derived(f) => ctx.board().read(|b| f(b)).await,
        };
        info!(node = self.fullname(), "{}", message);
        tracer.set_attribute("message", message);
        Ok(Outcome::none())
    }
}

/// Always fails with no data. Useful for tests and explicit dead branches.
pub struct FailureNode {
    pub(crate) meta: Meta,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for FailureNode {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Failure"
    }

    async fn tick(
        &self,
        _ctx: &Context<B>,
        _tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        Ok(Outcome::fail(Value::Null))
    }
}

/// Always succeeds with a fixed payload.
pub struct ConstantNode {
    pub(crate) meta: Meta,
    pub(crate) value: Value,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for ConstantNode {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Constant"
    }

    async fn tick(
        &self,
        _ctx: &Context<B>,
        _tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        Ok(Outcome::ok(self.value.clone()))
    }
}
