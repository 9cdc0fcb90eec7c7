//! The Llm leaf node and its builder extension

use crate::provider::{self, LlmProvider};
use crate::types::{LlmRequest, Message, Usage};
use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tasktree_core::builder::{BuildSpec, TreeBuilder};
use tasktree_core::context::{Blackboard, BoardHandle, Context};
use tasktree_core::error::{Error, Result};
use tasktree_core::node::{Meta, Node, NodeRef};
use tasktree_core::outcome::Outcome;
use tasktree_core::trace::TraceHandle;
use tracing::debug;

/// Builds the message list from the board on every tick.
pub type MessagesFn<B> = Box<dyn Fn(&B) -> Vec<Message> + Send + Sync>;

/// What a delta callback sees per chunk. The final call after the stream
/// ends has `finished` true and an empty `delta`.
#[derive(Clone, Debug)]
pub struct DeltaEvent {
    pub full_text: String,
    pub delta: String,
    pub finished: bool,
    pub finish_reason: Option<String>,
}

/// Streaming callback fired once per text chunk plus one finished call.
pub type OnDelta<B> =
    Box<dyn Fn(BoardHandle<B>, DeltaEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Everything an Llm node needs besides its tree position.
pub struct LlmConfig<B> {
    model: String,
    messages: MessagesFn<B>,
    api_key: Option<String>,
    provider: Option<Arc<dyn LlmProvider>>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    on_delta: Option<OnDelta<B>>,
}

impl<B: Blackboard> LlmConfig<B> {
    pub fn new<F>(model: impl Into<String>, messages: F) -> Self
    where
        F: Fn(&B) -> Vec<Message> + Send + Sync + 'static,
    {
        Self {
            model: model.into(),
            messages: Box::new(messages),
            api_key: None,
            provider: None,
            max_tokens: None,
            temperature: None,
            on_delta: None,
        }
    }

    /// Per-node key, overriding the process-wide factory.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Per-node provider, overriding the process-wide default.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn on_delta<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(BoardHandle<B>, DeltaEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_delta = Some(Box::new(move |board, event| {
            Box::pin(callback(board, event))
        }));
        self
    }
}

/// Streams one completion, accumulating the text as the outcome data and
/// recording tokens, cost and a masked api key on the trace span. Provider
/// errors are absorbed into FAIL(Null) with the message as an `error`
/// attribute.
pub struct LlmNode<B> {
    meta: Meta,
    config: LlmConfig<B>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for LlmNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "LLM"
    }

    async fn tick(
        &self,
        ctx: &Context<B>,
        tracer: &TraceHandle,
        _prev: &Outcome,
    ) -> Result<Outcome> {
        let provider = self
            .config
            .provider
            .clone()
            .or_else(provider::default_provider)
            .ok_or_else(|| {
                Error::programming(format!(
                    "no llm provider configured for node '{}'",
                    self.meta.fullname
                ))
            })?;

        let messages = {
            let guard = ctx.board().lock().await;
            (self.config.messages)(&guard)
        };
        let api_key = self
            .config
            .api_key
            .clone()
            .or_else(provider::default_api_key);

        tracer.set_attribute("model", self.config.model.clone());
        if api_key.is_some() {
            tracer.set_attribute("api_key", "***");
        }
        debug!(node = self.fullname(), model = %self.config.model, "llm request");

        let request = LlmRequest {
            model: self.config.model.clone(),
            messages,
            api_key,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut stream = match provider.complete_stream(request, None).await {
            Ok(stream) => stream,
            Err(err) => {
                tracer.set_attribute("error", err.to_string());
                return Ok(Outcome::fail(Value::Null));
            }
        };

        let mut full_text = String::new();
        let mut usage: Option<Usage> = None;
        let mut finish_reason: Option<String> = None;

        while let Some(item) = stream.next().await {
            let delta = match item {
                Ok(delta) => delta,
                Err(err) => {
                    tracer.set_attribute("error", err.to_string());
                    return Ok(Outcome::fail(Value::Null));
                }
            };
            if let Some(u) = delta.usage {
                usage = Some(u);
            }
            if let Some(reason) = delta.finish_reason {
                finish_reason = Some(reason);
            }
            if let Some(cost) = delta.cost {
                tracer.add_cost(cost);
            }
            if delta.text.is_empty() {
                continue;
            }
            full_text.push_str(&delta.text);
            if let Some(on_delta) = &self.config.on_delta {
                on_delta(
                    ctx.board().clone(),
                    DeltaEvent {
                        full_text: full_text.clone(),
                        delta: delta.text,
                        finished: false,
                        finish_reason: finish_reason.clone(),
                    },
                )
                .await;
            }
        }

        if let Some(on_delta) = &self.config.on_delta {
            on_delta(
                ctx.board().clone(),
                DeltaEvent {
                    full_text: full_text.clone(),
                    delta: String::new(),
                    finished: true,
                    finish_reason: finish_reason.clone(),
                },
            )
            .await;
        }

        if let Some(u) = usage {
            tracer.set_attribute(
                "tokens",
                json!({
                    "prompt": u.prompt_tokens,
                    "completion": u.completion_tokens,
                    "total": u.total_tokens,
                }),
            );
            tracer.set_attribute("prompt_tokens", u.prompt_tokens);
            tracer.set_attribute("completion_tokens", u.completion_tokens);
            tracer.set_attribute("total_tokens", u.total_tokens);
        }
        if let Some(reason) = finish_reason {
            tracer.set_attribute("finish_reason", reason);
        }

        Ok(Outcome::ok(full_text))
    }
}

struct LlmSpec<B> {
    config: LlmConfig<B>,
}

impl<B: Blackboard> BuildSpec<B> for LlmSpec<B> {
    fn kind(&self) -> &'static str {
        "LLM"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(LlmNode {
            meta,
            config: self.config,
        }))
    }
}

/// Builder extension attaching Llm leaves.
pub trait LlmExt<B: Blackboard> {
    fn llm(self, config: LlmConfig<B>) -> Self;
}

impl<B: Blackboard> LlmExt<B> for TreeBuilder<B> {
    fn llm(self, config: LlmConfig<B>) -> Self {
        self.attach_leaf(LlmSpec { config })
    }
}
