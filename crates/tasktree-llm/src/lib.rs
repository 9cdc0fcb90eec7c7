//! Tasktree LLM - streaming completion leaf for tasktree trees
//!
//! The `LlmProvider` trait is the integration seam; the bundled
//! `OpenAiProvider` speaks the OpenAI-compatible chat-completions SSE
//! protocol, and `ScriptedProvider` backs deterministic tests.

pub mod mock;
pub mod node;
pub mod openai;
pub mod provider;
pub mod types;

pub use mock::ScriptedProvider;
pub use node::{DeltaEvent, LlmConfig, LlmExt, LlmNode};
pub use openai::OpenAiProvider;
pub use provider::{
    clear_default_api_key_factory, clear_default_provider, set_default_api_key_factory,
    set_default_provider, LlmError, LlmProvider, LlmResult, LlmStream,
};
pub use types::{LlmRequest, Message, StreamDelta, Usage};
