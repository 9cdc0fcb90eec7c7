//! LLM provider trait and process-wide defaults

use crate::types::{LlmRequest, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// A streaming completion backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Stream a completion. If `cancel` is provided and triggered, the
    /// stream ends with `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;
}

/// Factory resolving the api key for requests that carry none of their
/// own.
pub type ApiKeyFactory = Arc<dyn Fn() -> Option<String> + Send + Sync>;

static DEFAULT_PROVIDER: RwLock<Option<Arc<dyn LlmProvider>>> = RwLock::new(None);
static API_KEY_FACTORY: RwLock<Option<ApiKeyFactory>> = RwLock::new(None);

/// Provider used by Llm nodes built without an explicit one. Set at
/// startup; tests that override it must restore the prior state.
pub fn set_default_provider(provider: Arc<dyn LlmProvider>) {
    *DEFAULT_PROVIDER.write().expect("provider lock") = Some(provider);
}

pub fn clear_default_provider() {
    *DEFAULT_PROVIDER.write().expect("provider lock") = None;
}

pub(crate) fn default_provider() -> Option<Arc<dyn LlmProvider>> {
    DEFAULT_PROVIDER.read().expect("provider lock").clone()
}

/// Default api-key source for nodes without a per-node key.
pub fn set_default_api_key_factory<F>(factory: F)
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    *API_KEY_FACTORY.write().expect("api key factory lock") = Some(Arc::new(factory));
}

pub fn clear_default_api_key_factory() {
    *API_KEY_FACTORY.write().expect("api key factory lock") = None;
}

pub(crate) fn default_api_key() -> Option<String> {
    let factory = API_KEY_FACTORY
        .read()
        .expect("api key factory lock")
        .clone();
    factory.and_then(|f| f())
}
