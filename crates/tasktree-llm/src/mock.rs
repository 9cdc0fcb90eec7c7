//! Scripted in-process provider for tests

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

type Script = Vec<LlmResult<StreamDelta>>;

/// Replays queued scripts, one per completion call, in order. Records
/// every request for assertions. Calls past the end of the queue fail.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one completion's stream of deltas.
    pub fn push_script(&self, deltas: impl IntoIterator<Item = StreamDelta>) {
        self.scripts
            .lock()
            .expect("script lock")
            .push_back(deltas.into_iter().map(Ok).collect());
    }

    /// Queue a stream that yields one error.
    pub fn push_error(&self, error: LlmError) {
        self.scripts
            .lock()
            .expect("script lock")
            .push_back(vec![Err(error)]);
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().expect("request lock").clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        _cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        self.requests.lock().expect("request lock").push(request);
        let script = self
            .scripts
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| LlmError::RequestFailed("no script queued".to_string()))?;
        Ok(Box::pin(futures::stream::iter(script)))
    }
}
