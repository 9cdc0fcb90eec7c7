//! Trace persistence - save a finished trace, query it back

use crate::error::Result;
use crate::trace::TraceNode;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Backend that persists trace snapshots.
#[async_trait::async_trait]
pub trait TraceStorage: Send + Sync {
    /// Persist a trace root, returning an opaque id for later lookup.
    async fn save(&self, root: &TraceNode) -> Result<String>;

    /// Load a saved trace as structured JSON. At minimum `name`, `kind` and
    /// `children` are preserved.
    async fn query(&self, id: &str) -> Result<Value>;
}

/// One JSON file per trace under a directory.
pub struct FileTraceStorage {
    dir: PathBuf,
}

impl FileTraceStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait::async_trait]
impl TraceStorage for FileTraceStorage {
    async fn save(&self, root: &TraceNode) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_vec_pretty(root)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&id);
        tokio::fs::write(&path, body).await?;
        debug!(trace_id = %id, path = %path.display(), "trace saved");
        Ok(id)
    }

    async fn query(&self, id: &str) -> Result<Value> {
        let body = tokio::fs::read(self.path_for(id)).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
