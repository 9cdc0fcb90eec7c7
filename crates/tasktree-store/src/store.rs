//! KvStore trait - the capability the engine requires from a key-value backend

use std::time::Duration;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),

    #[error("value is not valid utf-8 or json: {0}")]
    InvalidValue(String),
}

/// Minimal async key-value capability.
///
/// Values are opaque strings; callers that need structure serialize to JSON
/// before writing. Expiration is best-effort: a backend may evict lazily, but
/// an expired key must never be returned from `get` or counted by `exists`.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
