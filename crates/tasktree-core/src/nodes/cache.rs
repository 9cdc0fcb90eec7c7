//! Cacher decorator - memoizes a child's OK outcome in a key-value store

use crate::context::{Blackboard, Context};
use crate::error::{Error, Result};
use crate::node::{invoke, Meta, Node, NodeRef};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tasktree_store::KvStore;
use tracing::warn;

/// What gets persisted per cache key. The validator stamp recorded at
/// store time must match the stamp derived at lookup time for the entry
/// to count as a hit.
#[derive(Serialize, Deserialize)]
struct CachedEntry {
    validator: Option<String>,
    data: Value,
}

/// Board-derived string, used for cache keys and validator stamps.
pub type KeyFn<B> = Box<dyn Fn(&B) -> String + Send + Sync>;

/// Skips its child when a valid cached outcome exists for the derived key.
/// Only OK outcomes are cached; a failing child is re-run every time. A
/// validator mismatch behaves exactly like a miss and overwrites the
/// entry on the child's next OK.
pub struct CacherNode<B> {
    pub(crate) meta: Meta,
    pub(crate) child: NodeRef<B>,
    pub(crate) key_fn: KeyFn<B>,
    pub(crate) validator: Option<KeyFn<B>>,
    pub(crate) expiration: Option<Duration>,
    /// None falls back to the process default at tick time.
    pub(crate) store: Option<Arc<dyn KvStore>>,
}

#[async_trait::async_trait]
impl<B: Blackboard> Node<B> for CacherNode<B> {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn kind(&self) -> &'static str {
        "Cacher"
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
        let store = self
            .store
            .clone()
            .or_else(crate::config::default_store)
            .ok_or_else(|| Error::NoStore(self.meta.fullname.clone()))?;
        let (key, stamp) = {
            let guard = ctx.board().lock().await;
            ((self.key_fn)(&guard), self.validator.as_ref().map(|v| v(&guard)))
        };
        tracer.set_attribute("cache_key", key.clone());

        match store.get(&key).await {
            Ok(Some(raw)) => {
                // An unreadable entry is treated as a miss and overwritten.
                if let Ok(entry) = serde_json::from_str::<CachedEntry>(&raw) {
                    if entry.validator == stamp {
                        tracer.set_attribute("cache", "hit");
                        return Ok(Outcome::ok(entry.data));
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(node = self.fullname(), error = %err, "cache lookup failed");
            }
        }
        tracer.set_attribute("cache", "miss");

        let out = invoke(&self.child, ctx, tracer, prev).await?;
        if out.is_ok() {
            let entry = CachedEntry {
                validator: stamp,
                data: out.data.clone(),
            };
            let raw = serde_json::to_string(&entry)?;
            if let Err(err) = store.set(&key, &raw, self.expiration).await {
                warn!(node = self.fullname(), error = %err, "cache store failed");
            }
        }
        Ok(out)
    }
}
