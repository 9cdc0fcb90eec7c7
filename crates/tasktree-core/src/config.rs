//! Process-wide defaults
//!
//! Cacher and Terminable nodes built without an explicit store fall back to
//! the default configured here. Set once at startup; tests that override it
//! must restore the prior state.

use std::sync::{Arc, RwLock};
use tasktree_store::KvStore;

static DEFAULT_STORE: RwLock<Option<Arc<dyn KvStore>>> = RwLock::new(None);

pub fn set_default_store(store: Arc<dyn KvStore>) {
    *DEFAULT_STORE.write().expect("default store lock") = Some(store);
}

pub fn clear_default_store() {
    *DEFAULT_STORE.write().expect("default store lock") = None;
}

pub(crate) fn default_store() -> Option<Arc<dyn KvStore>> {
    DEFAULT_STORE.read().expect("default store lock").clone()
}
