//! Process-wide spawned-task-finish hooks
//!
//! Parallel, Gather and Terminable run their children as spawned tasks.
//! Every registered hook is called exactly once per spawned child task with
//! the task's final outcome and its trace span. Registration is process
//! global with an explicit lifecycle: register at startup, remove or clear
//! in tests to restore prior state.

use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Callback fired when a spawned child task finishes.
pub type SpawnedTaskHook =
    Arc<dyn Fn(TraceHandle, Outcome) -> BoxFuture<'static, ()> + Send + Sync>;

/// Token returned by registration, used to remove a hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookId(u64);

static REGISTRY: RwLock<Vec<(u64, SpawnedTaskHook)>> = RwLock::new(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Register a hook. Returns an id for later removal.
pub fn register_spawned_task_hook<F, Fut>(hook: F) -> HookId
where
    F: Fn(TraceHandle, Outcome) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let boxed: SpawnedTaskHook = Arc::new(move |tracer, outcome| Box::pin(hook(tracer, outcome)));
    REGISTRY.write().expect("hook registry lock").push((id, boxed));
    HookId(id)
}

/// Remove a previously registered hook.
pub fn remove_spawned_task_hook(id: HookId) {
    REGISTRY
        .write()
        .expect("hook registry lock")
        .retain(|(hook_id, _)| *hook_id != id.0);
}

/// Drop all hooks. Test isolation helper.
pub fn clear_spawned_task_hooks() {
    REGISTRY.write().expect("hook registry lock").clear();
}

/// Invoke every registered hook for one finished spawned task.
pub(crate) async fn fire_spawned_task_finished(tracer: &TraceHandle, outcome: &Outcome) {
    let hooks: Vec<SpawnedTaskHook> = REGISTRY
        .read()
        .expect("hook registry lock")
        .iter()
        .map(|(_, hook)| hook.clone())
        .collect();
    for hook in hooks {
        hook(tracer.clone(), outcome.clone()).await;
    }
}
