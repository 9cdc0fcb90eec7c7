//! Context and blackboard handling
//!
//! A `Context` is created once per top-level run and threaded by reference
//! through every node invocation. It carries the current blackboard handle
//! and the run's trace root. Subtree and Gather derive child contexts bound
//! to their own boards; the parent context is untouched.

use crate::trace::{TraceHandle, TraceNode};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Caller-owned mutable state threaded through a tree run.
///
/// The keyed accessors back the attribute-name variants of If/While
/// conditions, WriteBlackboard and ParseJSON. Boards that only ever use
/// closure-based conditions and setters can keep the defaults.
pub trait Blackboard: Send + 'static {
    /// Read a named field. Default: no keyed fields.
    fn get(&self, key: &str) -> Option<Value> {
        let _ = key;
        None
    }

    /// Write a named field. Returns false when the key is unknown.
    fn set(&mut self, key: &str, value: Value) -> bool {
        let _ = (key, value);
        false
    }
}

/// JSON objects work as boards out of the box.
impl Blackboard for Value {
    fn get(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|m| m.get(key)).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> bool {
        match self.as_object_mut() {
            Some(m) => {
                m.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }
}

/// Unit board for trees that carry no state.
impl Blackboard for () {}

/// Shared handle to a blackboard.
///
/// Sibling tasks given distinct handles run fully in parallel; siblings
/// sharing one handle are serialized through its lock.
pub struct BoardHandle<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for BoardHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: Blackboard> BoardHandle<B> {
    pub fn new(board: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(board)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, B> {
        self.inner.lock().await
    }

    /// Run a closure against the board under the lock.
    pub async fn read<T>(&self, f: impl FnOnce(&B) -> T) -> T {
        let guard = self.inner.lock().await;
        f(&guard)
    }

    /// Mutate the board under the lock.
    pub async fn update<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }
}

/// Per-run carrier: current board handle plus the run's trace root.
/// Cheap to clone into spawned child tasks.
pub struct Context<B: Blackboard> {
    board: BoardHandle<B>,
    trace: TraceHandle,
}

impl<B: Blackboard> Clone for Context<B> {
    fn clone(&self) -> Self {
        Self {
            board: self.board.clone(),
            trace: self.trace.clone(),
        }
    }
}

impl<B: Blackboard> Context<B> {
    pub fn new(board: B) -> Self {
        Self::from_handle(BoardHandle::new(board))
    }

    pub fn from_handle(board: BoardHandle<B>) -> Self {
        Self {
            board,
            trace: TraceHandle::root(),
        }
    }

    pub fn board(&self) -> &BoardHandle<B> {
        &self.board
    }

    pub fn trace_root(&self) -> &TraceHandle {
        &self.trace
    }

    /// Snapshot of the whole trace tree recorded so far.
    pub fn trace_snapshot(&self) -> TraceNode {
        self.trace.snapshot()
    }

    /// Child context bound to a different board, sharing this run's trace.
    pub fn derive<C: Blackboard>(&self, board: BoardHandle<C>) -> Context<C> {
        Context {
            board,
            trace: self.trace.clone(),
        }
    }
}
