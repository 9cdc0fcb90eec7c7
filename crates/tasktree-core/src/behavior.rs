//! Caller-supplied callables and how nodes bind to them
//!
//! The engine accepts several call shapes (sync or async, with or without
//! board/trace access, returning a payload or a full Outcome). Each shape
//! is resolved into a tagged variant once at attachment time; dispatch at
//! tick time is a plain match, never reflection.

use crate::context::{Blackboard, BoardHandle};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use crate::util::truthy;
use futures::future::BoxFuture;
use serde_json::Value;

/// What a Function callable produced: a bare payload (wrapped as OK) or a
/// full Outcome (passed through unchanged).
pub enum BehaviorOut {
    Data(Value),
    Outcome(Outcome),
}

impl From<Value> for BehaviorOut {
    fn from(value: Value) -> Self {
        BehaviorOut::Data(value)
    }
}

impl From<Outcome> for BehaviorOut {
    fn from(outcome: Outcome) -> Self {
        BehaviorOut::Outcome(outcome)
    }
}

type SyncFn<B> =
    Box<dyn Fn(&mut B, &TraceHandle) -> anyhow::Result<BehaviorOut> + Send + Sync>;
type AsyncFn<B> = Box<
    dyn Fn(BoardHandle<B>, TraceHandle) -> BoxFuture<'static, anyhow::Result<BehaviorOut>>
        + Send
        + Sync,
>;

pub(crate) enum BehaviorKind<B> {
    Sync(SyncFn<B>),
    Async(AsyncFn<B>),
}

/// A Function node's callable, shape-resolved at attachment.
pub struct Behavior<B> {
    pub(crate) kind: BehaviorKind<B>,
}

impl<B: Blackboard> Behavior<B> {
    /// Board-free callable returning a payload.
    pub fn pure<T, F>(f: F) -> Self
    where
        T: Into<Value>,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::sync(move |_| f())
    }

    /// Sync callable over the board returning a payload.
    pub fn sync<T, F>(f: F) -> Self
    where
        T: Into<Value>,
        F: Fn(&mut B) -> T + Send + Sync + 'static,
    {
        Self {
            kind: BehaviorKind::Sync(Box::new(move |board, _| Ok(BehaviorOut::Data(f(board).into())))),
        }
    }

    /// Fallible sync callable; an `Err` becomes FAIL(Null) at the node.
    pub fn try_sync<F>(f: F) -> Self
    where
        F: Fn(&mut B) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            kind: BehaviorKind::Sync(Box::new(move |board, _| f(board).map(BehaviorOut::Data))),
        }
    }

    /// Sync callable returning a full Outcome.
    pub fn sync_outcome<F>(f: F) -> Self
    where
        F: Fn(&mut B) -> Outcome + Send + Sync + 'static,
    {
        Self {
            kind: BehaviorKind::Sync(Box::new(move |board, _| Ok(BehaviorOut::Outcome(f(board))))),
        }
    }

    /// Sync callable with trace access.
    pub fn sync_with_trace<F>(f: F) -> Self
    where
        F: Fn(&mut B, &TraceHandle) -> anyhow::Result<BehaviorOut> + Send + Sync + 'static,
    {
        Self {
            kind: BehaviorKind::Sync(Box::new(f)),
        }
    }

    /// Async callable over the board handle returning a payload.
    pub fn async_fn<T, F, Fut>(f: F) -> Self
    where
        T: Into<Value>,
        F: Fn(BoardHandle<B>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        Self {
            kind: BehaviorKind::Async(Box::new(move |board, _| {
                let fut = f(board);
                Box::pin(async move { Ok(BehaviorOut::Data(fut.await.into())) })
            })),
        }
    }

    /// Fallible async callable.
    pub fn try_async<F, Fut>(f: F) -> Self
    where
        F: Fn(BoardHandle<B>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            kind: BehaviorKind::Async(Box::new(move |board, _| {
                let fut = f(board);
                Box::pin(async move { fut.await.map(BehaviorOut::Data) })
            })),
        }
    }

    /// Async callable returning a full Outcome.
    pub fn async_outcome<F, Fut>(f: F) -> Self
    where
        F: Fn(BoardHandle<B>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Outcome> + Send + 'static,
    {
        Self {
            kind: BehaviorKind::Async(Box::new(move |board, _| {
                let fut = f(board);
                Box::pin(async move { Ok(BehaviorOut::Outcome(fut.await)) })
            })),
        }
    }

    /// Async callable with trace access.
    pub fn async_with_trace<F, Fut>(f: F) -> Self
    where
        F: Fn(BoardHandle<B>, TraceHandle) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<BehaviorOut>> + Send + 'static,
    {
        Self {
            kind: BehaviorKind::Async(Box::new(move |board, tracer| Box::pin(f(board, tracer)))),
        }
    }
}

/// Boolean condition for If and While: a closure over the board or the
/// truthiness of a named board field.
pub enum Condition<B> {
    Func(Box<dyn Fn(&B) -> bool + Send + Sync>),
    Key(String),
}

impl<B: Blackboard> Condition<B> {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&B) -> bool + Send + Sync + 'static,
    {
        Condition::Func(Box::new(f))
    }

    pub fn key(key: impl Into<String>) -> Self {
        Condition::Key(key.into())
    }

    pub(crate) async fn eval(&self, board: &BoardHandle<B>) -> bool {
        let guard = board.lock().await;
        match self {
            Condition::Func(f) => f(&guard),
            Condition::Key(key) => guard.get(key).map_or(false, |v| truthy(&v)),
        }
    }
}

impl<B: Blackboard> From<&str> for Condition<B> {
    fn from(key: &str) -> Self {
        Condition::key(key)
    }
}

impl<B: Blackboard> From<String> for Condition<B> {
    fn from(key: String) -> Self {
        Condition::key(key)
    }
}

/// Where ParseJSON reads its text from.
pub enum Source<B> {
    /// The previous sibling outcome's data (the default).
    Prev,
    /// A named board field.
    Key(String),
    /// A custom getter over the board.
    Getter(Box<dyn Fn(&B) -> Option<String> + Send + Sync>),
}

impl<B: Blackboard> Source<B> {
    pub fn prev() -> Self {
        Source::Prev
    }

    pub fn key(key: impl Into<String>) -> Self {
        Source::Key(key.into())
    }

    pub fn getter<F>(f: F) -> Self
    where
        F: Fn(&B) -> Option<String> + Send + Sync + 'static,
    {
        Source::Getter(Box::new(f))
    }
}

impl<B: Blackboard> From<&str> for Source<B> {
    fn from(key: &str) -> Self {
        Source::key(key)
    }
}

/// Where WriteBlackboard and ParseJSON write their data to.
pub enum Target<B> {
    /// A named board field.
    Key(String),
    /// A custom setter over the board.
    Setter(Box<dyn Fn(&mut B, &Value) + Send + Sync>),
}

impl<B: Blackboard> Target<B> {
    pub fn key(key: impl Into<String>) -> Self {
        Target::Key(key.into())
    }

    pub fn setter<F>(f: F) -> Self
    where
        F: Fn(&mut B, &Value) + Send + Sync + 'static,
    {
        Target::Setter(Box::new(f))
    }

    /// Apply under the board lock. False means an unknown key rejected the
    /// write.
    pub(crate) async fn write(&self, board: &BoardHandle<B>, data: &Value) -> bool {
        let mut guard = board.lock().await;
        match self {
            Target::Key(key) => guard.set(key, data.clone()),
            Target::Setter(f) => {
                f(&mut guard, data);
                true
            }
        }
    }
}

impl<B: Blackboard> From<&str> for Target<B> {
    fn from(key: &str) -> Self {
        Target::key(key)
    }
}

/// Data factory used by ForceOk/ForceFail/Return: derives a payload from
/// the board at decoration time.
pub type DataFactory<B> = Box<dyn Fn(&B) -> Value + Send + Sync>;

/// Gap schedule between Retry attempts.
#[derive(Clone, Debug)]
pub enum RetrySleep {
    /// No sleeping between attempts.
    None,
    /// Same gap after every failed attempt.
    Fixed(std::time::Duration),
    /// Positional gaps, clamped to the last entry once exhausted.
    Schedule(Vec<std::time::Duration>),
}

impl RetrySleep {
    /// Gap to sleep after failed attempt `attempt` (0-based).
    pub(crate) fn gap(&self, attempt: usize) -> Option<std::time::Duration> {
        match self {
            RetrySleep::None => None,
            RetrySleep::Fixed(d) => Some(*d),
            RetrySleep::Schedule(gaps) => {
                if gaps.is_empty() {
                    None
                } else {
                    Some(gaps[attempt.min(gaps.len() - 1)])
                }
            }
        }
    }
}
