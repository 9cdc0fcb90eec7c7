//! Execution tracing - a parallel tree of spans mirroring the node tree
//!
//! Every node invocation opens exactly one span under its parent's span
//! before any child runs, and closes it (status + end time) once the result
//! is known, including on programming error and cancellation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Final state of a trace span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Ok,
    Fail,
    Cancelled,
    Error,
}

struct Span {
    name: String,
    kind: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: TraceStatus,
    attributes: serde_json::Map<String, Value>,
    cost: f64,
    children: Vec<TraceHandle>,
}

/// Shared handle to one live span. Cloning shares the span.
#[derive(Clone)]
pub struct TraceHandle {
    inner: Arc<Mutex<Span>>,
}

impl TraceHandle {
    fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Span {
                name: name.into(),
                kind: kind.into(),
                started_at: Utc::now(),
                ended_at: None,
                status: TraceStatus::Running,
                attributes: serde_json::Map::new(),
                cost: 0.0,
                children: Vec::new(),
            })),
        }
    }

    /// The root span of a run.
    pub fn root() -> Self {
        Self::new("ROOT", "ROOT")
    }

    /// Open a child span. Insertion order is preserved in snapshots.
    pub fn begin_child(&self, name: impl Into<String>, kind: impl Into<String>) -> TraceHandle {
        let child = TraceHandle::new(name, kind);
        self.inner.lock().expect("trace lock").children.push(child.clone());
        child
    }

    pub fn name(&self) -> String {
        self.inner.lock().expect("trace lock").name.clone()
    }

    pub fn kind(&self) -> String {
        self.inner.lock().expect("trace lock").kind.clone()
    }

    pub fn status(&self) -> TraceStatus {
        self.inner.lock().expect("trace lock").status
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner
            .lock()
            .expect("trace lock")
            .attributes
            .insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("trace lock")
            .attributes
            .get(key)
            .cloned()
    }

    pub fn add_cost(&self, cost: f64) {
        self.inner.lock().expect("trace lock").cost += cost;
    }

    pub fn cost(&self) -> f64 {
        self.inner.lock().expect("trace lock").cost
    }

    /// Close the span. A span closes once; later calls are no-ops, so a
    /// decorator finalizing an aborted child cannot clobber a span that
    /// already finished on its own.
    pub fn close(&self, status: TraceStatus) {
        let mut span = self.inner.lock().expect("trace lock");
        if span.status == TraceStatus::Running {
            span.status = status;
            span.ended_at = Some(Utc::now());
        }
    }

    /// Close this span and every still-running descendant as Cancelled.
    /// Used after aborting a spawned child task.
    pub fn close_cancelled(&self) {
        let children = {
            let mut span = self.inner.lock().expect("trace lock");
            if span.status == TraceStatus::Running {
                span.status = TraceStatus::Cancelled;
                span.ended_at = Some(Utc::now());
            }
            span.children.clone()
        };
        for child in children {
            child.close_cancelled();
        }
    }

    /// Deep copy of this span and its descendants.
    pub fn snapshot(&self) -> TraceNode {
        let (node, children) = {
            let span = self.inner.lock().expect("trace lock");
            (
                TraceNode {
                    name: span.name.clone(),
                    kind: span.kind.clone(),
                    started_at: span.started_at,
                    ended_at: span.ended_at,
                    status: span.status,
                    attributes: span.attributes.clone(),
                    cost: span.cost,
                    children: Vec::new(),
                },
                span.children.clone(),
            )
        };
        let mut node = node;
        node.children = children.iter().map(|c| c.snapshot()).collect();
        node
    }
}

/// Immutable, serializable snapshot of one span.
///
/// Children are an array in insertion order; each child carries its own
/// name, so the order doubles as the keyed map of the span tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceNode {
    pub name: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: TraceStatus,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    /// Depth-first search by span kind.
    pub fn find_by_kind(&self, kind: &str) -> Option<&TraceNode> {
        if self.kind == kind {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_kind(kind))
    }

    /// Depth-first search by span name.
    pub fn find_by_name(&self, name: &str) -> Option<&TraceNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find_by_name(name))
    }
}
