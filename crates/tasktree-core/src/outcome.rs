//! Outcome - the two-state result every node invocation produces

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success or failure of a node invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Fail,
}

/// The outcome of running a node: a status plus an opaque payload.
///
/// Status and data are independent. A failed outcome may still carry data
/// (e.g. the malformed text that could not be parsed) and a successful one
/// may carry none (`Value::Null`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    pub data: Value,
}

impl Outcome {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            status: Status::Ok,
            data: data.into(),
        }
    }

    pub fn fail(data: impl Into<Value>) -> Self {
        Self {
            status: Status::Fail,
            data: data.into(),
        }
    }

    /// OK with no payload. Used as the initial "previous result" of a run.
    pub fn none() -> Self {
        Self::ok(Value::Null)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Same status, different payload.
    pub fn with_data(&self, data: impl Into<Value>) -> Self {
        Self {
            status: self.status,
            data: data.into(),
        }
    }

    /// OK becomes FAIL and vice versa; the payload is kept.
    pub fn inverted(self) -> Self {
        Self {
            status: match self.status {
                Status::Ok => Status::Fail,
                Status::Fail => Status::Ok,
            },
            data: self.data,
        }
    }
}
