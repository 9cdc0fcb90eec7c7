//! Error types for tasktree-core
//!
//! These cover programming errors only: structural misuse caught at build
//! time and contract violations caught while a tree runs (e.g. a Gather
//! factory returning mismatched lists). Runtime failures of leaf logic are
//! never represented here; they are absorbed into `Outcome::fail` at the
//! node where they happen.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("build error: {0}")]
    Build(String),

    #[error("node '{name}' ({kind}) expects {expected} children, got {got}")]
    BadArity {
        kind: &'static str,
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("gather factory returned {trees} trees but {boards} blackboards")]
    GatherLengthMismatch { trees: usize, boards: usize },

    #[error("no key-value store configured for node '{0}'")]
    NoStore(String),

    #[error("programming error: {0}")]
    Programming(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming(message.into())
    }

    pub fn bad_arity(
        kind: &'static str,
        name: impl Into<String>,
        expected: &'static str,
        got: usize,
    ) -> Self {
        Self::BadArity {
            kind,
            name: name.into(),
            expected,
            got,
        }
    }
}
