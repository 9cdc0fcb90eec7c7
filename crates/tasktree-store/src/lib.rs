//! Tasktree Store - minimal async key-value capability
//!
//! The engine's caching and termination decorators only need get/set/del/exists
//! against some shared store. This crate defines that capability as the
//! `KvStore` trait and ships an in-memory implementation for tests and
//! single-process deployments. Redis or any other backend plugs in by
//! implementing the trait.

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{KvStore, StoreError, StoreResult};
