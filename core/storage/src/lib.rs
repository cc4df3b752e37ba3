//! Persistent key-value store abstraction for offline sync.
//!
//! This module provides a trait-based interface for the store that holds
//! cached response snapshots and the mutation queue, plus a registry for
//! resolving a backend from configuration.
//!
//! # Design Principles
//! - Value-agnostic: stores hold strings, callers pick the encoding
//! - Async operations: every call may touch disk or a browser-like backend
//! - Whole-value writes: a key is either fully written or left unchanged

pub mod store;
pub mod registry;
pub mod memory;
pub mod local;

pub use store::{KeyValueStore, StoreExt};
pub use registry::{StoreRegistry, StoreFactory, create_default_registry};
pub use memory::MemoryStore;
pub use local::LocalStore;
