//! Common utilities and types shared across the offline-sync crates.
//!
//! This module provides the persisted data model and the key conventions
//! used by both the interceptor and the reconciler, so that the two sides
//! always agree on where a snapshot or the mutation queue lives.

pub mod error;
pub mod keys;
pub mod types;

pub use error::{Error, Result};
pub use keys::{cache_key, cache_key_for, uri_from_cache_key, CACHE_KEY_PREFIX, QUEUE_KEY};
pub use types::{is_content_header, CachedResponse, QueuedMutation};
