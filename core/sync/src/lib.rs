//! Offline-first request handling.
//!
//! This crate provides:
//! - An interceptor that caches successful responses and falls back to the
//!   cache, the mutation queue or an explicit unavailable response when the
//!   network is unreachable
//! - A reconciler that replays queued mutations in order once connectivity
//!   returns, clearing dirty flags on cached domain objects
//! - A scheduler that serializes sync runs, manually or periodically
//! - Configuration and a client facade wiring it all together

pub mod client;
pub mod config;
pub mod dirty;
pub mod interceptor;
pub mod queue;
pub mod reconciler;
pub mod report;
pub mod scheduler;

// Re-export main types
pub use client::OfflineClient;
pub use config::{OfflineConfig, StoreConfig};
pub use dirty::{CleanedBody, DirtyRegistry, DirtyTracked};
pub use interceptor::{Interceptor, InterceptorBuilder, ResponseSource, QUEUED_BODY, UNAVAILABLE_BODY};
pub use queue::MutationQueue;
pub use reconciler::{Reconciler, ReconcilerBuilder, DEFAULT_CREDENTIAL_ENDPOINTS};
pub use report::{DiscardReason, HaltReason, SyncEvent, SyncReport};
pub use scheduler::{SyncMode, SyncRequest, SyncScheduler, SyncSchedulerHandle};
