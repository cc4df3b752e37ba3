//! Dirty-flag tracking for syncable domain objects.
//!
//! A domain object written while offline carries `isDirty = true` until the
//! queued write that produced it has been replayed. Rather than discovering
//! such types at runtime, callers register them explicitly in a
//! [`DirtyRegistry`]; the reconciler only ever tries the registered types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Domain object exposing dirty/last-modified semantics.
///
/// Implementors typically serialize the two fields as `isDirty` and
/// `lastModified`. Deserialization must fail for bodies that are not this
/// type, otherwise the type will claim unrelated snapshots.
pub trait DirtyTracked: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn is_dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    fn last_modified(&self) -> Option<DateTime<Utc>>;

    fn set_last_modified(&mut self, at: DateTime<Utc>);

    /// Clear the dirty flag and stamp the modification time.
    fn mark_clean(&mut self, at: DateTime<Utc>) {
        self.set_dirty(false);
        self.set_last_modified(at);
    }
}

/// Body rewritten by a registered type.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBody {
    /// Name of the type that matched.
    pub type_name: &'static str,
    /// Re-serialized body with the dirty flag cleared.
    pub body: String,
}

type Cleaner = Box<dyn Fn(&str, DateTime<Utc>) -> Option<String> + Send + Sync>;

struct Registration {
    type_name: &'static str,
    clean: Cleaner,
}

/// Registry of domain types eligible for dirty-flag reconciliation.
#[derive(Default)]
pub struct DirtyRegistry {
    types: Vec<Registration>,
}

impl DirtyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain type. Registering the same type twice is a no-op.
    pub fn register<T: DirtyTracked>(&mut self) -> &mut Self {
        let type_name = std::any::type_name::<T>();
        if self.types.iter().any(|r| r.type_name == type_name) {
            return self;
        }

        self.types.push(Registration {
            type_name,
            clean: Box::new(clean_as::<T>),
        });
        self
    }

    /// Builder-style registration.
    pub fn with<T: DirtyTracked>(mut self) -> Self {
        self.register::<T>();
        self
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Try each registered type in order and clean the body with the first
    /// one that decodes it.
    ///
    /// Decode failures are expected and skipped.
    pub fn mark_clean(&self, body: &str, at: DateTime<Utc>) -> Option<CleanedBody> {
        self.types.iter().find_map(|r| {
            (r.clean)(body, at).map(|body| CleanedBody {
                type_name: r.type_name,
                body,
            })
        })
    }
}

fn clean_as<T: DirtyTracked>(body: &str, at: DateTime<Utc>) -> Option<String> {
    let type_name = std::any::type_name::<T>();

    let mut dto: T = match serde_json::from_str(body) {
        Ok(dto) => dto,
        Err(e) => {
            debug!(type_name, "Body does not match: {}", e);
            return None;
        }
    };
    dto.mark_clean(at);

    let cleaned = match serde_json::to_value(&dto) {
        Ok(v) => v,
        Err(e) => {
            debug!(type_name, "Failed to re-serialize: {}", e);
            return None;
        }
    };

    // Keep fields the type does not model.
    let merged = match (serde_json::from_str::<Value>(body), cleaned) {
        (Ok(Value::Object(mut original)), Value::Object(fields)) => {
            original.extend(fields);
            Value::Object(original)
        }
        (_, cleaned) => cleaned,
    };

    serde_json::to_string(&merged).ok()
}
