//! Key-value store trait definition.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use offsync_common::{Error, Result};

/// Persistent key-value store used for cached snapshots and the queue.
///
/// Keys are plain strings and values are opaque text; serialization is the
/// caller's business (see [`StoreExt`]). Implementations must make each
/// `set_raw` all-or-nothing for its key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the value stored under `key`.
    ///
    /// # Returns
    /// `None` when the key is absent.
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - A subsequent `get_raw(key)` returns exactly `value`
    /// - On error the previous value (if any) is left intact
    async fn set_raw(&self, key: &str, value: String) -> Result<()>;

    /// Check if a key is present.
    async fn contains_key(&self, key: &str) -> Result<bool>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// List every key currently stored.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Typed helpers layered over any [`KeyValueStore`].
#[async_trait]
pub trait StoreExt {
    /// Read and decode a JSON value.
    ///
    /// # Errors
    /// - Backend failure
    /// - Stored value does not decode as `T`
    async fn get_item<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send;

    /// Encode a value as JSON and store it.
    async fn set_item<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> StoreExt for S {
    async fn get_item<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_raw(key).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                Error::Serialization(format!("Value under '{}' is malformed: {}", key, e))
            }),
            None => Ok(None),
        }
    }

    async fn set_item<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw).await
    }
}
