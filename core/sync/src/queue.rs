//! Persisted queue of pending mutations.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use offsync_common::{QueuedMutation, Result, QUEUE_KEY};
use offsync_storage::{KeyValueStore, StoreExt};

/// Access point for the list stored under `offline-queue`.
///
/// Appends and commits are read-modify-write cycles on one key; they are
/// serialized by an async mutex that is held only across store calls, never
/// across a network send. Nothing is cached between calls: every operation
/// reads the store.
pub struct MutationQueue {
    store: Arc<dyn KeyValueStore>,
    guard: Mutex<()>,
}

impl MutationQueue {
    /// Create a queue over a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            guard: Mutex::new(()),
        }
    }

    /// Read the current queue, oldest first. A missing key is an empty queue.
    pub async fn load(&self) -> Result<Vec<QueuedMutation>> {
        Ok(self
            .store
            .get_item::<Vec<QueuedMutation>>(QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Number of pending entries.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }

    /// Check if nothing is pending.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Append an entry and persist the whole list.
    ///
    /// # Returns
    /// The queue length after the append.
    pub async fn append(&self, entry: QueuedMutation) -> Result<usize> {
        let _held = self.guard.lock().await;

        let mut queue = self.load().await?;
        queue.push(entry);
        self.store.set_item(QUEUE_KEY, &queue).await?;

        debug!(len = queue.len(), "Appended queued mutation");
        Ok(queue.len())
    }

    /// Remove the first `processed` entries of `snapshot` from the persisted
    /// queue and write the result.
    ///
    /// The current list is re-read under the guard, so entries appended
    /// after `snapshot` was taken are kept.
    ///
    /// # Returns
    /// The entries still pending after the commit.
    pub async fn commit_processed(
        &self,
        snapshot: &[QueuedMutation],
        processed: usize,
    ) -> Result<Vec<QueuedMutation>> {
        let done = &snapshot[..processed.min(snapshot.len())];
        if done.is_empty() {
            return self.load().await;
        }

        let _held = self.guard.lock().await;
        let mut current = self.load().await?;

        if current.starts_with(done) {
            current.drain(..done.len());
        } else {
            warn!("Queue changed during sync; removing processed entries individually");
            for entry in done {
                if let Some(pos) = current.iter().position(|e| e == entry) {
                    current.remove(pos);
                }
            }
        }

        self.store.set_item(QUEUE_KEY, &current).await?;
        debug!(removed = done.len(), remaining = current.len(), "Committed queue");
        Ok(current)
    }

    /// Drop every pending entry.
    pub async fn clear(&self) -> Result<usize> {
        let _held = self.guard.lock().await;
        let dropped = self.load().await?.len();
        self.store.remove(QUEUE_KEY).await?;
        Ok(dropped)
    }
}
