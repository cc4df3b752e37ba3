//! Replay of queued mutations against the live network.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use url::Url;

use offsync_common::{cache_key_for, CachedResponse, Error, QueuedMutation, Result};
use offsync_storage::{KeyValueStore, StoreExt};
use offsync_transport::{header, Delivery, HttpRequest, HttpTransport, Method};

use crate::dirty::DirtyRegistry;
use crate::queue::MutationQueue;
use crate::report::{DiscardReason, HaltReason, SyncEvent, SyncReport};

/// Endpoint markers whose queued requests are never replayed.
pub const DEFAULT_CREDENTIAL_ENDPOINTS: &[&str] = &["/api/tokens"];

const EVENT_CAPACITY: usize = 64;

/// Outcome of replaying one entry.
enum Step {
    Replayed(u16),
    Discarded(DiscardReason),
    Halted(HaltReason),
}

/// Replays the mutation queue in FIFO order.
///
/// A pass stops at the first entry that is not accepted; that entry and
/// everything behind it stay queued. Only one pass should run at a time,
/// which [`SyncScheduler`](crate::SyncScheduler) guarantees.
pub struct Reconciler {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn HttpTransport>,
    queue: Arc<MutationQueue>,
    registry: Arc<DirtyRegistry>,
    credential_endpoints: Vec<String>,
    events: broadcast::Sender<SyncEvent>,
}

/// Builder for [`Reconciler`].
#[derive(Default)]
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    queue: Option<Arc<MutationQueue>>,
    registry: Option<Arc<DirtyRegistry>>,
    credential_endpoints: Option<Vec<String>>,
}

impl ReconcilerBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn queue(mut self, queue: Arc<MutationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Domain types whose cached snapshots are cleaned after replay.
    pub fn registry(mut self, registry: Arc<DirtyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default credential endpoint markers.
    pub fn credential_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credential_endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    /// - `Error::Config` if no transport or no store was supplied
    pub fn build(self) -> Result<Reconciler> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("Reconciler has no transport".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| Error::Config("Reconciler has no store".to_string()))?;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MutationQueue::new(store.clone())));
        let credential_endpoints = self.credential_endpoints.unwrap_or_else(|| {
            DEFAULT_CREDENTIAL_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Reconciler {
            store,
            transport,
            queue,
            registry: self.registry.unwrap_or_default(),
            credential_endpoints,
            events,
        })
    }
}

impl Reconciler {
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::default()
    }

    /// Subscribe to replay events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The queue being replayed.
    pub fn queue(&self) -> Arc<MutationQueue> {
        self.queue.clone()
    }

    /// Replay pending mutations, oldest first.
    ///
    /// The queue is persisted only if at least one entry was removed. An
    /// empty queue makes no network call and no write.
    ///
    /// # Errors
    /// - Store failure loading or persisting the queue
    pub async fn sync(&self) -> Result<SyncReport> {
        let start = Instant::now();
        let snapshot = self.queue.load().await?;
        let mut report = SyncReport::default();

        if snapshot.is_empty() {
            debug!("Nothing to sync");
            report.duration = start.elapsed();
            return Ok(report);
        }

        info!(pending = snapshot.len(), "Starting sync");

        let mut processed = 0;
        for entry in &snapshot {
            match self.replay(entry, &mut report).await {
                Step::Replayed(status) => {
                    report.replayed += 1;
                    processed += 1;
                    self.emit(SyncEvent::Replayed {
                        url: entry.url.clone(),
                        method: entry.method.clone(),
                        status,
                    });
                }
                Step::Discarded(reason) => {
                    report.discarded += 1;
                    processed += 1;
                    self.emit(SyncEvent::Discarded {
                        url: entry.url.clone(),
                        method: entry.method.clone(),
                        queued_at: entry.timestamp,
                        reason,
                    });
                }
                Step::Halted(reason) => {
                    warn!(
                        method = %entry.method,
                        url = %entry.url,
                        %reason,
                        "Replay halted"
                    );
                    self.emit(SyncEvent::Halted {
                        url: entry.url.clone(),
                        method: entry.method.clone(),
                        reason: reason.clone(),
                    });
                    report.halted = Some(reason);
                    break;
                }
            }
        }

        report.remaining = if processed > 0 {
            match self.queue.commit_processed(&snapshot, processed).await {
                Ok(remaining) => remaining.len(),
                Err(e) => {
                    error!("Failed to persist queue after sync: {}", e);
                    return Err(e);
                }
            }
        } else {
            snapshot.len()
        };

        report.duration = start.elapsed();
        info!(
            replayed = report.replayed,
            discarded = report.discarded,
            remaining = report.remaining,
            "Sync completed in {:?}",
            report.duration
        );
        Ok(report)
    }

    async fn replay(&self, entry: &QueuedMutation, report: &mut SyncReport) -> Step {
        if entry.is_credential_request(&self.credential_endpoints) {
            info!(
                method = %entry.method,
                url = %entry.url,
                "Discarding queued credential request"
            );
            return Step::Discarded(DiscardReason::CredentialEndpoint);
        }

        let request = match Self::rebuild(entry) {
            Ok(request) => request,
            Err(e) => {
                warn!(url = %entry.url, "Discarding malformed queue entry: {}", e);
                return Step::Discarded(DiscardReason::Malformed(e.to_string()));
            }
        };

        let response = match self.transport.send(request).await {
            Ok(Delivery::Delivered(response)) => response,
            Ok(Delivery::Unreachable(failure)) => {
                return Step::Halted(HaltReason::Unreachable(failure.to_string()))
            }
            Err(e) => return Step::Halted(HaltReason::Failed(e.to_string())),
        };

        if !response.is_success() {
            return Step::Halted(HaltReason::Rejected {
                status: response.status.as_u16(),
            });
        }

        let status = response.status.as_u16();
        debug!(method = %entry.method, url = %entry.url, status, "Replayed");

        if self.clean_cached(&entry.url).await {
            report.cleaned += 1;
        }
        Step::Replayed(status)
    }

    /// Turn a queue entry back into a request.
    ///
    /// Stored headers are not replayed; a non-blank body goes out as JSON.
    fn rebuild(entry: &QueuedMutation) -> Result<HttpRequest> {
        let method = Method::from_bytes(entry.method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("Invalid method {}: {}", entry.method, e)))?;
        let url = Url::parse(&entry.url)?;

        let mut request = HttpRequest::new(method, url);
        if let Some(body) = entry.replay_body() {
            request = request
                .with_header(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/json"),
                )
                .with_body(body.to_string());
        }
        Ok(request)
    }

    /// Clear the dirty flag on the snapshot cached for `url`.
    ///
    /// Returns whether a snapshot was rewritten. Failures are logged only.
    async fn clean_cached(&self, url: &str) -> bool {
        if self.registry.is_empty() {
            return false;
        }

        let key = cache_key_for(url);
        let mut cached = match self.store.get_item::<CachedResponse>(&key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return false,
            Err(e) => {
                warn!(key = %key, "Failed to read cached snapshot: {}", e);
                return false;
            }
        };

        let Some(cleaned) = self.registry.mark_clean(&cached.body, Utc::now()) else {
            debug!(key = %key, "No registered type matches cached body");
            return false;
        };

        let length = cleaned.body.len().to_string();
        cached.body = cleaned.body;
        for (name, values) in cached.content_headers.iter_mut() {
            if name.eq_ignore_ascii_case("content-length") {
                *values = vec![length.clone()];
            }
        }

        if let Err(e) = self.store.set_item(&key, &cached).await {
            warn!(key = %key, "Failed to write cleaned snapshot: {}", e);
            return false;
        }

        debug!(key = %key, type_name = cleaned.type_name, "Cleared dirty flag");
        self.emit(SyncEvent::Cleaned {
            cache_key: key,
            type_name: cleaned.type_name,
        });
        true
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_common::QUEUE_KEY;
    use offsync_storage::MemoryStore;
    use offsync_transport::ScriptedTransport;

    fn setup() -> (Reconciler, Arc<MemoryStore>, Arc<ScriptedTransport>) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let reconciler = Reconciler::builder()
            .store(store.clone())
            .transport(transport.clone())
            .build()
            .unwrap();
        (reconciler, store, transport)
    }

    fn post(path: &str) -> QueuedMutation {
        QueuedMutation::new(
            "POST",
            format!("https://api.example.com{}", path),
            Some(r#"{"name":"a"}"#.to_string()),
        )
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let (reconciler, store, transport) = setup();

        let report = reconciler.sync().await.unwrap();

        assert!(!report.changed());
        assert_eq!(transport.request_count(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_replays_in_order_and_empties_queue() {
        let (reconciler, store, transport) = setup();
        reconciler.queue().append(post("/api/a")).await.unwrap();
        reconciler.queue().append(post("/api/b")).await.unwrap();
        transport.push_response(201, "");
        transport.push_response(200, "");

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
        let sent: Vec<_> = transport.requests().iter().map(|r| r.url.path().to_string()).collect();
        assert_eq!(sent, vec!["/api/a", "/api/b"]);
        let persisted: Vec<QueuedMutation> = store.get_item(QUEUE_KEY).await.unwrap().unwrap();
        assert!(persisted.is_empty());
    }

    #[tokio::test]
    async fn test_stops_at_first_rejection() {
        let (reconciler, _store, transport) = setup();
        reconciler.queue().append(post("/api/a")).await.unwrap();
        reconciler.queue().append(post("/api/b")).await.unwrap();
        transport.push_response(500, "boom");
        transport.push_response(200, "");

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.halted, Some(HaltReason::Rejected { status: 500 }));
        assert_eq!(report.remaining, 2);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_without_removal_leaves_store_untouched() {
        let (reconciler, store, transport) = setup();
        reconciler.queue().append(post("/api/a")).await.unwrap();
        let before = store.get_raw(QUEUE_KEY).await.unwrap();
        transport.push_unreachable();

        let report = reconciler.sync().await.unwrap();

        assert!(matches!(report.halted, Some(HaltReason::Unreachable(_))));
        assert_eq!(store.get_raw(QUEUE_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_transport_error_halts_and_keeps_queue() {
        let (reconciler, store, transport) = setup();
        reconciler.queue().append(post("/api/a")).await.unwrap();
        reconciler.queue().append(post("/api/b")).await.unwrap();
        let before = store.get_raw(QUEUE_KEY).await.unwrap();
        transport.push_error("request could not be built");
        transport.push_response(200, "");

        let report = reconciler.sync().await.unwrap();

        assert!(matches!(report.halted, Some(HaltReason::Failed(_))));
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.remaining(), 1);
        assert_eq!(store.get_raw(QUEUE_KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_credential_entry_discarded_without_network() {
        let (reconciler, _store, transport) = setup();
        let mut events = reconciler.subscribe();
        reconciler.queue().append(post("/API/Tokens")).await.unwrap();

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(transport.request_count(), 0);
        match events.recv().await.unwrap() {
            SyncEvent::Discarded { reason, .. } => {
                assert_eq!(reason, DiscardReason::CredentialEndpoint)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_sends_json_body_without_stored_headers() {
        let (reconciler, _store, transport) = setup();
        let mut entry = post("/api/a");
        entry.push_header("x-trace", "abc");
        reconciler.queue().append(entry).await.unwrap();
        transport.push_response(200, "");

        reconciler.sync().await.unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
        assert!(sent.headers.get("x-trace").is_none());
        assert_eq!(sent.body_text().as_deref(), Some(r#"{"name":"a"}"#));
    }

    #[tokio::test]
    async fn test_malformed_entry_discarded() {
        let (reconciler, _store, transport) = setup();
        reconciler
            .queue()
            .append(QueuedMutation::new("POST", "not a url", None))
            .await
            .unwrap();

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(transport.request_count(), 0);
    }
}
