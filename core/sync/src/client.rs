//! High-level client tying the interceptor, queue and reconciler together.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use offsync_common::{cache_key, CachedResponse, Error, QueuedMutation, Result};
use offsync_storage::{KeyValueStore, StoreExt};
use offsync_transport::{HttpRequest, HttpResponse, HttpTransport, Method};

use crate::config::OfflineConfig;
use crate::dirty::DirtyRegistry;
use crate::interceptor::Interceptor;
use crate::queue::MutationQueue;
use crate::reconciler::Reconciler;
use crate::report::{SyncEvent, SyncReport};

/// Offline-capable HTTP client for one API.
///
/// Requests go through an [`Interceptor`]; [`sync`](Self::sync) replays
/// whatever was queued while offline. Both share a single store and queue.
pub struct OfflineClient {
    base_url: Url,
    store: Arc<dyn KeyValueStore>,
    interceptor: Interceptor,
    reconciler: Arc<Reconciler>,
}

impl OfflineClient {
    /// Create a client over an explicit store and transport.
    ///
    /// # Errors
    /// - `Error::Config` if the configuration is invalid
    pub fn new(
        config: &OfflineConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn HttpTransport>,
        registry: DirtyRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        let queue = Arc::new(MutationQueue::new(store.clone()));
        let interceptor = Interceptor::builder()
            .store(store.clone())
            .transport(transport.clone())
            .queue(queue.clone())
            .build()?;
        let reconciler = Reconciler::builder()
            .store(store.clone())
            .transport(transport)
            .queue(queue)
            .registry(Arc::new(registry))
            .credential_endpoints(config.credential_endpoints.clone())
            .build()?;

        info!(base_url = %base_url, store = store.name(), "Offline client ready");

        Ok(Self {
            base_url,
            store,
            interceptor,
            reconciler: Arc::new(reconciler),
        })
    }

    /// Create a client whose store and transport come from configuration.
    pub fn from_config(config: &OfflineConfig, registry: DirtyRegistry) -> Result<Self> {
        config.validate()?;
        let store = config.open_store()?;
        let transport = config.open_transport()?;
        Self::new(config, store, transport, registry)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path (or absolute URL) against the base URL.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Send a prepared request.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.interceptor.intercept(request).await
    }

    /// Send a prepared request, abandoning it when `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        self.interceptor.intercept_with_cancel(request, cancel).await
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::get(self.resolve(path)?)).await
    }

    pub async fn post_json(&self, path: &str, body: impl Into<String>) -> Result<HttpResponse> {
        self.send(HttpRequest::with_json(Method::POST, self.resolve(path)?, body))
            .await
    }

    pub async fn put_json(&self, path: &str, body: impl Into<String>) -> Result<HttpResponse> {
        self.send(HttpRequest::with_json(Method::PUT, self.resolve(path)?, body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        self.send(HttpRequest::new(Method::DELETE, self.resolve(path)?))
            .await
    }

    /// Replay queued mutations now.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.reconciler.sync().await
    }

    /// Mutations waiting to be replayed, oldest first.
    pub async fn pending(&self) -> Result<Vec<QueuedMutation>> {
        self.reconciler.queue().load().await
    }

    /// The snapshot cached for a path, if any.
    pub async fn cached(&self, path: &str) -> Result<Option<CachedResponse>> {
        let key = cache_key(&self.resolve(path)?);
        self.store.get_item(&key).await
    }

    /// Subscribe to replay events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.reconciler.subscribe()
    }

    /// Shared handle to the reconciler, e.g. for a scheduler task.
    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_storage::MemoryStore;
    use offsync_transport::{ScriptedTransport, StatusCode};

    fn client() -> (OfflineClient, Arc<ScriptedTransport>) {
        let config = OfflineConfig {
            base_url: Some(Url::parse("https://api.example.com/").unwrap()),
            ..OfflineConfig::default()
        };
        let transport = Arc::new(ScriptedTransport::new());
        let client = OfflineClient::new(
            &config,
            Arc::new(MemoryStore::new()),
            transport.clone(),
            DirtyRegistry::new(),
        )
        .unwrap();
        (client, transport)
    }

    #[test]
    fn test_new_requires_base_url() {
        let result = OfflineClient::new(
            &OfflineConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedTransport::new()),
            DirtyRegistry::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve() {
        let (client, _) = client();
        assert_eq!(
            client.resolve("/api/items?page=2").unwrap().as_str(),
            "https://api.example.com/api/items?page=2"
        );
    }

    #[tokio::test]
    async fn test_queue_then_sync() {
        let (client, transport) = client();
        transport.go_offline();

        let response = client.put_json("/api/items/1", r#"{"v":1}"#).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(client.pending().await.unwrap().len(), 1);

        transport.go_online();
        transport.push_response(204, "");
        let report = client.sync().await.unwrap();

        assert_eq!(report.replayed, 1);
        assert!(client.pending().await.unwrap().is_empty());
        assert_eq!(transport.requests()[1].method, Method::PUT);
    }

    #[tokio::test]
    async fn test_cached_lookup() {
        let (client, transport) = client();
        transport.push_response(200, r#"{"id":1}"#);

        client.get("/api/items/1").await.unwrap();

        let cached = client.cached("/api/items/1").await.unwrap().unwrap();
        assert_eq!(cached.body, r#"{"id":1}"#);
        assert!(client.cached("/api/items/2").await.unwrap().is_none());
    }
}
