//! Request interceptor providing offline fallback.
//!
//! ```text
//!   request ──► transport.send(clone)
//!                  │
//!        ┌─────────┴──────────┐
//!    Delivered            Unreachable
//!        │                    │
//!   2xx? snapshot ──►    cached snapshot? ──► rebuilt response
//!   return live               │ no
//!                        mutation? ──► queue + "Offline queued" (200)
//!                             │ no
//!                        503 "Offline and no cache available."
//! ```

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use offsync_common::{cache_key, CachedResponse, Error, QueuedMutation, Result};
use offsync_storage::{KeyValueStore, StoreExt};
use offsync_transport::{
    Delivery, HttpRequest, HttpResponse, HttpTransport, StatusCode, TransportFailure,
};

use crate::queue::MutationQueue;

/// Body returned when a mutation was queued instead of delivered.
pub const QUEUED_BODY: &str = r#"{"message":"Offline queued","isDirty":true}"#;

/// Body returned when a read can be served neither live nor from cache.
pub const UNAVAILABLE_BODY: &str = r#"{"message":"Offline and no cache available."}"#;

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Live,
    Cache,
    Queued,
    Unavailable,
}

/// Wraps a transport with cache-or-queue fallback.
pub struct Interceptor {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn HttpTransport>,
    queue: Arc<MutationQueue>,
}

/// Builder for [`Interceptor`].
#[derive(Default)]
pub struct InterceptorBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    transport: Option<Arc<dyn HttpTransport>>,
    queue: Option<Arc<MutationQueue>>,
}

impl InterceptorBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share a queue with a reconciler. Defaults to a queue over the store.
    pub fn queue(mut self, queue: Arc<MutationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Build the interceptor.
    ///
    /// # Errors
    /// - `Error::Config` if no transport or no store was supplied
    pub fn build(self) -> Result<Interceptor> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("Interceptor has no inner transport".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| Error::Config("Interceptor has no store".to_string()))?;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(MutationQueue::new(store.clone())));

        Ok(Interceptor {
            store,
            transport,
            queue,
        })
    }
}

impl Interceptor {
    pub fn builder() -> InterceptorBuilder {
        InterceptorBuilder::default()
    }

    /// The queue this interceptor appends to.
    pub fn queue(&self) -> Arc<MutationQueue> {
        self.queue.clone()
    }

    /// Send a request, falling back to cache or queue when unreachable.
    ///
    /// # Returns
    /// A live, cached, queued-placeholder or unavailable response. Transport
    /// failures never surface as `Err`.
    ///
    /// # Errors
    /// - Request cannot be handed to the transport at all
    /// - Store failure while queueing a mutation
    /// - Body read failure after a successful status was received
    pub async fn intercept(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.intercept_traced(request).await.map(|(response, _)| response)
    }

    /// Like [`intercept`](Self::intercept), but abandons the call when
    /// `cancel` fires.
    ///
    /// Store writes are single whole-value writes, so an abandoned call
    /// leaves each key either fully written or untouched.
    pub async fn intercept_with_cancel(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Intercept cancelled");
                Err(Error::Cancelled)
            }
            result = self.intercept(request) => result,
        }
    }

    /// Send a request and report where the response came from.
    pub async fn intercept_traced(
        &self,
        request: HttpRequest,
    ) -> Result<(HttpResponse, ResponseSource)> {
        let key = cache_key(&request.url);

        // The caller's request stays intact for the fallback path.
        let outbound = request.clone();

        match self.transport.send(outbound).await? {
            Delivery::Delivered(response) => {
                let response = self.on_delivered(&key, response).await?;
                Ok((response, ResponseSource::Live))
            }
            Delivery::Unreachable(failure) => self.fallback(&key, request, failure).await,
        }
    }

    async fn on_delivered(&self, key: &str, response: HttpResponse) -> Result<HttpResponse> {
        if !response.is_success() {
            debug!(key, status = %response.status, "Live response not cached");
            return Ok(response);
        }

        let (cached, live) = response.snapshot().await?;
        if let Err(e) = self.store.set_item(key, &cached).await {
            warn!(key, "Failed to cache response: {}", e);
        } else {
            debug!(key, status = cached.status_code, "Cached live response");
        }

        Ok(live)
    }

    async fn fallback(
        &self,
        key: &str,
        request: HttpRequest,
        failure: TransportFailure,
    ) -> Result<(HttpResponse, ResponseSource)> {
        debug!(key, %failure, "Transport unreachable, trying fallback");

        if let Some(response) = self.cached_response(key).await {
            info!(key, "Serving cached response while offline");
            return Ok((response, ResponseSource::Cache));
        }

        if request.is_mutation() {
            let entry = queued_from_request(&request);
            let len = self.queue.append(entry).await?;
            info!(
                method = %request.method,
                url = %request.url,
                pending = len,
                "Queued mutation while offline"
            );
            let response = HttpResponse::json_text(StatusCode::OK, QUEUED_BODY);
            return Ok((response, ResponseSource::Queued));
        }

        warn!(url = %request.url, "Offline with no cached response");
        let response = HttpResponse::json_text(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY);
        Ok((response, ResponseSource::Unavailable))
    }

    /// Look up the snapshot for `key`.
    ///
    /// Any failure to read or rebuild it counts as a miss, so the fallback
    /// can still queue or answer 503.
    async fn cached_response(&self, key: &str) -> Option<HttpResponse> {
        let cached = match self.store.get_item::<CachedResponse>(key).await {
            Ok(cached) => cached?,
            Err(e) => {
                warn!(key, "Ignoring unreadable cached response: {}", e);
                return None;
            }
        };

        match HttpResponse::from_cached(&cached) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key, "Ignoring invalid cached response: {}", e);
                None
            }
        }
    }
}

/// Record a request for later replay.
fn queued_from_request(request: &HttpRequest) -> QueuedMutation {
    let mut entry = QueuedMutation::new(
        request.method.as_str(),
        request.url.as_str(),
        request.body_text(),
    );
    for (name, value) in request.headers.iter() {
        match value.to_str() {
            Ok(v) => entry.push_header(name.as_str(), v),
            Err(_) => debug!(header = %name, "Skipping non-text header"),
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use offsync_common::{CACHE_KEY_PREFIX, QUEUE_KEY};
    use offsync_storage::MemoryStore;
    use offsync_transport::{header, Method, ScriptedTransport};
    use url::Url;

    fn url(path: &str) -> Url {
        Url::parse("https://api.example.com").unwrap().join(path).unwrap()
    }

    fn setup() -> (Interceptor, Arc<MemoryStore>, Arc<ScriptedTransport>) {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        let interceptor = Interceptor::builder()
            .store(store.clone())
            .transport(transport.clone())
            .build()
            .unwrap();
        (interceptor, store, transport)
    }

    /// Store whose cache reads always fail; the queue key works normally.
    struct BrokenCacheStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for BrokenCacheStore {
        fn name(&self) -> &str {
            "broken-cache"
        }

        async fn get_raw(&self, key: &str) -> Result<Option<String>> {
            if key.starts_with(CACHE_KEY_PREFIX) {
                return Err(Error::Storage("disk unavailable".to_string()));
            }
            self.inner.get_raw(key).await
        }

        async fn set_raw(&self, key: &str, value: String) -> Result<()> {
            self.inner.set_raw(key, value).await
        }

        async fn contains_key(&self, key: &str) -> Result<bool> {
            self.inner.contains_key(key).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
    }

    #[test]
    fn test_build_without_transport_fails() {
        let result = Interceptor::builder()
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_live_success_is_cached() {
        let (interceptor, store, transport) = setup();
        transport.push_response(200, r#"{"id":1}"#);

        let (response, source) = interceptor
            .intercept_traced(HttpRequest::get(url("/api/items/1")))
            .await
            .unwrap();

        assert_eq!(source, ResponseSource::Live);
        assert_eq!(response.text().await.unwrap(), r#"{"id":1}"#);
        let cached: CachedResponse = store
            .get_item("offline-cache::https://api.example.com/api/items/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body, r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_live_error_status_returned_not_cached() {
        let (interceptor, store, transport) = setup();
        transport.push_response(404, "missing");

        let response = interceptor
            .intercept(HttpRequest::get(url("/api/items/9")))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_offline_serves_cache() {
        let (interceptor, _store, transport) = setup();
        transport.push_response_with_headers(200, "cached body", &[("etag", "\"v1\"")]);
        interceptor
            .intercept(HttpRequest::get(url("/api/items")))
            .await
            .unwrap();

        transport.go_offline();
        let (response, source) = interceptor
            .intercept_traced(HttpRequest::get(url("/api/items")))
            .await
            .unwrap();

        assert_eq!(source, ResponseSource::Cache);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::ETAG], "\"v1\"");
        assert_eq!(response.text().await.unwrap(), "cached body");
    }

    #[tokio::test]
    async fn test_offline_mutation_is_queued() {
        let (interceptor, store, transport) = setup();
        transport.go_offline();

        let request = HttpRequest::post_json(url("/api/items"), r#"{"name":"a"}"#);
        let (response, source) = interceptor.intercept_traced(request).await.unwrap();

        assert_eq!(source, ResponseSource::Queued);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.text().await.unwrap(), QUEUED_BODY);

        let queue: Vec<QueuedMutation> = store.get_item(QUEUE_KEY).await.unwrap().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].method, "POST");
        assert_eq!(queue[0].url, "https://api.example.com/api/items");
        assert_eq!(queue[0].body.as_deref(), Some(r#"{"name":"a"}"#));
        assert_eq!(queue[0].headers["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_offline_read_without_cache_is_unavailable() {
        let (interceptor, store, transport) = setup();
        transport.go_offline();

        let response = interceptor
            .intercept(HttpRequest::get(url("/api/other")))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.text().await.unwrap(), UNAVAILABLE_BODY);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_query_variants_cached_independently() {
        let (interceptor, _store, transport) = setup();
        transport.push_response(200, "page one");
        interceptor
            .intercept(HttpRequest::get(url("/api/items?page=1")))
            .await
            .unwrap();

        transport.go_offline();
        let response = interceptor
            .intercept(HttpRequest::get(url("/api/items?page=2")))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_retried_request_resends_body() {
        let (interceptor, _store, transport) = setup();
        transport.push_response(200, "ok");

        let request = HttpRequest::new(Method::PUT, url("/api/items/1")).with_body("{\"v\":2}");
        interceptor.intercept(request).await.unwrap();

        let sent = transport.requests();
        assert_eq!(sent[0].body_text().as_deref(), Some("{\"v\":2}"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let (interceptor, store, transport) = setup();
        transport.go_offline();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = interceptor
            .intercept_with_cancel(HttpRequest::post_json(url("/api/items"), "{}"), &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!store.contains_key(QUEUE_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_read_failure_degrades_to_miss() {
        let store = Arc::new(BrokenCacheStore {
            inner: MemoryStore::new(),
        });
        let transport = Arc::new(ScriptedTransport::new());
        let interceptor = Interceptor::builder()
            .store(store.clone())
            .transport(transport.clone())
            .build()
            .unwrap();
        transport.go_offline();

        let (read, source) = interceptor
            .intercept_traced(HttpRequest::get(url("/api/items")))
            .await
            .unwrap();
        assert_eq!(source, ResponseSource::Unavailable);
        assert_eq!(read.status, StatusCode::SERVICE_UNAVAILABLE);

        let (write, source) = interceptor
            .intercept_traced(HttpRequest::post_json(url("/api/items"), "{}"))
            .await
            .unwrap();
        assert_eq!(source, ResponseSource::Queued);
        assert_eq!(write.text().await.unwrap(), QUEUED_BODY);
        assert_eq!(interceptor.queue().len().await.unwrap(), 1);
    }
}
