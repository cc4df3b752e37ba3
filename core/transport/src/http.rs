//! reqwest-backed transport.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::message::{HttpRequest, HttpResponse, ResponseBody};
use crate::transport::{Delivery, FailureKind, HttpTransport, TransportFailure};
use offsync_common::{Error, Result};

/// Default user agent sent with every request.
const DEFAULT_USER_AGENT: &str = "offsync/0.1";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
    /// User agent header value.
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Transport that sends requests with a shared reqwest client.
///
/// Headers are returned as soon as they arrive; the body is handed back as
/// a stream and only buffered by whoever needs it.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Create a new transport.
    ///
    /// # Errors
    /// - The underlying client cannot be constructed (TLS backend failure)
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    /// Wrap an already configured client.
    pub fn from_client(http: Client) -> Self {
        Self { http }
    }

    fn classify(err: &reqwest::Error) -> FailureKind {
        if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() {
            FailureKind::Connect
        } else {
            FailureKind::Other
        }
    }

    fn build_request(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let HttpRequest {
            method,
            url,
            version,
            headers,
            body,
        } = request;

        let builder = self
            .http
            .request(method, url)
            .version(version)
            .headers(headers);
        match body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }

    fn into_response(response: reqwest::Response) -> HttpResponse {
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Transport(format!("Failed to read body: {}", e))));

        HttpResponse {
            status,
            reason: None,
            version,
            headers,
            body: ResponseBody::Stream(Box::pin(stream)),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn send(&self, request: HttpRequest) -> Result<Delivery> {
        let method = request.method.clone();
        let url = request.url.clone();
        let builder = self.build_request(request);

        match builder.send().await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "Request delivered");
                Ok(Delivery::Delivered(Self::into_response(response)))
            }
            Err(e) if e.is_builder() => {
                Err(Error::Transport(format!("Failed to build request: {}", e)))
            }
            Err(e) => {
                let kind = Self::classify(&e);
                debug!(%method, %url, %kind, "Request unreachable: {}", e);
                Ok(Delivery::Unreachable(TransportFailure::new(kind, e.to_string())))
            }
        }
    }
}
