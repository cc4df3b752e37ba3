//! HTTP request and response types.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Version};
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use url::Url;

use offsync_common::{CachedResponse, Error, Result};

/// Byte stream type for response bodies.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Outbound HTTP request.
///
/// The body is held as [`Bytes`], so cloning a request is cheap and a clone
/// sent to the network never consumes the caller's copy.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a request carrying a JSON text body.
    pub fn with_json(method: Method, url: Url, body: impl Into<String>) -> Self {
        Self::new(method, url)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body.into())
    }

    /// Create a POST request carrying a JSON text body.
    pub fn post_json(url: Url, body: impl Into<String>) -> Self {
        Self::with_json(Method::POST, url, body)
    }

    /// Append a header value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Check if the method changes server state.
    ///
    /// GET, HEAD, OPTIONS and TRACE are reads; everything else is a mutation.
    pub fn is_mutation(&self) -> bool {
        !self.method.is_safe()
    }

    /// Body decoded as text, if present.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Response body, either already buffered or still streaming.
pub enum ResponseBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl ResponseBody {
    /// An empty buffered body.
    pub fn empty() -> Self {
        ResponseBody::Full(Bytes::new())
    }

    /// Read the whole body into memory.
    pub async fn collect(self) -> Result<Bytes> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Full(bytes)
    }
}

/// HTTP response as seen by the caller.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    /// Reason phrase, when the transport or cache supplied one.
    pub reason: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Create a response with an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
        }
    }

    /// Create a response with a JSON text body.
    pub fn json_text(status: StatusCode, body: &'static str) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(Bytes::from_static(body.as_bytes()))
    }

    /// Append a header value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body with buffered bytes.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Full(body.into());
        self
    }

    /// Check if the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Reason phrase, falling back to the canonical one for the status.
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    /// Read the whole body as text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the whole body and decode it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Buffer the body and produce a cache snapshot alongside a response
    /// the caller can still consume.
    pub async fn snapshot(self) -> Result<(CachedResponse, HttpResponse)> {
        let HttpResponse {
            status,
            reason,
            version,
            headers,
            body,
        } = self;
        let bytes = body.collect().await?;

        let mut cached = CachedResponse::new(
            status.as_u16(),
            String::from_utf8_lossy(&bytes).into_owned(),
        );
        cached.reason_phrase = reason
            .clone()
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "OK".to_string());
        cached.version = version_label(version).to_string();
        for (name, value) in headers.iter() {
            match value.to_str() {
                Ok(v) => cached.push_header(name.as_str(), v),
                Err(_) => {
                    tracing::debug!(header = %name, "Skipping non-text header in snapshot");
                }
            }
        }

        let response = HttpResponse {
            status,
            reason,
            version,
            headers,
            body: ResponseBody::Full(bytes),
        };
        Ok((cached, response))
    }

    /// Rebuild a response from a cache snapshot without revalidation.
    ///
    /// # Errors
    /// - Stored status code or header is not valid HTTP
    pub fn from_cached(cached: &CachedResponse) -> Result<Self> {
        let status = StatusCode::from_u16(cached.status_code).map_err(|e| {
            Error::Serialization(format!("Invalid cached status {}: {}", cached.status_code, e))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in cached.all_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Serialization(format!("Invalid cached header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Serialization(format!("Invalid cached header value: {}", e)))?;
            headers.append(name, value);
        }

        Ok(Self {
            status,
            reason: Some(cached.reason_phrase.clone()),
            version: parse_version(&cached.version),
            headers,
            body: ResponseBody::Full(Bytes::from(cached.body.clone())),
        })
    }
}

/// Text label used when persisting a protocol version.
pub fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Parse a persisted protocol version label; unknown labels mean HTTP/1.1.
pub fn parse_version(label: &str) -> Version {
    match label.trim() {
        "0.9" => Version::HTTP_09,
        "1.0" => Version::HTTP_10,
        "2" | "2.0" => Version::HTTP_2,
        "3" | "3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}
