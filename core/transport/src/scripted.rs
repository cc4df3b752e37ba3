//! Scripted in-memory transport for testing.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::message::{HttpRequest, HttpResponse};
use crate::transport::{Delivery, HttpTransport, TransportFailure};
use offsync_common::{Error, Result};

/// One scripted reply.
#[derive(Debug, Clone)]
enum Step {
    Respond {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
    },
    Unreachable(TransportFailure),
    Fail(String),
}

/// Transport that replays scripted outcomes in order.
///
/// Useful for testing. Every request is recorded, including those sent
/// while offline. When offline, requests fail without consuming the script;
/// when the script runs dry, requests fail as unreachable.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<HttpRequest>>,
    offline: AtomicBool,
}

impl ScriptedTransport {
    /// Create an online transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with the given status and body.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.push_response_with_headers(status, body, &[]);
    }

    /// Queue a response with headers.
    pub fn push_response_with_headers(
        &self,
        status: u16,
        body: impl Into<String>,
        headers: &[(&str, &str)],
    ) {
        let headers = headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        lock(&self.script).push_back(Step::Respond {
            status,
            body: body.into(),
            headers,
        });
    }

    /// Queue a connectivity failure.
    pub fn push_unreachable(&self) {
        lock(&self.script).push_back(Step::Unreachable(TransportFailure::connect(
            "scripted connection refused",
        )));
    }

    /// Queue a hard error: `send` returns `Err` instead of a delivery.
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.script).push_back(Step::Fail(message.into()));
    }

    /// Fail every request until [`go_online`](Self::go_online) is called.
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    /// Resume replaying the script.
    pub fn go_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Number of scripted steps not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    fn build_response(status: u16, body: String, headers: Vec<(String, String)>) -> Result<HttpResponse> {
        let status = StatusCode::from_u16(status)
            .map_err(|e| Error::InvalidInput(format!("Invalid scripted status: {}", e)))?;
        let mut response = HttpResponse::new(status).with_body(Bytes::from(body));
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("Invalid scripted header: {}", e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| Error::InvalidInput(format!("Invalid scripted header: {}", e)))?;
            response.headers.append(name, value);
        }
        Ok(response)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: HttpRequest) -> Result<Delivery> {
        lock(&self.requests).push(request);

        if self.offline.load(Ordering::SeqCst) {
            return Ok(Delivery::Unreachable(TransportFailure::connect(
                "scripted network offline",
            )));
        }

        let step = lock(&self.script).pop_front();
        match step {
            Some(Step::Respond {
                status,
                body,
                headers,
            }) => Ok(Delivery::Delivered(Self::build_response(status, body, headers)?)),
            Some(Step::Unreachable(failure)) => Ok(Delivery::Unreachable(failure)),
            Some(Step::Fail(message)) => Err(Error::Transport(message)),
            None => Ok(Delivery::Unreachable(TransportFailure::connect(
                "scripted transport exhausted",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request() -> HttpRequest {
        HttpRequest::get(Url::parse("https://api.example.com/api/items").unwrap())
    }

    #[tokio::test]
    async fn test_replays_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "first");
        transport.push_unreachable();

        match transport.send(request()).await.unwrap() {
            Delivery::Delivered(r) => assert_eq!(r.text().await.unwrap(), "first"),
            Delivery::Unreachable(f) => panic!("unexpected failure: {}", f),
        }
        assert!(!transport.send(request()).await.unwrap().is_delivered());
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_offline_keeps_script() {
        let transport = ScriptedTransport::new();
        transport.push_response(200, "later");
        transport.go_offline();

        assert!(!transport.send(request()).await.unwrap().is_delivered());
        assert_eq!(transport.remaining(), 1);

        transport.go_online();
        assert!(transport.send(request()).await.unwrap().is_delivered());
    }

    #[tokio::test]
    async fn test_scripted_error_is_returned() {
        let transport = ScriptedTransport::new();
        transport.push_error("request could not be built");

        let err = transport.send(request()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.remaining(), 0);
    }
}
