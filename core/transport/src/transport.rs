//! Transport trait and the tagged delivery result.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::message::{HttpRequest, HttpResponse};
use offsync_common::Result;

/// Category of a connectivity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// DNS resolution or connection establishment failed.
    Connect,
    /// The request did not complete in time.
    Timeout,
    /// Any other failure before a status line was received.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Connect => write!(f, "connect"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Other => write!(f, "other"),
        }
    }
}

/// Why a request never reached the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }
}

/// Outcome of handing a request to the network.
#[derive(Debug)]
pub enum Delivery {
    /// The server answered; any status code counts.
    Delivered(HttpResponse),
    /// The server could not be reached.
    Unreachable(TransportFailure),
}

impl Delivery {
    /// Check if the request reached the server.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }
}

/// HTTP-capable sender.
///
/// Implementations return `Ok(Delivery::Unreachable)` for connectivity and
/// timeout problems. `Err` is reserved for requests that cannot be built or
/// handed to the network at all.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Get the transport name (e.g., "reqwest", "scripted").
    fn name(&self) -> &str;

    /// Send a request.
    ///
    /// # Postconditions
    /// - On `Delivered`, headers are available; the body may still be streaming
    async fn send(&self, request: HttpRequest) -> Result<Delivery>;
}
