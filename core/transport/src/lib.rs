//! HTTP transport abstraction for offline sync.
//!
//! The transport boundary reports connectivity problems as a value
//! ([`Delivery::Unreachable`]) rather than an error, so callers can branch
//! between "the server answered" and "the server could not be reached" with
//! an explicit match. Any received HTTP status, including 4xx and 5xx, is a
//! delivery.

pub mod http;
pub mod message;
pub mod scripted;
pub mod transport;

pub use http::{ReqwestTransport, TransportConfig};
pub use message::{ByteStream, HttpRequest, HttpResponse, ResponseBody};
pub use scripted::ScriptedTransport;
pub use transport::{Delivery, FailureKind, HttpTransport, TransportFailure};

pub use reqwest::header;
pub use reqwest::{Method, StatusCode, Version};
