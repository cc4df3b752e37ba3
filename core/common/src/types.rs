//! Persisted data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header names that belong to the content-header set of a response.
const CONTENT_HEADERS: &[&str] = &[
    "allow",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

/// Check whether a header describes the body rather than the message.
pub fn is_content_header(name: &str) -> bool {
    CONTENT_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn default_reason() -> String {
    "OK".to_string()
}

fn default_version() -> String {
    "1.1".to_string()
}

/// Snapshot of a successful HTTP response.
///
/// Stored under `offline-cache::<uri>`. At most one snapshot exists per URI;
/// a newer successful response overwrites the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    /// Numeric HTTP status.
    pub status_code: u16,
    /// Reason phrase sent with the status.
    #[serde(default = "default_reason")]
    pub reason_phrase: String,
    /// Protocol version, e.g. "1.1" or "2.0".
    #[serde(default = "default_version")]
    pub version: String,
    /// Body as text.
    #[serde(default)]
    pub body: String,
    /// Message headers, each with its ordered values.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Content headers, each with its ordered values.
    #[serde(default)]
    pub content_headers: BTreeMap<String, Vec<String>>,
}

impl CachedResponse {
    /// Create a snapshot with default reason and version and no headers.
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            reason_phrase: default_reason(),
            version: default_version(),
            body: body.into(),
            headers: BTreeMap::new(),
            content_headers: BTreeMap::new(),
        }
    }

    /// Record a header value, routing it to the content or message set.
    pub fn push_header(&mut self, name: &str, value: impl Into<String>) {
        let target = if is_content_header(name) {
            &mut self.content_headers
        } else {
            &mut self.headers
        };
        target
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// Iterate over every header pair, message headers first.
    pub fn all_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .chain(self.content_headers.iter())
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Check whether the stored status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// A state-changing request that could not be delivered live.
///
/// Entries live in one ordered list under `offline-queue`. They are never
/// edited in place; the list is rewritten as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Absolute target URL.
    pub url: String,
    /// HTTP method name, never GET.
    pub method: String,
    /// Request body as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request headers, multiple values joined with ",".
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// When the entry was queued.
    pub timestamp: DateTime<Utc>,
}

impl QueuedMutation {
    /// Create a queue entry stamped with the current time.
    pub fn new(method: impl Into<String>, url: impl Into<String>, body: Option<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body,
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Append a header value, joining repeated names with ",".
    ///
    /// Flattening loses the distinction between one value containing a comma
    /// and two separate values.
    pub fn push_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_string())
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    /// Check whether the target URL addresses a credential-issuance endpoint.
    ///
    /// Matching is a case-insensitive substring test against each marker.
    pub fn is_credential_request<S: AsRef<str>>(&self, markers: &[S]) -> bool {
        let url = self.url.to_ascii_lowercase();
        markers
            .iter()
            .any(|m| url.contains(&m.as_ref().to_ascii_lowercase()))
    }

    /// Body to replay, if it carries any content.
    pub fn replay_body(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.trim().is_empty())
    }
}
