//! Sync outcomes and the events emitted while reconciling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a sync pass stopped before draining the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// The server answered with a non-success status.
    Rejected { status: u16 },
    /// The server could not be reached.
    Unreachable(String),
    /// The request could not be sent or its response not read.
    Failed(String),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Rejected { status } => write!(f, "rejected with status {}", status),
            HaltReason::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            HaltReason::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Why an entry was dropped without being replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The entry targets a credential-issuance endpoint.
    CredentialEndpoint,
    /// The entry cannot be turned back into a request.
    Malformed(String),
}

/// Notification emitted by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// An entry was delivered and accepted.
    Replayed {
        url: String,
        method: String,
        status: u16,
    },
    /// An entry was removed without being sent.
    Discarded {
        url: String,
        method: String,
        queued_at: DateTime<Utc>,
        reason: DiscardReason,
    },
    /// Replay stopped at this entry; it and everything after it stay queued.
    Halted {
        url: String,
        method: String,
        reason: HaltReason,
    },
    /// A cached snapshot had its dirty flag cleared.
    Cleaned {
        cache_key: String,
        type_name: &'static str,
    },
}

/// Summary of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries delivered and removed.
    pub replayed: usize,
    /// Entries dropped without delivery.
    pub discarded: usize,
    /// Cached snapshots whose dirty flag was cleared.
    pub cleaned: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
    /// Set when the pass stopped early.
    pub halted: Option<HaltReason>,
    pub duration: Duration,
}

impl SyncReport {
    /// Check if entries are left that a later pass should retry.
    pub fn needs_retry(&self) -> bool {
        self.remaining > 0
    }

    /// Check if the pass removed anything from the queue.
    pub fn changed(&self) -> bool {
        self.replayed + self.discarded > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_flags() {
        let report = SyncReport::default();
        assert!(!report.changed());
        assert!(!report.needs_retry());

        let report = SyncReport {
            discarded: 1,
            remaining: 2,
            halted: Some(HaltReason::Rejected { status: 500 }),
            ..SyncReport::default()
        };
        assert!(report.changed());
        assert!(report.needs_retry());
    }

    #[test]
    fn test_halt_reason_display() {
        assert_eq!(
            HaltReason::Rejected { status: 409 }.to_string(),
            "rejected with status 409"
        );
        assert_eq!(
            HaltReason::Unreachable("refused".into()).to_string(),
            "unreachable: refused"
        );
    }
}
