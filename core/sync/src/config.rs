//! Configuration for an offline client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use offsync_common::{Error, Result};
use offsync_storage::{create_default_registry, KeyValueStore};
use offsync_transport::{HttpTransport, ReqwestTransport, TransportConfig};

use crate::reconciler::DEFAULT_CREDENTIAL_ENDPOINTS;
use crate::scheduler::SyncMode;

/// Which store backend to open, and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Registered store kind, e.g. "memory" or "local".
    pub kind: String,
    /// Backend-specific options, e.g. `{"root": "/var/lib/offsync"}`.
    pub options: Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            options: Value::Object(Default::default()),
        }
    }
}

impl StoreConfig {
    /// File-backed store rooted at `root`.
    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            kind: "local".to_string(),
            options: serde_json::json!({ "root": root.as_ref().to_string_lossy() }),
        }
    }
}

/// Top-level configuration, usually loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Base URL relative request paths are resolved against.
    pub base_url: Option<Url>,
    /// URL markers whose queued requests are discarded instead of replayed.
    pub credential_endpoints: Vec<String>,
    pub store: StoreConfig,
    pub transport: TransportConfig,
    pub sync_mode: SyncMode,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            credential_endpoints: DEFAULT_CREDENTIAL_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            store: StoreConfig::default(),
            transport: TransportConfig::default(),
            sync_mode: SyncMode::default(),
        }
    }
}

impl OfflineConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check that the configuration can drive a client.
    ///
    /// # Errors
    /// - `Error::Config` if the base URL is missing or cannot be a base
    /// - `Error::Config` if the store kind is not registered
    pub fn validate(&self) -> Result<()> {
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!("base_url {} cannot be a base", base)));
        }
        if !create_default_registry().has_store(&self.store.kind) {
            return Err(Error::Config(format!(
                "Unknown store kind: {:?}",
                self.store.kind
            )));
        }
        Ok(())
    }

    /// Open the configured store through the default registry.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        create_default_registry().resolve(&self.store.kind, self.store.options.clone())
    }

    /// Build the configured HTTP transport.
    pub fn open_transport(&self) -> Result<Arc<dyn HttpTransport>> {
        Ok(Arc::new(ReqwestTransport::new(&self.transport)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = OfflineConfig::default();
        assert_eq!(config.credential_endpoints, vec!["/api/tokens"]);
        assert_eq!(config.store.kind, "memory");
        assert_eq!(config.sync_mode, SyncMode::Manual);
    }

    #[test]
    fn test_validate_requires_base_url() {
        let err = OfflineConfig::default().validate().unwrap_err();
        assert!(err.is_config_error());

        let config = OfflineConfig {
            base_url: Some(Url::parse("https://api.example.com").unwrap()),
            ..OfflineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_store_kind() {
        let config = OfflineConfig {
            base_url: Some(Url::parse("https://api.example.com").unwrap()),
            store: StoreConfig {
                kind: "sqlite".to_string(),
                ..StoreConfig::default()
            },
            ..OfflineConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("sqlite"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsync.json");
        std::fs::write(
            &path,
            r#"{
                "base_url": "https://api.example.com/",
                "store": {"kind": "local", "options": {"root": "/tmp/offsync"}},
                "transport": {"timeout_secs": 5},
                "sync_mode": {"periodic": {"interval": 60}}
            }"#,
        )
        .unwrap();

        let config = OfflineConfig::load(&path).unwrap();
        assert_eq!(config.base_url.unwrap().as_str(), "https://api.example.com/");
        assert_eq!(config.store.kind, "local");
        assert_eq!(config.transport.timeout_secs, 5);
        assert_eq!(config.credential_endpoints, vec!["/api/tokens"]);
        assert_eq!(
            config.sync_mode,
            SyncMode::Periodic {
                interval: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(OfflineConfig::load(&path).unwrap_err().is_config_error());
    }

    #[test]
    fn test_open_local_store() {
        let dir = TempDir::new().unwrap();
        let config = OfflineConfig {
            store: StoreConfig::local(dir.path()),
            ..OfflineConfig::default()
        };

        let store = config.open_store().unwrap();
        assert_eq!(store.name(), "local");
    }
}
