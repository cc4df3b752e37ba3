//! Local filesystem store.

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::KeyValueStore;
use offsync_common::{Error, Result};

/// Characters escaped when turning a key into a file name.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// File extension for stored values.
const VALUE_EXT: &str = "json";

/// Longest file name most filesystems accept (NAME_MAX).
const MAX_FILE_NAME: usize = 255;

/// Marks digest-named files. Never produced by the percent encoding.
const HASHED_PREFIX: char = '~';

/// Where a key lives on disk.
enum Slot {
    /// File name is the encoded key; the file holds the raw value.
    Plain(PathBuf),
    /// File name is a digest of the key; the file holds a [`Envelope`].
    Hashed(PathBuf),
}

/// Contents of a digest-named file.
#[derive(Serialize, Deserialize)]
struct Envelope {
    key: String,
    value: String,
}

/// Local filesystem store.
///
/// Stores each key as one file in a root directory. File names are the
/// percent-encoded key, so URIs can be used as keys directly. Keys whose
/// encoded name would exceed NAME_MAX are stored under a fixed-length
/// digest name instead, with the key kept inside the file.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Store root is not a directory: {}",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, key: &str) -> Slot {
        let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
        let name = format!("{}.{}", encoded, VALUE_EXT);
        if name.len() <= MAX_FILE_NAME {
            return Slot::Plain(self.root.join(name));
        }

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(key.as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Slot::Hashed(
            self.root
                .join(format!("{}{}.{}", HASHED_PREFIX, digest, VALUE_EXT)),
        )
    }

    fn key_path(&self, key: &str) -> PathBuf {
        match self.slot(key) {
            Slot::Plain(path) | Slot::Hashed(path) => path,
        }
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(&format!(".{}", VALUE_EXT))?;
        percent_decode_str(stem)
            .decode_utf8()
            .ok()
            .map(|k| k.into_owned())
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_envelope(path: &Path) -> Result<Option<Envelope>> {
        match Self::read_optional(path).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                Error::Storage(format!("Corrupt store file {}: {}", path.display(), e))
            }),
            None => Ok(None),
        }
    }

    /// Write then rename so readers never observe a partial value.
    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp = self
            .root
            .join(format!(".{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, contents.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match self.slot(key) {
            Slot::Plain(path) => Self::read_optional(&path).await,
            Slot::Hashed(path) => match Self::read_envelope(&path).await? {
                Some(envelope) if envelope.key == key => Ok(Some(envelope.value)),
                Some(envelope) => {
                    warn!(key, other = %envelope.key, "Digest collision in local store");
                    Ok(None)
                }
                None => Ok(None),
            },
        }
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        let bytes = value.len();
        let result = match self.slot(key) {
            Slot::Plain(path) => self.write_atomic(&path, &value).await,
            Slot::Hashed(path) => {
                let envelope = serde_json::to_string(&Envelope {
                    key: key.to_string(),
                    value,
                })?;
                self.write_atomic(&path, &envelope).await
            }
        };

        if let Err(e) = &result {
            warn!("Failed to commit value for {}: {}", key, e);
        } else {
            debug!(key, bytes, "Stored value");
        }
        result
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        match self.slot(key) {
            Slot::Plain(path) => Ok(fs::try_exists(path).await?),
            Slot::Hashed(path) => Ok(Self::read_envelope(&path)
                .await?
                .is_some_and(|e| e.key == key)),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if name.starts_with(HASHED_PREFIX) {
                match Self::read_envelope(&entry.path()).await {
                    Ok(Some(envelope)) => keys.push(envelope.key),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping unreadable store file: {}", e),
                }
                continue;
            }
            if let Some(key) = Self::key_from_file_name(name) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}
