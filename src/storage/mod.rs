//! Redirect-in-flight flag persistence
//!
//! Before a redirect flow leaves the page, the manager records that a
//! redirect is in flight. On the next load it reads the flag back to decide
//! whether to wait for a redirect callback or answer "no redirect" right
//! away. The flag is keyed by the manager key so several apps can share a
//! store.
//!
//! - [`MemoryFlagStore`] -- process-local, the default
//! - [`FileFlagStore`] -- one marker file per key, survives restarts

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Persistence for the "redirect in flight" flag.
#[async_trait]
pub trait RedirectFlagStore: Send + Sync + std::fmt::Debug {
    /// Whether a redirect is recorded as in flight for `key`.
    async fn get_pending_status(&self, key: &str) -> Result<bool>;

    /// Records that a redirect is in flight for `key`.
    async fn set_pending_status(&self, key: &str) -> Result<()>;

    /// Clears the flag for `key`. Clearing an unset flag is not an error.
    async fn remove_pending_status(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryFlagStore
// ---------------------------------------------------------------------------

/// Process-local flag store.
///
/// # Examples
///
/// ```
/// use signin_relay::storage::{MemoryFlagStore, RedirectFlagStore};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let store = MemoryFlagStore::new();
/// store.set_pending_status("key:app").await?;
/// assert!(store.get_pending_status("key:app").await?);
/// store.remove_pending_status("key:app").await?;
/// assert!(!store.get_pending_status("key:app").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryFlagStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RedirectFlagStore for MemoryFlagStore {
    async fn get_pending_status(&self, key: &str) -> Result<bool> {
        Ok(self.flags().contains_key(key))
    }

    async fn set_pending_status(&self, key: &str) -> Result<()> {
        self.flags().insert(key.to_string(), Utc::now());
        Ok(())
    }

    async fn remove_pending_status(&self, key: &str) -> Result<()> {
        self.flags().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileFlagStore
// ---------------------------------------------------------------------------

/// Contents of a marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingMarker {
    key: String,
    set_at: DateTime<Utc>,
}

/// Flag store backed by marker files in a directory.
#[derive(Debug, Clone)]
pub struct FileFlagStore {
    dir: PathBuf,
}

impl FileFlagStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            RelayError::Storage(format!(
                "Failed to create flag directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the marker files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.pending"))
    }
}

#[async_trait]
impl RedirectFlagStore for FileFlagStore {
    async fn get_pending_status(&self, key: &str) -> Result<bool> {
        let path = self.marker_path(key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(RelayError::Io(e).into()),
        };
        // Sanitized names can collide; the stored key disambiguates.
        let marker: PendingMarker = serde_json::from_str(&contents)?;
        Ok(marker.key == key)
    }

    async fn set_pending_status(&self, key: &str) -> Result<()> {
        let marker = PendingMarker {
            key: key.to_string(),
            set_at: Utc::now(),
        };
        tokio::fs::write(self.marker_path(key), serde_json::to_vec(&marker)?)
            .await
            .map_err(|e| RelayError::Storage(format!("Failed to write redirect flag: {e}")))?;
        tracing::debug!(key, "Redirect flag set");
        Ok(())
    }

    async fn remove_pending_status(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.marker_path(key)).await {
            Ok(()) => {
                tracing::debug!(key, "Redirect flag removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RelayError::Storage(format!("Failed to remove redirect flag: {e}")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_keys_are_independent() {
        let store = MemoryFlagStore::new();
        store.set_pending_status("a:app").await.unwrap();
        assert!(store.get_pending_status("a:app").await.unwrap());
        assert!(!store.get_pending_status("b:app").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(dir.path()).unwrap();
        store.set_pending_status("key:[DEFAULT]").await.unwrap();

        let reopened = FileFlagStore::new(dir.path()).unwrap();
        assert!(reopened.get_pending_status("key:[DEFAULT]").await.unwrap());

        reopened.remove_pending_status("key:[DEFAULT]").await.unwrap();
        assert!(!store.get_pending_status("key:[DEFAULT]").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(dir.path()).unwrap();
        assert!(store.remove_pending_status("never-set").await.is_ok());
    }

    #[tokio::test]
    async fn test_file_store_colliding_names_do_not_alias() {
        let dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(dir.path()).unwrap();
        store.set_pending_status("key:app").await.unwrap();
        // "key_app" sanitizes to the same file name.
        assert!(!store.get_pending_status("key_app").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_marker_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(dir.path()).unwrap();
        std::fs::write(store.marker_path("k"), "not json").unwrap();
        assert!(store.get_pending_status("k").await.is_err());
    }
}
