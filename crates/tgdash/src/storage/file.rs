//! Local filesystem storage implementation.

use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{KeyValueStore, KvError, KvResult};

/// Stores each key as `<base>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    /// Base directory for storage.
    base_path: PathBuf,
}

impl FileKeyValueStore {
    /// Create a new file-backed store rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Map a key to its file, rejecting anything that could escape the base directory.
    fn key_path(&self, key: &str) -> KvResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(KvError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KvError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let path = self.key_path(key)?;
        fs::create_dir_all(&self.base_path).await?;

        // Write to a sibling temp file first so readers never see a torn document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> KvResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KvError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path().join("nested"));

        assert_eq!(store.get("messages").await.unwrap(), None);

        store.set("messages", "[1,2]").await.unwrap();
        assert_eq!(store.get("messages").await.unwrap().as_deref(), Some("[1,2]"));
        assert!(dir.path().join("nested/messages.json").exists());

        store.set("messages", "[]").await.unwrap();
        assert_eq!(store.get("messages").await.unwrap().as_deref(), Some("[]"));

        store.remove("messages").await.unwrap();
        store.remove("messages").await.unwrap();
        assert_eq!(store.get("messages").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path());

        for key in ["", "../secret", "a/b", ".hidden"] {
            assert!(matches!(
                store.set(key, "x").await,
                Err(KvError::InvalidKey(_))
            ));
        }
    }
}
