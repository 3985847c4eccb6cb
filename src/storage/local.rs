//! Filesystem-backed object store.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

use super::{ObjectStore, StorageError, StoredObject};

pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, public_base_url: String) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a key below the root, refusing `..` and absolute paths
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<StoredObject, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url, key),
            key: Some(key.to_string()),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Backend(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://x".to_string()).unwrap();
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("/etc/passwd").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("catalog/a.png").is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://x".to_string()).unwrap();
        store.delete("nothing/here.png").await.unwrap();
    }
}
