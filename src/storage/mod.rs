//! Object storage for catalog images and measurement photos.
//!
//! Clients upload images inline as `data:<mime>;base64,<payload>` strings.
//! [`store_image`] decodes them, checks type and size, and hands the bytes to
//! the configured [`ObjectStore`]. Plain http(s) URLs are kept as they are.

mod local;
mod s3;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, StorageBackend};

/// Image types accepted for upload
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Image must be a base64 data URL or an http(s) URL")]
    InvalidDataUrl,
    #[error("Unsupported image type '{0}'. Allowed: png, jpeg, webp")]
    UnsupportedType(String),
    #[error("Image is {size} bytes, larger than the {max} byte limit")]
    TooLarge { size: usize, max: usize },
    #[error("Object storage failure: {0}")]
    Backend(String),
}

/// Where an uploaded object ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Public URL of the object
    pub url: String,
    /// Backend key, needed to delete the object later. `None` for external URLs.
    pub key: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

/// A decoded `data:` URL
#[derive(Debug, Clone, PartialEq)]
pub struct DataUrl {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Decode `data:<mime>;base64,<payload>`
pub fn parse_data_url(input: &str) -> Result<DataUrl, StorageError> {
    let rest = input.strip_prefix("data:").ok_or(StorageError::InvalidDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(StorageError::InvalidDataUrl)?;
    let content_type = meta
        .strip_suffix(";base64")
        .ok_or(StorageError::InvalidDataUrl)?
        .trim()
        .to_lowercase();
    if content_type.is_empty() {
        return Err(StorageError::InvalidDataUrl);
    }

    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| StorageError::InvalidDataUrl)?;

    Ok(DataUrl { content_type, data })
}

fn is_remote_url(input: &str) -> bool {
    input.starts_with("https://") || input.starts_with("http://")
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        _ => mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}

/// Upload an image given as a data URL, or pass an http(s) URL through.
///
/// Objects are stored as `{folder}/{uuid}.{ext}`.
pub async fn store_image(
    store: &dyn ObjectStore,
    input: &str,
    folder: &str,
    max_bytes: usize,
) -> Result<StoredObject, StorageError> {
    let input = input.trim();
    if is_remote_url(input) {
        return Ok(StoredObject {
            url: input.to_string(),
            key: None,
        });
    }

    let decoded = parse_data_url(input)?;
    if !ALLOWED_IMAGE_TYPES.contains(&decoded.content_type.as_str()) {
        return Err(StorageError::UnsupportedType(decoded.content_type));
    }
    if decoded.data.len() > max_bytes {
        return Err(StorageError::TooLarge {
            size: decoded.data.len(),
            max: max_bytes,
        });
    }

    let key = format!(
        "{}/{}.{}",
        folder.trim_matches('/'),
        uuid::Uuid::new_v4(),
        extension_for(&decoded.content_type)
    );
    let stored = store
        .put(&key, Bytes::from(decoded.data), &decoded.content_type)
        .await?;

    tracing::debug!(key = %key, backend = store.name(), "Image stored");
    Ok(stored)
}

/// Best-effort removal of a stored object; failures are only logged
pub async fn discard_object(store: &dyn ObjectStore, key: Option<&str>) {
    let Some(key) = key else {
        return;
    };
    if let Err(e) = store.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Failed to delete stored object");
    }
}

/// Build the object store selected by `[storage]`
pub async fn from_config(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage.backend {
        StorageBackend::Local => {
            let store = LocalObjectStore::new(
                config.uploads_dir(),
                config.storage.public_base_url.clone(),
            )?;
            Ok(Arc::new(store))
        }
        StorageBackend::S3 => Ok(Arc::new(S3ObjectStore::from_config(&config.storage).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL_PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    #[test]
    fn test_parse_data_url() {
        let parsed = parse_data_url(PIXEL_PNG).unwrap();
        assert_eq!(parsed.content_type, "image/png");
        assert_eq!(parsed.data, vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn test_parse_data_url_rejects_garbage() {
        assert!(matches!(parse_data_url("hello"), Err(StorageError::InvalidDataUrl)));
        assert!(matches!(
            parse_data_url("data:image/png,plain"),
            Err(StorageError::InvalidDataUrl)
        ));
        assert!(matches!(
            parse_data_url("data:image/png;base64,@@@"),
            Err(StorageError::InvalidDataUrl)
        ));
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
    }

    #[tokio::test]
    async fn test_store_image_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://cdn.test/".to_string()).unwrap();

        let stored = store_image(&store, PIXEL_PNG, "catalog/styles", 1024).await.unwrap();
        let key = stored.key.clone().unwrap();
        assert!(key.starts_with("catalog/styles/"));
        assert!(key.ends_with(".png"));
        assert_eq!(stored.url, format!("http://cdn.test/{}", key));
        assert!(dir.path().join(&key).exists());

        discard_object(&store, Some(&key)).await;
        assert!(!dir.path().join(&key).exists());
    }

    #[tokio::test]
    async fn test_store_image_passes_remote_urls_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://cdn.test".to_string()).unwrap();

        let stored = store_image(&store, "https://img.example.com/a.png", "x", 10).await.unwrap();
        assert_eq!(stored.url, "https://img.example.com/a.png");
        assert_eq!(stored.key, None);
    }

    #[tokio::test]
    async fn test_store_image_limits() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf(), "http://cdn.test".to_string()).unwrap();

        let too_big = store_image(&store, PIXEL_PNG, "x", 4).await;
        assert!(matches!(too_big, Err(StorageError::TooLarge { size: 8, max: 4 })));

        let gif = store_image(&store, "data:image/gif;base64,R0lGODlh", "x", 1024).await;
        assert!(matches!(gif, Err(StorageError::UnsupportedType(t)) if t == "image/gif"));
    }
}
