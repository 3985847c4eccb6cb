//! S3 (or S3-compatible) object store.

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{ObjectStore, StorageError, StoredObject};
use crate::config::StorageConfig;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.bucket is required for the s3 backend")?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "sybertailor-config",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url, key),
            key: Some(key.to_string()),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
