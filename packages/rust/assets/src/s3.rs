//! S3-backed asset store.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use url::Url;

use pubharvest_shared::{AssetStoreConfig, HarvestError, Result};

use crate::AssetStore;

/// Asset store backed by an S3 (or S3-compatible) bucket.
///
/// Credentials come from the ambient provider chain (env vars, profile,
/// instance role); the config carries only bucket, region, and an optional
/// custom endpoint.
#[derive(Clone)]
pub struct S3AssetStore {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3AssetStore {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn new(cfg: &AssetStoreConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()));

        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let s3_cfg = aws_sdk_s3::Config::from(&shared);

        Ok(Self {
            client: Client::from_conf(s3_cfg),
            bucket: cfg.bucket.clone(),
            endpoint: cfg.endpoint.clone(),
        })
    }

    /// Public reference URL for a stored key. The key is the canonical
    /// storage key; URL parsing percent-encodes it for the wire.
    fn reference_url(&self, key: &str) -> Result<String> {
        let raw = match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.amazonaws.com/{key}", self.bucket),
        };
        let url = Url::parse(&raw)
            .map_err(|e| HarvestError::Assets(format!("reference URL for '{key}': {e}")))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        crate::validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| HarvestError::Assets(format!("s3 put_object '{key}': {e}")))?;
        self.reference_url(key)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        crate::validate_key(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                // Normalize not-found to None.
                let msg = e.to_string();
                if msg.contains("NoSuchKey") || msg.contains("NotFound") {
                    return Ok(None);
                }
                return Err(HarvestError::Assets(format!("s3 get_object '{key}': {e}")));
            }
        };

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| HarvestError::Assets(format!("s3 collect body '{key}': {e}")))?
            .into_bytes();
        Ok(Some(data))
    }
}
