//! Asset store client: downloads source binaries and uploads them under
//! deterministic keys, yielding retrievable reference URLs.
//!
//! One canonical key function ([`asset_key`]) is used both for storage and
//! for building the reference URL, so references never dangle. Implementations:
//! [`S3AssetStore`] for real runs, [`MemoryAssetStore`] for tests.

mod s3;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::warn;
use url::Url;

use pubharvest_shared::{HarvestError, Result};

pub use s3::S3AssetStore;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Kind of binary asset, which picks the key namespace and extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Pdf,
    Image,
}

impl AssetKind {
    fn dir(self) -> &'static str {
        match self {
            Self::Pdf => "pdfs",
            Self::Image => "images",
        }
    }

    fn ext(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "jpg",
        }
    }
}

/// Replace path-hostile characters in a title so it can serve as a key segment.
pub fn sanitize_title(title: &str) -> String {
    title.trim().replace(['/', '\\'], "_")
}

/// The canonical storage key for an asset: `{prefix}/{kind}/{title}.{ext}`.
///
/// Every caller building a key or a reference URL goes through here, so the
/// stored object and its reference always agree.
pub fn asset_key(prefix: &str, kind: AssetKind, title: &str) -> String {
    format!(
        "{}/{}/{}.{}",
        prefix.trim_matches('/'),
        kind.dir(),
        sanitize_title(title),
        kind.ext()
    )
}

/// Reject keys that would escape or mangle the bucket namespace.
fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(HarvestError::Assets("asset key is empty".into()));
    }
    if key.starts_with('/') {
        return Err(HarvestError::Assets(
            "asset key must not start with '/'".into(),
        ));
    }
    if key.contains('\\') {
        return Err(HarvestError::Assets("asset key must not contain '\\'".into()));
    }
    if key.split('/').any(|seg| seg == "..") {
        return Err(HarvestError::Assets(
            "asset key must not contain '..' segments".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AssetStore
// ---------------------------------------------------------------------------

/// Object storage for harvested binaries.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `data` under `key`, returning the retrievable reference URL.
    async fn put(&self, key: &str, data: Bytes) -> Result<String>;

    /// Fetch the bytes stored under `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
}

/// In-memory asset store for tests and dry runs.
///
/// References take the form `{root}/{key}` with the key verbatim.
pub struct MemoryAssetStore {
    root: String,
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryAssetStore {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("asset store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<String> {
        validate_key(key)?;
        self.objects
            .lock()
            .expect("asset store lock")
            .insert(key.to_string(), data);
        Ok(format!("{}/{key}", self.root))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        validate_key(key)?;
        Ok(self
            .objects
            .lock()
            .expect("asset store lock")
            .get(key)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Fetch a source asset. Success is strictly HTTP 200; anything else — or a
/// transport failure — is logged and yields `None` so the record proceeds
/// without the asset.
pub async fn download(client: &Client, url: &str) -> Option<Bytes> {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            warn!(url, error = %e, "asset URL unparseable, skipping download");
            return None;
        }
    };

    match client.get(parsed).send().await {
        Ok(response) if response.status() == StatusCode::OK => match response.bytes().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(url, error = %e, "asset body read failed");
                None
            }
        },
        Ok(response) => {
            warn!(url, status = %response.status(), "asset download refused");
            None
        }
        Err(e) => {
            warn!(url, error = %e, "asset download failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_keys_are_namespaced_by_kind() {
        assert_eq!(
            asset_key("staging", AssetKind::Pdf, "Report A"),
            "staging/pdfs/Report A.pdf"
        );
        assert_eq!(
            asset_key("staging", AssetKind::Image, "Report A"),
            "staging/images/Report A.jpg"
        );
    }

    #[test]
    fn titles_with_slashes_are_sanitized() {
        let key = asset_key("staging", AssetKind::Pdf, "Risk/Return 2024");
        assert_eq!(key, "staging/pdfs/Risk_Return 2024.pdf");
    }

    #[test]
    fn hostile_keys_are_rejected() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/absolute").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("staging/pdfs/ok.pdf").is_ok());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryAssetStore::new("mem://assets");
        let payload = Bytes::from_static(b"%PDF-1.4 payload");
        let key = asset_key("staging", AssetKind::Pdf, "Report A");

        let reference = store.put(&key, payload.clone()).await.unwrap();
        assert_eq!(reference, "mem://assets/staging/pdfs/Report A.pdf");

        // Resolving the reference back to its key re-fetches the same bytes
        let fetched_key = reference.strip_prefix("mem://assets/").unwrap();
        let fetched = store.get(fetched_key).await.unwrap().unwrap();
        assert_eq!(fetched, payload);
    }

    #[tokio::test]
    async fn memory_store_miss_is_none() {
        let store = MemoryAssetStore::new("mem://assets");
        assert!(store.get("staging/pdfs/none.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn download_ok_returns_bytes() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_bytes(b"binary".to_vec()),
            )
            .mount(&server)
            .await;

        let client = Client::new();
        let bytes = download(&client, &server.uri()).await.unwrap();
        assert_eq!(&bytes[..], b"binary");
    }

    #[tokio::test]
    async fn download_404_is_none() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        assert!(download(&client, &server.uri()).await.is_none());
    }

    #[tokio::test]
    async fn download_bad_url_is_none() {
        let client = Client::new();
        assert!(download(&client, "not a url").await.is_none());
    }
}
