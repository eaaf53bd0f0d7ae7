//! Application configuration for pubharvest.
//!
//! User config lives at `~/.pubharvest/pubharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pubharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pubharvest";

// ---------------------------------------------------------------------------
// Config structs (matching pubharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listing site and pagination settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// CSS selectors for listing and detail extraction.
    #[serde(default)]
    pub selectors: SelectorsConfig,

    /// Object store settings for downloaded assets.
    #[serde(default)]
    pub assets: AssetStoreConfig,

    /// Warehouse connection settings.
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

/// `[source]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the paginated publications listing.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Number of listing pages to visit.
    #[serde(default = "default_page_count")]
    pub page_count: u32,

    /// Items per listing page (drives the `first` offset parameter).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Sort order token appended to every page URL (query-encoded on use).
    #[serde(default = "default_sort")]
    pub sort: String,

    /// Upper bound in ms for waiting on a selector to settle.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Poll interval in ms between settle re-fetches.
    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,

    /// HTTP fetch attempts per URL before giving up.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    /// Base backoff in ms between fetch attempts (doubles per retry).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_count: default_page_count(),
            page_size: default_page_size(),
            sort: default_sort(),
            settle_timeout_ms: default_settle_timeout_ms(),
            settle_poll_ms: default_settle_poll_ms(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://rpc.cfainstitute.org/en/research-foundation/publications".into()
}
fn default_page_count() -> u32 {
    10
}
fn default_page_size() -> u32 {
    10
}
fn default_sort() -> String {
    "@officialz32xdate descending".into()
}
fn default_settle_timeout_ms() -> u64 {
    10_000
}
fn default_settle_poll_ms() -> u64 {
    500
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

/// `[selectors]` section. Defaults match the target site's Coveo markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorsConfig {
    /// One listing row per publication.
    #[serde(default = "default_listing_row")]
    pub listing_row: String,

    /// Title link inside a listing row (text + href).
    #[serde(default = "default_title_link")]
    pub title_link: String,

    /// Thumbnail image inside a listing row.
    #[serde(default = "default_thumbnail")]
    pub thumbnail: String,

    /// Primary summary paragraphs on a detail page.
    #[serde(default = "default_summary_primary")]
    pub summary_primary: String,

    /// Generic fallback paragraphs when the primary selector yields nothing.
    #[serde(default = "default_summary_fallback")]
    pub summary_fallback: String,

    /// Primary content-asset (PDF) link on a detail page.
    #[serde(default = "default_document_link")]
    pub document_link: String,
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            listing_row: default_listing_row(),
            title_link: default_title_link(),
            thumbnail: default_thumbnail(),
            summary_primary: default_summary_primary(),
            summary_fallback: default_summary_fallback(),
            document_link: default_document_link(),
        }
    }
}

fn default_listing_row() -> String {
    "div.coveo-result-row".into()
}
fn default_title_link() -> String {
    "h4.coveo-title a".into()
}
fn default_thumbnail() -> String {
    "img.coveo-result-image".into()
}
fn default_summary_primary() -> String {
    "div.article__paragraph p".into()
}
fn default_summary_fallback() -> String {
    "div p".into()
}
fn default_document_link() -> String {
    "a.content-asset.content-asset--primary".into()
}

/// `[assets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetStoreConfig {
    /// Target bucket for uploaded assets.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Bucket region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (S3-compatible stores, integration tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Key namespace prefix under which assets land.
    #[serde(default = "default_asset_prefix")]
    pub prefix: String,
}

impl Default for AssetStoreConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            prefix: default_asset_prefix(),
        }
    }
}

fn default_bucket() -> String {
    "pubharvest-staging".into()
}
fn default_region() -> String {
    "us-east-1".into()
}
fn default_asset_prefix() -> String {
    "staging".into()
}

/// `[warehouse]` section.
///
/// The option block `{user, password, account, warehouse, database, schema,
/// role}` is recognized and carried through to the connection layer as-is;
/// pubharvest does not validate combinations. Secrets belong in the
/// orchestrator's environment, not in this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Local database path (used when `url` is unset).
    #[serde(default = "default_warehouse_path")]
    pub path: String,

    /// Remote database URL, when the warehouse is not local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the auth token (never the token itself).
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
            url: None,
            auth_token_env: default_auth_token_env(),
            user: None,
            password: None,
            account: None,
            warehouse: None,
            database: None,
            schema: None,
            role: None,
        }
    }
}

fn default_warehouse_path() -> String {
    "var/warehouse.db".into()
}
fn default_auth_token_env() -> String {
    "PUBHARVEST_DB_TOKEN".into()
}

// ---------------------------------------------------------------------------
// Harvest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime harvest configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Base URL of the paginated listing.
    pub base_url: String,
    /// Number of listing pages to visit.
    pub page_count: u32,
    /// Items per page (drives the `first` offset).
    pub page_size: u32,
    /// Sort order token.
    pub sort: String,
    /// Settle-wait upper bound in ms.
    pub settle_timeout_ms: u64,
    /// Settle poll interval in ms.
    pub settle_poll_ms: u64,
    /// HTTP fetch attempts per URL.
    pub fetch_attempts: u32,
    /// Base retry backoff in ms.
    pub retry_backoff_ms: u64,
    /// Extraction selectors.
    pub selectors: SelectorsConfig,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.source.base_url.clone(),
            page_count: config.source.page_count,
            page_size: config.source.page_size,
            sort: config.source.sort.clone(),
            settle_timeout_ms: config.source.settle_timeout_ms,
            settle_poll_ms: config.source.settle_poll_ms,
            fetch_attempts: config.source.fetch_attempts,
            retry_backoff_ms: config.source.retry_backoff_ms,
            selectors: config.selectors.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pubharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pubharvest/pubharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Validate the parts of the config the pipeline depends on up front.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    Url::parse(&config.source.base_url).map_err(|e| {
        HarvestError::config(format!(
            "invalid source.base_url '{}': {e}",
            config.source.base_url
        ))
    })?;

    if config.source.page_size == 0 {
        return Err(HarvestError::config("source.page_size must be non-zero"));
    }
    if config.assets.bucket.trim().is_empty() {
        return Err(HarvestError::config("assets.bucket must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("coveo-result-row"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.source.page_count, 10);
        assert_eq!(parsed.source.page_size, 10);
        assert_eq!(parsed.warehouse.auth_token_env, "PUBHARVEST_DB_TOKEN");
    }

    #[test]
    fn warehouse_options_pass_through() {
        let toml_str = r#"
[warehouse]
path = "/tmp/wh.db"
user = "loader"
account = "acme-analytics"
database = "RESEARCH"
schema = "STAGING"
role = "LOADER_ROLE"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.warehouse.user.as_deref(), Some("loader"));
        assert_eq!(config.warehouse.schema.as_deref(), Some("STAGING"));
        assert!(config.warehouse.password.is_none());
    }

    #[test]
    fn harvest_config_from_app_config() {
        let app = AppConfig::default();
        let harvest = HarvestConfig::from(&app);
        assert_eq!(harvest.page_count, 10);
        assert_eq!(harvest.fetch_attempts, 3);
        assert_eq!(harvest.selectors.title_link, "h4.coveo-title a");
    }

    #[test]
    fn validation_rejects_bad_base_url() {
        let mut config = AppConfig::default();
        config.source.base_url = "not a url".into();
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("base_url"));
    }

    #[test]
    fn validation_rejects_zero_page_size() {
        let mut config = AppConfig::default();
        config.source.page_size = 0;
        assert!(validate_config(&config).is_err());
    }
}
