//! Shared types, error model, and configuration for pubharvest.
//!
//! This crate is the foundation depended on by all other pubharvest crates.
//! It provides:
//! - [`HarvestError`] — the unified error type
//! - Domain types ([`ItemStub`], [`DetailContent`], [`PublicationRecord`])
//! - Configuration ([`AppConfig`], [`HarvestConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssetStoreConfig, HarvestConfig, SelectorsConfig, SourceConfig, WarehouseConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{HarvestError, Result};
pub use types::{
    DetailContent, HANDOFF_KEY, ItemStub, NO_SUMMARY, PublicationRecord, RecordHandoff,
};
