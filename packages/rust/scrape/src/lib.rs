//! Listing-page traversal and detail-page extraction.
//!
//! This crate provides:
//! - [`listing`] — paginated listing fetch, per-page stub extraction
//! - [`detail`] — per-stub summary and document-link extraction
//! - [`fetch`] — retrying HTTP fetches with bounded settle-polling

pub mod detail;
pub mod fetch;
pub mod listing;

pub use detail::extract;
pub use fetch::{FetchParams, build_client};
pub use listing::{extract_stubs, fetch_page, page_url};
