//! Core domain types for the publications harvest.

use serde::{Deserialize, Serialize};

/// Sentinel stored as the summary when neither selector tier matched.
pub const NO_SUMMARY: &str = "No summary found";

/// The key under which the record set is handed between orchestrator steps.
pub const HANDOFF_KEY: &str = "publications_data";

// ---------------------------------------------------------------------------
// ItemStub
// ---------------------------------------------------------------------------

/// A publication discovered on a listing page, before detail extraction.
///
/// Lives for a single page iteration; never persisted. `detail_url` is the
/// dedupe key both within a page and across the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStub {
    /// Title text from the listing row.
    pub title: String,
    /// Absolute URL of the detail page.
    pub detail_url: String,
    /// Absolute URL of the cover thumbnail, when the row carries one.
    pub thumbnail_url: Option<String>,
}

// ---------------------------------------------------------------------------
// DetailContent
// ---------------------------------------------------------------------------

/// What detail-page extraction yields for one stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailContent {
    /// Space-joined paragraph text, or [`NO_SUMMARY`] when nothing matched.
    pub summary: String,
    /// Absolute URL of the primary downloadable document, when present.
    pub document_url: Option<String>,
}

// ---------------------------------------------------------------------------
// PublicationRecord
// ---------------------------------------------------------------------------

/// The assembled unit persisted to the warehouse.
///
/// `document_ref`/`image_ref` are asset-store reference URLs, `None` when the
/// source had no asset or its transfer failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// RecordHandoff
// ---------------------------------------------------------------------------

/// Serializable envelope exchanged between the scrape and load steps.
///
/// The field name doubles as the handoff key ([`HANDOFF_KEY`]) so the JSON
/// file is self-describing to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHandoff {
    pub publications_data: Vec<PublicationRecord>,
}

impl RecordHandoff {
    pub fn new(records: Vec<PublicationRecord>) -> Self {
        Self {
            publications_data: records,
        }
    }
}
