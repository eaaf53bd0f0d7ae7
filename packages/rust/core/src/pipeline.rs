//! Sequential harvest pipeline: listing pages → detail extraction → asset
//! transfer → accumulated record set.
//!
//! The coordinator owns the HTTP client for the run and the run-global
//! dedupe set keyed by detail URL. Execution is strictly sequential: one
//! page, one item, one asset transfer at a time.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use pubharvest_assets::{AssetKind, AssetStore, asset_key};
use pubharvest_scrape::{detail, fetch, listing};
use pubharvest_shared::{HarvestConfig, HarvestError, ItemStub, PublicationRecord, Result};

// ---------------------------------------------------------------------------
// HarvestOutcome
// ---------------------------------------------------------------------------

/// Summary of a completed harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    /// Assembled records, one per distinct detail URL.
    pub records: Vec<PublicationRecord>,
    /// Listing pages visited (including ones that yielded nothing).
    pub pages_visited: u32,
    /// Items skipped (already seen, or failed after retries).
    pub items_skipped: usize,
    /// Non-fatal failures encountered (URL or page label, error message).
    pub errors: Vec<(String, String)>,
    /// Total duration of the run.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after a listing page has been scanned.
    fn page_scanned(&self, page_index: u32, stubs: usize);
    /// Called when an item's record has been assembled.
    fn item_harvested(&self, title: &str, total: usize);
    /// Called when the run completes.
    fn done(&self, outcome: &HarvestOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_scanned(&self, _page_index: u32, _stubs: usize) {}
    fn item_harvested(&self, _title: &str, _total: usize) {}
    fn done(&self, _outcome: &HarvestOutcome) {}
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Sequential harvest coordinator.
///
/// Owns the HTTP client for the duration of the run; dropping the harvester
/// releases it on every exit path.
pub struct Harvester {
    config: HarvestConfig,
    asset_prefix: String,
    client: Client,
}

impl Harvester {
    /// Create a harvester for the given configuration.
    pub fn new(config: HarvestConfig, asset_prefix: impl Into<String>) -> Result<Self> {
        let client = fetch::build_client()?;
        Ok(Self {
            config,
            asset_prefix: asset_prefix.into(),
            client,
        })
    }

    /// Run the harvest: visit every configured listing page, extract details
    /// for stubs not yet seen this run, transfer assets, and accumulate the
    /// deduplicated record set.
    ///
    /// Cancellation is honored between pages and between items; a cancelled
    /// run returns [`HarvestError::Cancelled`] rather than a partial set.
    #[instrument(skip_all, fields(base_url = %self.config.base_url, pages = self.config.page_count))]
    pub async fn run(
        &self,
        store: &dyn AssetStore,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<HarvestOutcome> {
        let start = Instant::now();

        // Run-global dedupe set, keyed by detail URL
        let mut seen: HashSet<String> = HashSet::new();
        let mut records: Vec<PublicationRecord> = Vec::new();
        let mut errors: Vec<(String, String)> = Vec::new();
        let mut items_skipped: usize = 0;
        let mut pages_visited: u32 = 0;

        info!(
            page_count = self.config.page_count,
            page_size = self.config.page_size,
            "starting harvest"
        );

        for page_index in 0..self.config.page_count {
            if cancel.is_cancelled() {
                info!(page_index, "harvest cancelled between pages");
                return Err(HarvestError::Cancelled);
            }

            progress.phase(&format!("Scanning listing page {}", page_index + 1));

            let stubs = match listing::fetch_page(&self.client, &self.config, page_index).await {
                Ok(stubs) => stubs,
                Err(e) => {
                    warn!(page_index, error = %e, "listing page failed, skipping");
                    errors.push((format!("page {page_index}"), e.to_string()));
                    pages_visited += 1;
                    continue;
                }
            };

            pages_visited += 1;
            progress.page_scanned(page_index, stubs.len());

            for stub in stubs {
                if cancel.is_cancelled() {
                    info!(page_index, "harvest cancelled between items");
                    return Err(HarvestError::Cancelled);
                }

                if !seen.insert(stub.detail_url.clone()) {
                    items_skipped += 1;
                    continue;
                }

                match self.process_item(store, &stub).await {
                    Ok(record) => {
                        progress.item_harvested(&record.title, records.len() + 1);
                        records.push(record);
                    }
                    Err(e) => {
                        warn!(url = %stub.detail_url, error = %e, "item failed, skipping");
                        errors.push((stub.detail_url.clone(), e.to_string()));
                        items_skipped += 1;
                    }
                }
            }
        }

        let outcome = HarvestOutcome {
            records,
            pages_visited,
            items_skipped,
            errors,
            duration: start.elapsed(),
        };

        progress.done(&outcome);

        info!(
            records = outcome.records.len(),
            pages_visited = outcome.pages_visited,
            items_skipped = outcome.items_skipped,
            errors = outcome.errors.len(),
            duration_ms = outcome.duration.as_millis() as u64,
            "harvest complete"
        );

        Ok(outcome)
    }

    /// Extract one stub's detail page and transfer its assets.
    async fn process_item(
        &self,
        store: &dyn AssetStore,
        stub: &ItemStub,
    ) -> Result<PublicationRecord> {
        let content = detail::extract(&self.client, &self.config, stub).await?;

        let document_ref = match &content.document_url {
            Some(url) => self.transfer(store, url, AssetKind::Pdf, &stub.title).await,
            None => None,
        };

        let image_ref = match &stub.thumbnail_url {
            Some(url) => self.transfer(store, url, AssetKind::Image, &stub.title).await,
            None => None,
        };

        Ok(PublicationRecord {
            title: stub.title.clone(),
            summary: content.summary,
            document_ref,
            image_ref,
        })
    }

    /// Download a source asset and upload it under its canonical key.
    /// Transfer failures degrade to "no asset"; the item still proceeds.
    async fn transfer(
        &self,
        store: &dyn AssetStore,
        source_url: &str,
        kind: AssetKind,
        title: &str,
    ) -> Option<String> {
        let bytes = pubharvest_assets::download(&self.client, source_url).await?;
        let key = asset_key(&self.asset_prefix, kind, title);

        match store.put(&key, bytes).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!(source_url, key, error = %e, "asset upload failed");
                None
            }
        }
    }
}
