//! Detail-page extraction: long-form summary and document link per stub.

use reqwest::Client;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use pubharvest_shared::{
    DetailContent, HarvestConfig, HarvestError, ItemStub, NO_SUMMARY, Result, SelectorsConfig,
};

use crate::fetch::{self, FetchParams, element_text};

/// Extract summary and document URL from a stub's detail page.
///
/// Summary extraction is two-tier: wait (bounded) for the primary
/// content-paragraph selector; if it never settles, give the generic
/// fallback selector the same bounded wait. Selector misses degrade to the
/// [`NO_SUMMARY`] sentinel or an absent document URL — they are never errors.
#[instrument(skip(client, config), fields(url = %stub.detail_url))]
pub async fn extract(
    client: &Client,
    config: &HarvestConfig,
    stub: &ItemStub,
) -> Result<DetailContent> {
    let url = Url::parse(&stub.detail_url)
        .map_err(|e| HarvestError::parse(format!("invalid detail URL '{}': {e}", stub.detail_url)))?;
    let params = FetchParams::from(config);
    let selectors = &config.selectors;

    let mut body =
        fetch::fetch_until(client, &url, &selectors.summary_primary, &params).await?;
    let mut summary = joined_paragraphs(&body, &selectors.summary_primary)?;

    if summary.is_none() {
        debug!(%url, "primary summary selector empty, trying fallback");
        body = fetch::fetch_until(client, &url, &selectors.summary_fallback, &params).await?;
        summary = joined_paragraphs(&body, &selectors.summary_fallback)?;
    }

    let document_url = document_link(&body, &selectors.document_link, &url)?;

    Ok(DetailContent {
        summary: summary.unwrap_or_else(|| NO_SUMMARY.to_string()),
        document_url,
    })
}

/// Join all non-empty matching paragraphs with single spaces, normalizing
/// no-break spaces. `None` when the selector matched nothing usable.
fn joined_paragraphs(html: &str, css: &str) -> Result<Option<String>> {
    let sel = fetch::parse_selector(css)?;
    let doc = Html::parse_document(html);

    let parts: Vec<String> = doc
        .select(&sel)
        .map(|p| element_text(&p))
        .filter(|t| !t.is_empty())
        .collect();

    if parts.is_empty() {
        return Ok(None);
    }

    let joined = parts.join(" ").replace('\u{a0}', " ");
    Ok(Some(joined.trim().to_string()))
}

/// Pull the primary content-asset link, resolved absolute, when present.
fn document_link(html: &str, css: &str, base: &Url) -> Result<Option<String>> {
    let sel = fetch::parse_selector(css)?;
    let doc = Html::parse_document(html);

    Ok(doc
        .select(&sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .map(|u| u.to_string()))
}
