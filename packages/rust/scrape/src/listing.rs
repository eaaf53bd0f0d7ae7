//! Listing-page traversal: one paginated index page → deduplicated stubs.

use std::collections::HashSet;

use reqwest::Client;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use pubharvest_shared::{HarvestConfig, HarvestError, ItemStub, Result, SelectorsConfig};

use crate::fetch::{self, FetchParams, element_text};

/// Build the URL for a zero-based listing page index.
///
/// The site paginates by item offset: `first = page_index * page_size`,
/// with a fixed sort token on every page.
pub fn page_url(base: &Url, page_index: u32, page_size: u32, sort: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("first", &(page_index * page_size).to_string())
        .append_pair("sort", sort);
    url
}

/// Fetch one listing page and extract its stubs.
///
/// Waits (bounded) for the row selector to settle before scanning, since the
/// listing is rendered client-side and may arrive empty on the first fetch.
#[instrument(skip(client, config))]
pub async fn fetch_page(
    client: &Client,
    config: &HarvestConfig,
    page_index: u32,
) -> Result<Vec<ItemStub>> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| HarvestError::config(format!("invalid base_url '{}': {e}", config.base_url)))?;
    let url = page_url(&base, page_index, config.page_size, &config.sort);
    let params = FetchParams::from(config);

    let body = fetch::fetch_until(client, &url, &config.selectors.listing_row, &params).await?;
    let stubs = extract_stubs(&body, &url, &config.selectors)?;

    debug!(page_index, stubs = stubs.len(), "listing page scanned");
    Ok(stubs)
}

/// Scan a listing page body for item stubs, deduplicated by detail URL.
///
/// Rows without a resolvable detail URL are skipped: a missing key can be
/// neither deduplicated nor visited. Thumbnails are optional.
pub fn extract_stubs(
    html: &str,
    page_url: &Url,
    selectors: &SelectorsConfig,
) -> Result<Vec<ItemStub>> {
    let row_sel = fetch::parse_selector(&selectors.listing_row)?;
    let title_sel = fetch::parse_selector(&selectors.title_link)?;
    let thumb_sel = fetch::parse_selector(&selectors.thumbnail)?;

    let doc = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut stubs = Vec::new();

    for row in doc.select(&row_sel) {
        let Some(link) = row.select(&title_sel).next() else {
            debug!("listing row without title link, skipping");
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            debug!("title link without href, skipping row");
            continue;
        };
        let Ok(detail_url) = page_url.join(href) else {
            debug!(href, "unresolvable detail href, skipping row");
            continue;
        };

        let title = element_text(&link);

        let thumbnail_url = row
            .select(&thumb_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .and_then(|src| page_url.join(src).ok())
            .map(|u| u.to_string());

        // Dedupe within the page, first occurrence wins.
        if seen.insert(detail_url.to_string()) {
            stubs.push(ItemStub {
                title,
                detail_url: detail_url.to_string(),
                thumbnail_url,
            });
        }
    }

    Ok(stubs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubharvest_shared::SelectorsConfig;

    fn listing_html(rows: &str) -> String {
        format!("<html><body>{rows}</body></html>")
    }

    fn row(title: &str, href: &str, img: Option<&str>) -> String {
        let img_tag = img
            .map(|src| format!("<img class=\"coveo-result-image\" src=\"{src}\">"))
            .unwrap_or_default();
        format!(
            "<div class=\"coveo-result-row\">\
             <h4 class=\"coveo-title\"><a href=\"{href}\">{title}</a></h4>{img_tag}</div>"
        )
    }

    fn base() -> Url {
        Url::parse("https://pubs.example.com/publications").unwrap()
    }

    #[test]
    fn page_url_encodes_offset_and_sort() {
        let url = page_url(&base(), 3, 10, "@officialz32xdate descending");
        let query = url.query().unwrap();
        assert!(query.contains("first=30"));
        assert!(query.contains("sort=%40officialz32xdate"));
    }

    #[test]
    fn first_page_has_zero_offset() {
        let url = page_url(&base(), 0, 10, "date");
        assert!(url.query().unwrap().contains("first=0"));
    }

    #[test]
    fn stubs_extracted_with_resolved_urls() {
        let html = listing_html(&format!(
            "{}{}",
            row("Report A", "/pubs/a", Some("/img/a.jpg")),
            row("Report B", "https://pubs.example.com/pubs/b", None),
        ));

        let stubs = extract_stubs(&html, &base(), &SelectorsConfig::default()).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].title, "Report A");
        assert_eq!(stubs[0].detail_url, "https://pubs.example.com/pubs/a");
        assert_eq!(
            stubs[0].thumbnail_url.as_deref(),
            Some("https://pubs.example.com/img/a.jpg")
        );
        assert!(stubs[1].thumbnail_url.is_none());
    }

    #[test]
    fn rows_without_detail_link_are_skipped() {
        let html = listing_html(
            "<div class=\"coveo-result-row\"><h4 class=\"coveo-title\">No link here</h4></div>",
        );
        let stubs = extract_stubs(&html, &base(), &SelectorsConfig::default()).unwrap();
        assert!(stubs.is_empty());
    }

    #[test]
    fn duplicate_detail_urls_collapse_within_page() {
        let html = listing_html(&format!(
            "{}{}{}",
            row("Report A", "/pubs/a", None),
            row("Report A again", "/pubs/a", None),
            row("Report B", "/pubs/b", None),
        ));

        let stubs = extract_stubs(&html, &base(), &SelectorsConfig::default()).unwrap();
        assert_eq!(stubs.len(), 2);
        // First occurrence wins
        assert_eq!(stubs[0].title, "Report A");
    }

    #[tokio::test]
    async fn fetch_page_scans_mock_listing() {
        let server = wiremock::MockServer::start().await;
        let html = listing_html(&row("Report A", "/pubs/a", Some("/img/a.jpg")));

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let mut config = HarvestConfig::from(&pubharvest_shared::AppConfig::default());
        config.base_url = server.uri();
        config.settle_timeout_ms = 200;
        config.settle_poll_ms = 20;

        let client = crate::fetch::build_client().unwrap();
        let stubs = fetch_page(&client, &config, 0).await.unwrap();
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].title, "Report A");
        assert!(stubs[0].detail_url.ends_with("/pubs/a"));
    }
}
