//! HTTP fetching with bounded retry and settle-polling.
//!
//! The listing site renders its rows client-side, so a freshly served page
//! may not contain the content of interest yet. Instead of a fixed sleep,
//! [`fetch_until`] re-fetches under a bounded deadline until a probe
//! selector matches, and gives back the last body either way.

use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use pubharvest_shared::{HarvestConfig, HarvestError, Result};

/// User-Agent string for harvest requests.
pub const USER_AGENT: &str = concat!("pubharvest/", env!("CARGO_PKG_VERSION"));

/// Retry and settle bounds, lifted out of [`HarvestConfig`].
#[derive(Debug, Clone, Copy)]
pub struct FetchParams {
    /// Fetch attempts per URL before the fetch fails.
    pub attempts: u32,
    /// Base backoff between attempts (doubles per retry).
    pub backoff: Duration,
    /// Upper bound on settle-polling per page load.
    pub settle_timeout: Duration,
    /// Interval between settle re-fetches.
    pub settle_poll: Duration,
}

impl From<&HarvestConfig> for FetchParams {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            attempts: config.fetch_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            settle_timeout: Duration::from_millis(config.settle_timeout_ms),
            settle_poll: Duration::from_millis(config.settle_poll_ms),
        }
    }
}

/// Build the HTTP client used for a harvest run.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))
}

/// Parse a CSS selector from config, mapping failures to a parse error.
pub fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| HarvestError::parse(format!("invalid selector '{css}': {e}")))
}

/// GET a URL, retrying transport errors and 5xx responses with backoff.
///
/// Client errors (4xx) are not retried; the page will not get better.
pub async fn get_with_retry(client: &Client, url: &Url, params: &FetchParams) -> Result<String> {
    let mut backoff = params.backoff;
    let mut last_err = String::new();

    for attempt in 1..=params.attempts {
        match client.get(url.as_str()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .text()
                        .await
                        .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")));
                }
                if status.is_server_error() {
                    last_err = format!("{url}: HTTP {status}");
                } else {
                    return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
                }
            }
            Err(e) => {
                last_err = format!("{url}: {e}");
            }
        }

        if attempt < params.attempts {
            debug!(%url, attempt, backoff_ms = backoff.as_millis() as u64, "retrying fetch");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    Err(HarvestError::Network(last_err))
}

/// Fetch `url` until `probe_css` matches at least one element or the settle
/// timeout elapses. Returns the last fetched body either way; the caller
/// decides what an unsettled page means.
pub async fn fetch_until(
    client: &Client,
    url: &Url,
    probe_css: &str,
    params: &FetchParams,
) -> Result<String> {
    let probe = parse_selector(probe_css)?;
    let deadline = Instant::now() + params.settle_timeout;

    loop {
        let body = get_with_retry(client, url, params).await?;

        // Scoped so the non-Send document never lives across an await.
        let matched = {
            let doc = Html::parse_document(&body);
            doc.select(&probe).next().is_some()
        };

        if matched {
            return Ok(body);
        }
        if Instant::now() >= deadline {
            warn!(%url, probe = probe_css, "selector did not settle within timeout");
            return Ok(body);
        }

        tokio::time::sleep(params.settle_poll).await;
    }
}

/// Collect an element's text content, trimmed.
pub fn element_text(el: &scraper::ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_params() -> FetchParams {
        FetchParams {
            attempts: 3,
            backoff: Duration::from_millis(10),
            settle_timeout: Duration::from_millis(200),
            settle_poll: Duration::from_millis(20),
        }
    }

    #[test]
    fn selector_parse_errors_are_reported() {
        let err = parse_selector("div[").unwrap_err();
        assert!(err.to_string().contains("div["));
    }

    #[tokio::test]
    async fn retry_recovers_from_server_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let body = get_with_retry(&client, &url, &quick_params()).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = get_with_retry(&client, &url, &quick_params())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn fetch_until_returns_once_probe_matches() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<html><body><div class=\"row\">x</div></body></html>"),
            )
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let body = fetch_until(&client, &url, "div.row", &quick_params())
            .await
            .unwrap();
        assert!(body.contains("row"));
    }

    #[tokio::test]
    async fn fetch_until_gives_up_at_deadline() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_string("<html><body></body></html>"),
            )
            .mount(&server)
            .await;

        let client = build_client().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        // Never matches; should still come back with the last body.
        let body = fetch_until(&client, &url, "div.never", &quick_params())
            .await
            .unwrap();
        assert!(body.contains("body"));
    }
}
