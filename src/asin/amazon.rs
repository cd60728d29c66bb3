//! Amazon scrape adapters: ISBN redirect probe and search result scrape.
//!
//! Both adapters speak plain HTTPS against a marketplace host, carry a
//! rotating browser-like User-Agent, and feed server Retry-After hints back
//! into the shared governor.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response};
use tracing::{debug, instrument, warn};

use crate::user_agent::random_user_agent;

use super::governor::{RateGovernor, normalize_host, parse_retry_after};
use super::http_client::build_source_http_client;
use super::{Asin, SourceAdapter, SourceError, SourceId, SourceQuery, clean_isbn};

/// ASIN embedded in a product URL path, e.g. `/dp/B00ZVA3XL6`.
static DP_ASIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/dp/(B[A-Z0-9]{9})")
        .unwrap_or_else(|e| panic!("invalid dp-path regex: {e}"))
});

/// `data-asin` attribute on a search result element.
static DATA_ASIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-asin\s*=\s*["'](B[A-Z0-9]{9})["']"#)
        .unwrap_or_else(|e| panic!("invalid data-asin regex: {e}"))
});

/// Builds the base URL for a marketplace, honoring a test override.
fn marketplace_base(base_override: Option<&str>, marketplace: &str) -> String {
    match base_override {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => format!("https://www.{marketplace}"),
    }
}

/// Feeds a 429/503 Retry-After hint back into the governor.
fn record_server_backoff(governor: &RateGovernor, host: &str, response: &Response) {
    if !matches!(response.status().as_u16(), 429 | 503) {
        return;
    }
    let Some(retry_after) = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
    else {
        return;
    };
    warn!(host, delay_secs = retry_after.as_secs(), "server requested backoff");
    governor.record_rate_limit(host, retry_after);
}

/// Resolves an ISBN by following Amazon's `/dp/<isbn>` redirect and scraping
/// the ASIN out of the final URL.
///
/// Uses no query or parsing state beyond the final URL itself.
pub struct IsbnDirectAdapter {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: Option<String>,
}

impl IsbnDirectAdapter {
    /// Creates the adapter against the real `amazon.com` host.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(governor: Arc<RateGovernor>) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client()?,
            governor,
            base_url: None,
        })
    }

    /// Creates the adapter with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn with_base_url(
        governor: Arc<RateGovernor>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client()?,
            governor,
            base_url: Some(base_url.into()),
        })
    }
}

impl std::fmt::Debug for IsbnDirectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsbnDirectAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for IsbnDirectAdapter {
    fn id(&self) -> SourceId {
        SourceId::IsbnDirect
    }

    #[instrument(skip(self, query), fields(isbn = query.isbn))]
    async fn query(&self, query: &SourceQuery<'_>) -> Result<Option<Asin>, SourceError> {
        let isbn = query
            .isbn
            .ok_or(SourceError::MissingField { field: "isbn" })?;
        let isbn = clean_isbn(isbn);

        let base = marketplace_base(self.base_url.as_deref(), "amazon.com");
        let url = format!("{base}/dp/{isbn}");
        let host = normalize_host(&base);

        self.governor.acquire(&host).await;
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await?;
        record_server_backoff(&self.governor, &host, &response);

        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
            });
        }

        // The redirect target carries the ASIN; the body is irrelevant.
        let final_url = response.url().to_string();
        let asin = DP_ASIN_RE
            .captures(&final_url)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Asin::parse(m.as_str()));
        debug!(final_url, found = asin.is_some(), "isbn-direct redirect scrape");
        Ok(asin)
    }
}

/// Scrapes Amazon search results for the first `data-asin` product.
///
/// The marketplace host comes from the query, so the same adapter serves
/// both the standard `amazon.com` strategy and every localized variant.
pub struct AmazonSearchAdapter {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: Option<String>,
}

impl AmazonSearchAdapter {
    /// Creates the adapter against real marketplace hosts.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(governor: Arc<RateGovernor>) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client()?,
            governor,
            base_url: None,
        })
    }

    /// Creates the adapter with a custom base URL (for testing with wiremock).
    /// All marketplaces are routed to the override.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn with_base_url(
        governor: Arc<RateGovernor>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_source_http_client()?,
            governor,
            base_url: Some(base_url.into()),
        })
    }
}

impl std::fmt::Debug for AmazonSearchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmazonSearchAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for AmazonSearchAdapter {
    fn id(&self) -> SourceId {
        SourceId::AmazonSearch
    }

    #[instrument(skip(self, query), fields(title = query.title, marketplace = query.marketplace))]
    async fn query(&self, query: &SourceQuery<'_>) -> Result<Option<Asin>, SourceError> {
        let title = query
            .title
            .ok_or(SourceError::MissingField { field: "title" })?;

        let mut search = title.to_string();
        if let Some(author) = query.author
            && !author.is_empty()
        {
            search = format!("{search} {author}");
        }

        let marketplace = if query.marketplace.is_empty() {
            "amazon.com"
        } else {
            query.marketplace
        };
        let base = marketplace_base(self.base_url.as_deref(), marketplace);
        // Kindle store search; `i=digital-text` restricts to eBooks.
        let url = format!(
            "{base}/s?k={}&i=digital-text",
            urlencoding::encode(&search)
        );
        // The governor key stays the marketplace even under a test override,
        // so localized strategies exercise real per-host spacing.
        let host = if self.base_url.is_some() {
            normalize_host(&base)
        } else {
            normalize_host(marketplace)
        };

        self.governor.acquire(&host).await;
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await?;
        record_server_backoff(&self.governor, &host, &response);

        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
            });
        }

        let html = response.text().await?;
        let asin = DATA_ASIN_RE
            .captures(&html)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Asin::parse(m.as_str()));
        debug!(marketplace, found = asin.is_some(), "amazon search scrape");
        Ok(asin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dp_asin_regex_extracts_from_final_url() {
        let url = "https://www.amazon.com/Mistborn-Final-Empire/dp/B00ZVA3XL6?ref=x";
        let caps = DP_ASIN_RE.captures(url).unwrap();
        assert_eq!(&caps[1], "B00ZVA3XL6");
    }

    #[test]
    fn test_dp_asin_regex_ignores_isbn_paths() {
        assert!(DP_ASIN_RE.captures("https://www.amazon.com/dp/9780765326355").is_none());
    }

    #[test]
    fn test_data_asin_regex_takes_b_prefixed_values() {
        let html = r#"<div data-asin=""></div><div data-asin="B00ZVA3XL6"></div>"#;
        let caps = DATA_ASIN_RE.captures(html).unwrap();
        assert_eq!(&caps[1], "B00ZVA3XL6");
    }

    #[test]
    fn test_data_asin_regex_rejects_non_book_tokens() {
        // Non-B tokens (e.g. bare ISBNs) never match
        let html = r#"<div data-asin="1234567890"></div>"#;
        assert!(DATA_ASIN_RE.captures(html).is_none());
    }

    #[test]
    fn test_marketplace_base_default_and_override() {
        assert_eq!(marketplace_base(None, "amazon.de"), "https://www.amazon.de");
        assert_eq!(
            marketplace_base(Some("http://127.0.0.1:9000/"), "amazon.de"),
            "http://127.0.0.1:9000"
        );
    }
}
