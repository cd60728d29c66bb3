//! Google Books volumes API adapter.
//!
//! Queries `books/v1/volumes` with `isbn:`/`intitle:`/`inauthor:` terms and
//! inspects each volume's industry identifiers for an `OTHER`-typed value
//! that validates as a book ASIN.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::user_agent::random_user_agent;

use super::governor::{RateGovernor, normalize_host};
use super::http_client::build_source_http_client;
use super::{Asin, SourceAdapter, SourceError, SourceId, SourceQuery};

/// Default Google Books API base URL.
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

// ==================== Google Books API Response Types ====================

#[derive(Debug, Deserialize)]
struct VolumesResponse {
    items: Option<Vec<Volume>>,
}

#[derive(Debug, Deserialize)]
struct Volume {
    #[serde(rename = "volumeInfo")]
    volume_info: Option<VolumeInfo>,
}

#[derive(Debug, Deserialize)]
struct VolumeInfo {
    #[serde(rename = "industryIdentifiers")]
    industry_identifiers: Option<Vec<IndustryIdentifier>>,
}

#[derive(Debug, Deserialize)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    id_type: String,
    identifier: Option<String>,
}

// ==================== GoogleBooksAdapter ====================

/// Looks up ASINs through the Google Books volumes API.
pub struct GoogleBooksAdapter {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: String,
}

impl GoogleBooksAdapter {
    /// Creates the adapter against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(governor: Arc<RateGovernor>) -> Result<Self, SourceError> {
        Self::with_base_url(governor, DEFAULT_BASE_URL)
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
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Builds the combined query string from whatever identity parts exist.
    fn build_query(query: &SourceQuery<'_>) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(isbn) = query.isbn {
            parts.push(format!("isbn:{}", urlencoding::encode(isbn)));
        }
        if let Some(title) = query.title {
            parts.push(format!("intitle:%22{}%22", urlencoding::encode(title)));
        }
        if let Some(author) = query.author {
            parts.push(format!("inauthor:%22{}%22", urlencoding::encode(author)));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("+"))
        }
    }
}

impl std::fmt::Debug for GoogleBooksAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleBooksAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for GoogleBooksAdapter {
    fn id(&self) -> SourceId {
        SourceId::GoogleBooks
    }

    #[instrument(skip(self, query), fields(isbn = query.isbn, title = query.title))]
    async fn query(&self, query: &SourceQuery<'_>) -> Result<Option<Asin>, SourceError> {
        let Some(q) = Self::build_query(query) else {
            return Err(SourceError::MissingField {
                field: "isbn or title",
            });
        };

        let url = format!("{}/books/v1/volumes?q={q}&maxResults=5", self.base_url);
        let host = normalize_host(&self.base_url);

        self.governor.acquire(&host).await;
        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                status: response.status().as_u16(),
            });
        }

        let volumes: VolumesResponse = response
            .json()
            .await
            .map_err(|e| SourceError::parse(e.to_string()))?;

        let asin = volumes
            .items
            .unwrap_or_default()
            .into_iter()
            .filter_map(|volume| volume.volume_info)
            .flat_map(|info| info.industry_identifiers.unwrap_or_default())
            .filter(|id| id.id_type == "OTHER")
            .filter_map(|id| id.identifier)
            .find_map(|candidate| Asin::parse(&candidate));
        debug!(found = asin.is_some(), "google books identifier scan");
        Ok(asin)
    }
}
