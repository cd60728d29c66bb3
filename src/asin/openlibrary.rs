//! Open Library books API adapter.
//!
//! Open Library rarely carries Amazon identifiers, but when it does they
//! appear under `identifiers.amazon` in the `jscmd=data` response.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::user_agent::random_user_agent;

use super::governor::{RateGovernor, normalize_host};
use super::http_client::build_source_http_client;
use super::{Asin, SourceAdapter, SourceError, SourceId, SourceQuery, clean_isbn};

/// Default Open Library base URL.
const DEFAULT_BASE_URL: &str = "https://openlibrary.org";

/// One book record from the `bibkeys` response. Keyed by `ISBN:<isbn>` at
/// the top level.
#[derive(Debug, Deserialize)]
struct OpenLibraryBook {
    identifiers: Option<OpenLibraryIdentifiers>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryIdentifiers {
    amazon: Option<Vec<String>>,
}

/// Looks up ASINs through the Open Library books API.
pub struct OpenLibraryAdapter {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: String,
}

impl OpenLibraryAdapter {
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
}

impl std::fmt::Debug for OpenLibraryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLibraryAdapter")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceAdapter for OpenLibraryAdapter {
    fn id(&self) -> SourceId {
        SourceId::OpenLibrary
    }

    #[instrument(skip(self, query), fields(isbn = query.isbn))]
    async fn query(&self, query: &SourceQuery<'_>) -> Result<Option<Asin>, SourceError> {
        let isbn = query
            .isbn
            .ok_or(SourceError::MissingField { field: "isbn" })?;
        let isbn = clean_isbn(isbn);

        let url = format!(
            "{}/api/books?bibkeys=ISBN:{isbn}&format=json&jscmd=data",
            self.base_url
        );
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

        let books: HashMap<String, OpenLibraryBook> = response
            .json()
            .await
            .map_err(|e| SourceError::parse(e.to_string()))?;

        let asin = books
            .into_values()
            .filter_map(|book| book.identifiers)
            .flat_map(|ids| ids.amazon.unwrap_or_default())
            .find_map(|candidate| Asin::parse(&candidate));
        debug!(found = asin.is_some(), "open library identifier scan");
        Ok(asin)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_finds_amazon_identifier() {
        let body = serde_json::json!({
            "ISBN:9780765326355": {
                "identifiers": {
                    "isbn_13": ["9780765326355"],
                    "amazon": ["not-an-asin", "B00ZVA3XL6"]
                }
            }
        });
        let books: HashMap<String, OpenLibraryBook> = serde_json::from_value(body).unwrap();
        let asin = books
            .into_values()
            .filter_map(|b| b.identifiers)
            .flat_map(|ids| ids.amazon.unwrap_or_default())
            .find_map(|c| Asin::parse(&c));
        assert_eq!(asin.unwrap().as_str(), "B00ZVA3XL6");
    }

    #[test]
    fn test_response_without_identifiers_yields_none() {
        let body = serde_json::json!({ "ISBN:123": {} });
        let books: HashMap<String, OpenLibraryBook> = serde_json::from_value(body).unwrap();
        assert!(books.into_values().all(|b| b.identifiers.is_none()));
    }
}
