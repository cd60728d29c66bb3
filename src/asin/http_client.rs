//! Shared HTTP client construction policy for source adapters.
//!
//! Centralizes networking defaults so adapters stay consistent on timeout,
//! compression, and redirect handling. The per-request User-Agent rotation
//! lives in [`crate::user_agent`]; clients are built without a default UA so
//! each request can carry its own.

use std::time::Duration;

use reqwest::Client;

use super::SourceError;

/// All adapter requests share a 10-second overall timeout.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds an adapter HTTP client using shared policy: 10 s timeout, gzip,
/// default redirect following (required by the isbn-direct scrape).
///
/// # Errors
///
/// Returns [`SourceError::ClientBuild`] when construction fails.
pub(crate) fn build_source_http_client() -> Result<Client, SourceError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .gzip(true)
        .build()
        .map_err(|error| SourceError::ClientBuild {
            message: error.to_string(),
        })
}
