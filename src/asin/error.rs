//! Error types for the ASIN resolution engine.

use thiserror::Error;

/// A source-level failure.
///
/// These never escape the engine: each is folded into the per-source failure
/// trail on the returned [`super::AsinLookupResult`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (DNS, connect, timeout, body read).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("unexpected status {status}")]
    Status {
        /// The HTTP status code returned.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("response parse failed: {message}")]
    Parse {
        /// What went wrong while parsing.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("http client construction failed: {message}")]
    ClientBuild {
        /// Builder error detail.
        message: String,
    },

    /// The adapter was queried without the field it requires.
    #[error("missing required query field: {field}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },
}

impl SourceError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}
