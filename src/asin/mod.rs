//! ASIN resolution engine: multi-source, cache-backed, rate-limited lookups.
//!
//! This module maps a book identity (ISBN, title+author, or an on-disk file)
//! to an Amazon Standard Identification Number through a fixed, deterministic
//! sequence of sources.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - Async trait that individual source adapters implement
//! - [`AsinLookupService`] - Strategy sequencing, cache integration, batching
//! - [`AsinCache`] - TTL-bounded persistent store of prior lookups
//! - [`RateGovernor`] - Per-host minimum spacing for outbound HTTP
//! - [`IsbnDirectAdapter`] / [`AmazonSearchAdapter`] - Amazon scrape adapters
//! - [`GoogleBooksAdapter`] - Google Books volumes API adapter
//! - [`OpenLibraryAdapter`] - Open Library books API adapter
//!
//! Source ordering stays centralized in the engine; adapters are pure
//! functions of their inputs and the HTTP fabric, sharing one governor.

mod amazon;
mod cache;
mod engine;
mod error;
mod google_books;
mod governor;
mod http_client;
mod openlibrary;

pub use amazon::{AmazonSearchAdapter, IsbnDirectAdapter};
pub use cache::{AsinCache, CacheError, CachedAsin, DEFAULT_TTL_SECONDS};
pub use engine::{AsinLookupService, AvailabilityReport, CancelFlag};
pub use error::SourceError;
pub use google_books::GoogleBooksAdapter;
pub use governor::{HostStats, RateGovernor};
pub use openlibrary::OpenLibraryAdapter;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Book ASINs are exactly 10 characters: a leading `B` followed by nine
/// uppercase alphanumerics. Input is case-normalized before matching.
static ASIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^B[A-Z0-9]{9}$").unwrap_or_else(|e| panic!("invalid ASIN regex: {e}"))
});

/// A validated Amazon Standard Identification Number.
///
/// Only the strict book-ASIN form is accepted: `B` followed by nine
/// `[A-Z0-9]` characters, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asin(String);

impl Asin {
    /// Parses and validates an ASIN, normalizing case.
    ///
    /// Returns `None` for anything that is not a 10-character B-prefixed
    /// token.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let candidate = raw.trim().to_ascii_uppercase();
        ASIN_RE.is_match(&candidate).then_some(Self(candidate))
    }

    /// Returns the ASIN as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns true if `candidate` is a valid book ASIN.
#[must_use]
pub fn validate_asin(candidate: &str) -> bool {
    Asin::parse(candidate).is_some()
}

/// Strips an ISBN down to its significant characters (digits and `X`).
#[must_use]
pub fn clean_isbn(isbn: &str) -> String {
    isbn.trim()
        .to_ascii_uppercase()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X')
        .collect()
}

/// The closed set of implemented lookup sources.
///
/// The engine dispatches on this enum in a fixed order; there is no runtime
/// plugin registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Amazon `/dp/<isbn>` redirect scrape.
    IsbnDirect,
    /// Amazon search result scrape (standard or localized marketplace).
    AmazonSearch,
    /// Google Books volumes API.
    GoogleBooks,
    /// Open Library books API.
    OpenLibrary,
}

impl SourceId {
    /// Stable source name used in results, cache rows, and config.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsbnDirect => "isbn-direct",
            Self::AmazonSearch => "amazon-search",
            Self::GoogleBooks => "google-books",
            Self::OpenLibrary => "openlibrary",
        }
    }

    /// Parses a config-level source name.
    ///
    /// `amazon` is accepted as an alias for the search scrape.
    #[must_use]
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "isbn-direct" => Some(Self::IsbnDirect),
            "amazon" | "amazon-search" => Some(Self::AmazonSearch),
            "google-books" => Some(Self::GoogleBooks),
            "openlibrary" => Some(Self::OpenLibrary),
            _ => None,
        }
    }

    /// Base confidence assigned to a hit from this source.
    ///
    /// Localized-primary Amazon hits are upgraded by the engine; cache hits
    /// inherit the confidence of the original source.
    #[must_use]
    pub fn confidence(self) -> f32 {
        match self {
            Self::IsbnDirect => 0.95,
            Self::AmazonSearch => 0.7,
            Self::GoogleBooks => 0.6,
            Self::OpenLibrary => 0.5,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence for a source name as recorded in the cache.
#[must_use]
pub(crate) fn confidence_for_source_name(name: &str) -> Option<f32> {
    SourceId::from_config_name(name).map(SourceId::confidence)
}

/// One book identity submitted to the resolver.
///
/// Title and author are required for title-based lookup; an ISBN alone is
/// sufficient for ISBN-based lookup; `file_path` alone is sufficient when
/// metadata extraction succeeds.
#[derive(Debug, Clone, Default)]
pub struct BookIdentity {
    pub isbn: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub file_path: Option<PathBuf>,
}

impl BookIdentity {
    /// Identity for an ISBN-based lookup.
    #[must_use]
    pub fn from_isbn(isbn: impl Into<String>) -> Self {
        Self {
            isbn: Some(isbn.into()),
            ..Self::default()
        }
    }

    /// Identity for a title-based lookup.
    #[must_use]
    pub fn from_title(title: impl Into<String>, author: Option<String>) -> Self {
        Self {
            title: Some(title.into()),
            author,
            ..Self::default()
        }
    }

    /// Identity for a file-based lookup.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Normalizes one cache-key component: lower-cased, whitespace collapsed out.
fn key_component(value: &str) -> String {
    value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Cache key for an ISBN lookup: `isbn_<digits-only>`.
#[must_use]
pub fn isbn_cache_key(isbn: &str) -> String {
    format!("isbn_{}", clean_isbn(isbn).to_lowercase())
}

/// Cache key for a title lookup: `<title>_<author>` (author may be empty).
#[must_use]
pub fn title_cache_key(title: &str, author: Option<&str>) -> String {
    format!(
        "{}_{}",
        key_component(title),
        key_component(author.unwrap_or(""))
    )
}

/// Cache key for a localized lookup:
/// `<isbn-or-empty>_<title>_<author>_<language>`.
#[must_use]
pub fn localized_cache_key(
    isbn: Option<&str>,
    title: &str,
    author: Option<&str>,
    language: &str,
) -> String {
    format!(
        "{}_{}_{}_{}",
        isbn.map(clean_isbn).unwrap_or_default().to_lowercase(),
        key_component(title),
        key_component(author.unwrap_or("")),
        key_component(language)
    )
}

/// Outcome of one resolver call.
///
/// Invariants: `success` iff `asin` is present; `from_cache` implies
/// `source == "cache"`.
#[derive(Debug, Clone)]
pub struct AsinLookupResult {
    /// The title the lookup ran with (may come from extracted metadata).
    pub query_title: String,
    /// The author the lookup ran with, if any.
    pub query_author: Option<String>,
    /// The resolved ASIN, when a source produced a valid one.
    pub asin: Option<Asin>,
    /// Name of the source that produced the hit (`"cache"` for cache hits).
    pub source: Option<String>,
    /// Source-assigned confidence in 0..1.
    pub confidence: Option<f32>,
    /// Free-form metadata picked up during resolution.
    pub metadata: HashMap<String, String>,
    /// True iff an ASIN was found.
    pub success: bool,
    /// Per-source failure trail when no source produced an ASIN.
    pub error: Option<String>,
    /// Wall-clock duration of the lookup.
    pub lookup_time: Duration,
    /// True when the answer came from the cache.
    pub from_cache: bool,
}

impl AsinLookupResult {
    pub(crate) fn found(
        query_title: String,
        query_author: Option<String>,
        asin: Asin,
        source: String,
        confidence: Option<f32>,
        lookup_time: Duration,
        from_cache: bool,
    ) -> Self {
        Self {
            query_title,
            query_author,
            asin: Some(asin),
            source: Some(source),
            confidence,
            metadata: HashMap::new(),
            success: true,
            error: None,
            lookup_time,
            from_cache,
        }
    }

    pub(crate) fn not_found(
        query_title: String,
        query_author: Option<String>,
        error: String,
        lookup_time: Duration,
    ) -> Self {
        Self {
            query_title,
            query_author,
            asin: None,
            source: None,
            confidence: None,
            metadata: HashMap::new(),
            success: false,
            error: Some(error),
            lookup_time,
            from_cache: false,
        }
    }
}

/// One query handed to a source adapter.
///
/// Adapters read only the fields they understand: `isbn-direct` and
/// `openlibrary` require `isbn`, `amazon-search` requires `title`, and
/// `google-books` uses whatever is present.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery<'a> {
    pub isbn: Option<&'a str>,
    pub title: Option<&'a str>,
    pub author: Option<&'a str>,
    /// Marketplace domain for Amazon adapters (e.g. `amazon.de`).
    pub marketplace: &'a str,
}

/// Trait that all lookup sources implement.
///
/// Adapters are stateless with respect to shared state: they hold an HTTP
/// client and a reference to the shared [`RateGovernor`], and return
/// `Ok(None)` when the source simply has no answer.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn SourceAdapter>`. Rust 2024 native async traits are not
/// object-safe, so `async_trait` is required here.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which closed-enum source this adapter implements.
    fn id(&self) -> SourceId;

    /// Queries the source for an ASIN.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on transport or parse failures; the engine
    /// records the reason and continues with the next source.
    async fn query(&self, query: &SourceQuery<'_>) -> Result<Option<Asin>, SourceError>;
}
