//! ASIN resolution engine: strategy sequencing, cache integration, batching.
//!
//! The engine consults sources in a fixed, deterministic order:
//!
//! 1. The cache.
//! 2. For file-based lookups, each localized [`SearchTerm`] in ascending
//!    priority, sent to the Amazon search scrape on its marketplace.
//! 3. The standard sources: `isbn-direct`, `amazon-search` (amazon.com),
//!    `google-books`, `openlibrary`.
//!
//! The first valid ASIN wins, is written back to the cache, and returned
//! with its source and confidence. When every source comes up empty the
//! result carries a per-source failure trail instead.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::USER_AGENT;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::localization::{SearchTerm, extract_metadata, search_terms};
use crate::user_agent::random_user_agent;

use super::cache::AsinCache;
use super::governor::RateGovernor;
use super::http_client::build_source_http_client;
use super::{
    AmazonSearchAdapter, Asin, AsinLookupResult, BookIdentity, GoogleBooksAdapter,
    IsbnDirectAdapter, OpenLibraryAdapter, SourceAdapter, SourceError, SourceId, SourceQuery,
    confidence_for_source_name, isbn_cache_key, localized_cache_key, title_cache_key,
};

/// Confidence assigned to an Amazon search hit from the priority-1 localized
/// term; lower-priority terms and the standard search get the fallback value.
const LOCALIZED_PRIMARY_CONFIDENCE: f32 = 0.85;

/// Cooperative cancellation flag shared between a batch and its caller.
///
/// Checked between per-item dispatches; in-flight HTTP is bounded by its own
/// timeout rather than aborted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates a fresh, uncancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a marketplace availability probe.
#[derive(Debug, Clone)]
pub struct AvailabilityReport {
    /// True when the product page answered with a success status.
    pub available: bool,
    /// Sparse probe metadata (HTTP status, final URL).
    pub metadata: HashMap<String, String>,
}

/// Internal per-lookup context assembled by the public entry points.
#[derive(Debug, Default)]
struct LookupContext {
    cache_key: String,
    isbn: Option<String>,
    title: Option<String>,
    author: Option<String>,
    terms: Vec<SearchTerm>,
    use_cache: bool,
}

/// Multi-source ASIN lookup service.
///
/// Owns the cache and governor exclusively; adapters receive the governor by
/// reference and never reach back into the engine. Cloning is cheap (all
/// shared state is behind `Arc`) and is how batch workers get their handle.
#[derive(Clone)]
pub struct AsinLookupService {
    cache: AsinCache,
    governor: Arc<RateGovernor>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    enabled: Vec<SourceId>,
    client: Client,
    /// Test override for the availability probe host.
    availability_base: Option<String>,
}

impl std::fmt::Debug for AsinLookupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsinLookupService")
            .field("enabled", &self.enabled)
            .field("adapters", &self.adapters.len())
            .finish_non_exhaustive()
    }
}

impl AsinLookupService {
    /// Creates a service with the default adapter set against the real hosts.
    ///
    /// `rate_limit` is the per-host minimum spacing; `enabled` is the
    /// configured source subset (empty means all).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn new(
        db: Database,
        rate_limit: Duration,
        enabled: Vec<SourceId>,
    ) -> Result<Self, SourceError> {
        let governor = Arc::new(RateGovernor::new(rate_limit));
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(IsbnDirectAdapter::new(Arc::clone(&governor))?),
            Arc::new(AmazonSearchAdapter::new(Arc::clone(&governor))?),
            Arc::new(GoogleBooksAdapter::new(Arc::clone(&governor))?),
            Arc::new(OpenLibraryAdapter::new(Arc::clone(&governor))?),
        ];
        Self::from_parts(AsinCache::new(db), governor, adapters, enabled)
    }

    /// Assembles a service from pre-built parts (for tests and tooling that
    /// need adapters pointed at mock servers).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if HTTP client construction fails.
    pub fn from_parts(
        cache: AsinCache,
        governor: Arc<RateGovernor>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        enabled: Vec<SourceId>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            cache,
            governor,
            adapters,
            enabled,
            client: build_source_http_client()?,
            availability_base: None,
        })
    }

    /// Overrides the availability probe base URL (for testing with wiremock).
    #[must_use]
    pub fn with_availability_base(mut self, base_url: impl Into<String>) -> Self {
        self.availability_base = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// The shared per-host governor, for stats reporting.
    #[must_use]
    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    fn adapter(&self, id: SourceId) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|adapter| adapter.id() == id)
    }

    fn source_enabled(&self, id: SourceId, filter: Option<&[SourceId]>) -> bool {
        (self.enabled.is_empty() || self.enabled.contains(&id))
            && filter.is_none_or(|subset| subset.contains(&id))
    }

    /// Looks up an ASIN by ISBN.
    #[instrument(skip(self, sources))]
    pub async fn lookup_by_isbn(
        &self,
        isbn: &str,
        sources: Option<&[SourceId]>,
        use_cache: bool,
    ) -> AsinLookupResult {
        let ctx = LookupContext {
            cache_key: isbn_cache_key(isbn),
            isbn: Some(isbn.to_string()),
            use_cache,
            ..LookupContext::default()
        };
        let mut result = self.resolve(ctx, sources).await;
        result
            .metadata
            .insert("isbn".to_string(), isbn.to_string());
        result
    }

    /// Looks up an ASIN by title (and optionally author).
    #[instrument(skip(self, sources))]
    pub async fn lookup_by_title(
        &self,
        title: &str,
        author: Option<&str>,
        sources: Option<&[SourceId]>,
        use_cache: bool,
    ) -> AsinLookupResult {
        let ctx = LookupContext {
            cache_key: title_cache_key(title, author),
            title: Some(title.to_string()),
            author: author.map(str::to_string),
            use_cache,
            ..LookupContext::default()
        };
        self.resolve(ctx, sources).await
    }

    /// Looks up an ASIN for an on-disk book file.
    ///
    /// Metadata is extracted first (see [`crate::localization`]); the localized search
    /// terms run before the standard sources.
    #[instrument(skip(self, sources), fields(path = %path.display()))]
    pub async fn lookup_by_file(
        &self,
        path: &Path,
        sources: Option<&[SourceId]>,
        use_cache: bool,
    ) -> AsinLookupResult {
        let start = Instant::now();
        let owned = path.to_path_buf();
        let meta = match tokio::task::spawn_blocking(move || extract_metadata(&owned)).await {
            Ok(meta) => meta,
            Err(error) => {
                return AsinLookupResult::not_found(
                    String::new(),
                    None,
                    format!("metadata extraction panicked: {error}"),
                    start.elapsed(),
                );
            }
        };

        if meta.title.is_empty() {
            return AsinLookupResult::not_found(
                String::new(),
                None,
                "no usable metadata could be extracted from file".to_string(),
                start.elapsed(),
            );
        }

        let author = (!meta.author.is_empty()).then(|| meta.author.clone());
        let ctx = LookupContext {
            cache_key: localized_cache_key(
                None,
                &meta.title,
                author.as_deref(),
                &meta.language,
            ),
            title: Some(meta.title.clone()),
            author,
            terms: search_terms(&meta),
            use_cache,
            ..LookupContext::default()
        };
        let mut result = self.resolve(ctx, sources).await;
        result
            .metadata
            .insert("language".to_string(), meta.language);
        if meta.likely_corrupted {
            result
                .metadata
                .insert("likely_corrupted".to_string(), "true".to_string());
        }
        result
    }

    /// Resolves a batch of identities with bounded concurrency.
    ///
    /// Results come back in input order. The cancel flag is checked between
    /// per-item dispatches; a cancelled batch returns partial results for
    /// the items already dispatched.
    #[instrument(skip(self, identities, sources, cancel), fields(count = identities.len()))]
    pub async fn batch(
        &self,
        identities: &[BookIdentity],
        parallel: usize,
        sources: Option<&[SourceId]>,
        use_cache: bool,
        cancel: &CancelFlag,
    ) -> Vec<AsinLookupResult> {
        let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
        let sources: Option<Vec<SourceId>> = sources.map(<[SourceId]>::to_vec);
        let mut handles = Vec::new();

        for identity in identities {
            if cancel.is_cancelled() {
                info!(
                    dispatched = handles.len(),
                    total = identities.len(),
                    "batch cancelled; returning partial results"
                );
                break;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let service = self.clone();
            let identity = identity.clone();
            let sources = sources.clone();
            handles.push(tokio::spawn(async move {
                let result = service
                    .lookup_identity(&identity, sources.as_deref(), use_cache)
                    .await;
                drop(permit);
                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(error) => results.push(AsinLookupResult::not_found(
                    String::new(),
                    None,
                    format!("lookup task failed: {error}"),
                    Duration::ZERO,
                )),
            }
        }
        results
    }

    /// Routes one identity to the matching lookup entry point.
    async fn lookup_identity(
        &self,
        identity: &BookIdentity,
        sources: Option<&[SourceId]>,
        use_cache: bool,
    ) -> AsinLookupResult {
        if let Some(path) = &identity.file_path {
            return self.lookup_by_file(path, sources, use_cache).await;
        }
        if let Some(title) = &identity.title {
            let ctx = LookupContext {
                cache_key: title_cache_key(title, identity.author.as_deref()),
                isbn: identity.isbn.clone(),
                title: Some(title.clone()),
                author: identity.author.clone(),
                use_cache,
                ..LookupContext::default()
            };
            return self.resolve(ctx, sources).await;
        }
        if let Some(isbn) = &identity.isbn {
            return self.lookup_by_isbn(isbn, sources, use_cache).await;
        }
        AsinLookupResult::not_found(
            String::new(),
            None,
            "identity has neither isbn, title, nor file path".to_string(),
            Duration::ZERO,
        )
    }

    /// Probes the marketplace product page for an ASIN. Sparse use.
    #[instrument(skip(self))]
    pub async fn check_availability(&self, asin: &Asin) -> AvailabilityReport {
        let base = self
            .availability_base
            .clone()
            .unwrap_or_else(|| "https://www.amazon.com".to_string());
        let url = format!("{base}/dp/{asin}");

        self.governor
            .acquire(&super::governor::normalize_host(&base))
            .await;

        let mut metadata = HashMap::new();
        match self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
        {
            Ok(response) => {
                metadata.insert("status".to_string(), response.status().as_u16().to_string());
                metadata.insert("url".to_string(), response.url().to_string());
                AvailabilityReport {
                    available: response.status().is_success(),
                    metadata,
                }
            }
            Err(error) => {
                metadata.insert("error".to_string(), error.to_string());
                AvailabilityReport {
                    available: false,
                    metadata,
                }
            }
        }
    }

    /// The shared resolution loop behind every public lookup.
    async fn resolve(
        &self,
        ctx: LookupContext,
        sources: Option<&[SourceId]>,
    ) -> AsinLookupResult {
        let start = Instant::now();
        let query_title = ctx.title.clone().unwrap_or_default();

        // 1. Cache.
        if ctx.use_cache
            && let Some(hit) = self.cache.get(&ctx.cache_key).await
        {
            return AsinLookupResult::found(
                query_title,
                ctx.author.clone(),
                hit.asin,
                "cache".to_string(),
                confidence_for_source_name(&hit.source),
                start.elapsed(),
                true,
            );
        }

        let mut failures: Vec<(String, String)> = Vec::new();

        // 2. Localized search terms, ascending priority.
        if !ctx.terms.is_empty() && self.source_enabled(SourceId::AmazonSearch, sources) {
            if let Some(adapter) = self.adapter(SourceId::AmazonSearch) {
                for term in &ctx.terms {
                    let query = SourceQuery {
                        isbn: ctx.isbn.as_deref(),
                        title: Some(&term.title),
                        author: term.author.as_deref(),
                        marketplace: term.marketplace,
                    };
                    debug!(
                        title = %term.title,
                        marketplace = term.marketplace,
                        priority = term.priority,
                        "trying localized search term"
                    );
                    match adapter.query(&query).await {
                        Ok(Some(asin)) => {
                            let confidence = if term.priority == 1 {
                                LOCALIZED_PRIMARY_CONFIDENCE
                            } else {
                                SourceId::AmazonSearch.confidence()
                            };
                            return self
                                .record_hit(&ctx, query_title, asin, SourceId::AmazonSearch, confidence, start)
                                .await;
                        }
                        Ok(None) => failures.push((
                            format!("amazon-search ({})", term.marketplace),
                            "no results".to_string(),
                        )),
                        Err(error) => {
                            warn!(%error, marketplace = term.marketplace, "localized search failed");
                            failures.push((
                                format!("amazon-search ({})", term.marketplace),
                                error.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        // 3. Standard sources, fixed order.
        for id in [
            SourceId::IsbnDirect,
            SourceId::AmazonSearch,
            SourceId::GoogleBooks,
            SourceId::OpenLibrary,
        ] {
            if !self.source_enabled(id, sources) {
                continue;
            }
            let Some(adapter) = self.adapter(id) else {
                continue;
            };
            let query = SourceQuery {
                isbn: ctx.isbn.as_deref(),
                title: ctx.title.as_deref(),
                author: ctx.author.as_deref(),
                marketplace: "amazon.com",
            };
            debug!(source = %id, "trying standard source");
            match adapter.query(&query).await {
                Ok(Some(asin)) => {
                    return self
                        .record_hit(&ctx, query_title, asin, id, id.confidence(), start)
                        .await;
                }
                Ok(None) => failures.push((id.as_str().to_string(), "no results".to_string())),
                Err(error) => {
                    // Missing-input skips land in the trail too, so the
                    // error names every consulted source.
                    debug!(source = %id, %error, "source yielded no ASIN");
                    failures.push((id.as_str().to_string(), error.to_string()));
                }
            }
        }

        let error = if failures.is_empty() {
            "no sources enabled".to_string()
        } else {
            failures
                .iter()
                .map(|(source, reason)| format!("{source}: {reason}"))
                .collect::<Vec<_>>()
                .join("; ")
        };
        info!(cache_key = %ctx.cache_key, "no ASIN found");
        AsinLookupResult::not_found(query_title, ctx.author.clone(), error, start.elapsed())
    }

    /// Writes a hit back to the cache and assembles the success result.
    async fn record_hit(
        &self,
        ctx: &LookupContext,
        query_title: String,
        asin: Asin,
        source: SourceId,
        confidence: f32,
        start: Instant,
    ) -> AsinLookupResult {
        info!(asin = %asin, source = %source, "ASIN found");
        self.cache.put(&ctx.cache_key, &asin, source.as_str()).await;
        AsinLookupResult::found(
            query_title,
            ctx.author.clone(),
            asin,
            source.as_str().to_string(),
            Some(confidence),
            start.elapsed(),
            false,
        )
    }
}
