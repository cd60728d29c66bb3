//! Per-host rate governor for source adapter requests.
//!
//! Enforces a minimum spacing between requests to the same marketplace or
//! API host, so scraping stays polite and hosts do not block the client.
//! Requests to different hosts proceed independently in parallel; only
//! subsequent requests to the *same* host are delayed.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bookprep_core::asin::RateGovernor;
//!
//! # async fn example() {
//! let governor = RateGovernor::new(Duration::from_secs(2));
//!
//! // First request to a host proceeds immediately
//! governor.acquire("amazon.de").await;
//!
//! // Second request to the same host waits out the spacing window
//! let waited = governor.acquire("amazon.de").await;
//! assert!(waited >= Duration::from_secs(2));
//!
//! // A different host is not delayed
//! governor.acquire("openlibrary.org").await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per host (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host request statistics exposed by [`RateGovernor::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    /// Number of `acquire` calls that completed for this host.
    pub requests_made: u64,
    /// Total delay this host's callers have accumulated.
    pub total_delay_time: Duration,
}

/// State tracked for each host.
#[derive(Debug)]
struct HostState {
    /// Timing protected by a Mutex for atomic read-update across the sleep.
    /// `None` in `last_request` means the host has not been hit yet.
    timing: Mutex<HostTiming>,
    requests_made: AtomicU64,
    total_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct HostTiming {
    last_request: Option<Instant>,
    /// Earliest time the next request may go out, from a server Retry-After.
    not_before: Option<Instant>,
}

impl HostState {
    fn new() -> Self {
        Self {
            timing: Mutex::new(HostTiming::default()),
            requests_made: AtomicU64::new(0),
            total_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self.total_delay_ms.fetch_add(delay_ms, Ordering::SeqCst) + delay_ms;
        Duration::from_millis(total)
    }
}

/// Per-host rate governor shared by all source adapters of one resolver.
///
/// Designed to be wrapped in `Arc`. Uses `DashMap` for lock-free access to
/// per-host state and `tokio::sync::Mutex` for the timing critical section,
/// so each host's acquire+update is atomic from the caller's perspective.
#[derive(Debug)]
pub struct RateGovernor {
    /// Minimum spacing between requests to the same host.
    min_spacing: Duration,
    /// Per-host state. Arc values let the DashMap shard lock be released
    /// before awaiting the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

impl RateGovernor {
    /// Creates a governor with the given minimum inter-request spacing.
    #[must_use]
    #[instrument(skip_all, fields(spacing_ms = min_spacing.as_millis()))]
    pub fn new(min_spacing: Duration) -> Self {
        debug!("creating rate governor");
        Self {
            min_spacing,
            hosts: DashMap::new(),
        }
    }

    /// Returns the configured minimum spacing.
    #[must_use]
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Blocks until the window for `host` opens, then claims it.
    ///
    /// Returns the delay this caller observed. The first request to a host
    /// proceeds immediately. Fairness between concurrent callers is not
    /// guaranteed, but every caller eventually proceeds.
    #[instrument(skip(self))]
    pub async fn acquire(&self, host: &str) -> Duration {
        let host_key = normalize_host(host);

        let state = self
            .hosts
            .entry(host_key.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        // Only the host Mutex is held across the sleep; the DashMap shard
        // lock was released above.
        let mut timing = state.timing.lock().await;

        let now = Instant::now();
        let mut ready_at = now;
        if let Some(last) = timing.last_request {
            ready_at = ready_at.max(last + self.min_spacing);
        }
        if let Some(not_before) = timing.not_before {
            ready_at = ready_at.max(not_before);
        }

        let delay = ready_at.saturating_duration_since(now);
        if delay > Duration::ZERO {
            let cumulative = state.add_delay(delay);
            debug!(
                host = %host_key,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );
            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    host = %host_key,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider reducing request volume to this host"
                );
            }
            tokio::time::sleep(delay).await;
        } else {
            debug!(host = %host_key, "window open - no delay");
        }

        timing.last_request = Some(Instant::now());
        timing.not_before = None;
        state.requests_made.fetch_add(1, Ordering::SeqCst);
        delay
    }

    /// Records a server-mandated delay (from a Retry-After header).
    ///
    /// Subsequent `acquire` calls for `host` will not proceed before the
    /// recorded deadline.
    #[instrument(skip(self))]
    pub fn record_rate_limit(&self, host: &str, delay: Duration) {
        let host_key = normalize_host(host);
        let delay = delay.min(MAX_RETRY_AFTER);

        let state = self
            .hosts
            .entry(host_key.clone())
            .or_insert_with(|| Arc::new(HostState::new()))
            .clone();

        // try_lock: the deadline write must not block the response path.
        // A lost race just means the concurrent acquirer already advanced
        // the window.
        if let Ok(mut timing) = state.timing.try_lock() {
            timing.not_before = Some(Instant::now() + delay);
        }
        let cumulative = state.add_delay(delay);

        debug!(
            host = %host_key,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host = %host_key,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - host may be under heavy load"
            );
        }
    }

    /// Per-host request and delay statistics.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, HostStats> {
        self.hosts
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    HostStats {
                        requests_made: entry.requests_made.load(Ordering::SeqCst),
                        total_delay_time: Duration::from_millis(
                            entry.total_delay_ms.load(Ordering::SeqCst),
                        ),
                    },
                )
            })
            .collect()
    }
}

/// Normalizes a host key: full URLs are reduced to their host, bare hosts
/// are lower-cased. Malformed input still gets a bucket so it is never
/// exempt from limiting.
#[must_use]
pub fn normalize_host(host_or_url: &str) -> String {
    if host_or_url.contains("://") {
        return url::Url::parse(host_or_url)
            .ok()
            .and_then(|u| {
                u.host_str()
                    .map(|h| h.to_lowercase().trim_start_matches("www.").to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
    }
    let trimmed = host_or_url.trim().trim_start_matches("www.");
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 forms: integer seconds and HTTP-date. Returns
/// `None` if the value cannot be parsed; values are capped at 1 hour.
#[must_use]
pub(crate) fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        match datetime.duration_since(now) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date in the past: window is already open
            Err(_) => Some(Duration::ZERO),
        }
    } else {
        None
    }
}
