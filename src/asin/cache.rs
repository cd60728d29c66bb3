//! TTL-bounded persistent cache of prior ASIN lookups.
//!
//! Keys are the normalized identity strings built in [`super`]
//! (`isbn_...`, `<title>_<author>`, or the localized four-part form).
//! Entries carry the source that produced them and expire after their
//! per-entry TTL (30 days by default). Writes are single-row upserts, so a
//! crash mid-write never corrupts prior entries.

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::Asin;
use crate::db::Database;

/// Default entry lifetime: 30 days.
pub const DEFAULT_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// Cache-level errors. Reads degrade to misses; this surfaces only from
/// explicit maintenance calls.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying store rejected the operation.
    #[error("cache store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// One cached lookup, as returned by [`AsinCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsin {
    /// The cached ASIN.
    pub asin: Asin,
    /// Name of the source that originally produced it.
    pub source: String,
}

/// Persistent ASIN lookup cache over the shared [`Database`].
#[derive(Debug, Clone)]
pub struct AsinCache {
    db: Database,
    ttl_seconds: i64,
}

impl AsinCache {
    /// Creates a cache with the default 30-day TTL.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Creates a cache with a custom TTL (for tests and tooling).
    #[must_use]
    pub fn with_ttl(db: Database, ttl_seconds: i64) -> Self {
        Self { db, ttl_seconds }
    }

    /// Looks up a key, treating expired entries as misses.
    ///
    /// Store failures degrade to a miss with a warning; correctness never
    /// depends on the cache being readable.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Option<CachedAsin> {
        let row = sqlx::query(
            "SELECT asin, source, cached_at, ttl_seconds FROM asin_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.db.pool())
        .await;

        let row = match row {
            Ok(row) => row?,
            Err(error) => {
                warn!(%error, key, "ASIN cache read failed; treating as miss");
                return None;
            }
        };

        let cached_at: i64 = row.get("cached_at");
        let ttl_seconds: i64 = row.get("ttl_seconds");
        if unix_now().saturating_sub(cached_at) > ttl_seconds {
            debug!(key, "ASIN cache entry expired");
            return None;
        }

        let raw: String = row.get("asin");
        let asin = Asin::parse(&raw)?;
        debug!(key, asin = %asin, "ASIN cache hit");
        Some(CachedAsin {
            asin,
            source: row.get("source"),
        })
    }

    /// Stores a lookup result under `key`, replacing any prior entry.
    ///
    /// Write failures are logged and swallowed: persistence is best-effort.
    #[instrument(skip(self, asin), fields(asin = %asin))]
    pub async fn put(&self, key: &str, asin: &Asin, source: &str) {
        let result = sqlx::query(
            "INSERT INTO asin_cache (key, asin, source, cached_at, ttl_seconds) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET \
               asin = excluded.asin, source = excluded.source, \
               cached_at = excluded.cached_at, ttl_seconds = excluded.ttl_seconds",
        )
        .bind(key)
        .bind(asin.as_str())
        .bind(source)
        .bind(unix_now())
        .bind(self.ttl_seconds)
        .execute(self.db.pool())
        .await;

        if let Err(error) = result {
            warn!(%error, key, "ASIN cache write failed; continuing without persistence");
        }
    }

    /// Deletes entries past their TTL. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store rejects the sweep.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<u64, CacheError> {
        let result =
            sqlx::query("DELETE FROM asin_cache WHERE ? - cached_at > ttl_seconds")
                .bind(unix_now())
                .execute(self.db.pool())
                .await?;
        debug!(removed = result.rows_affected(), "swept expired ASIN cache entries");
        Ok(result.rows_affected())
    }

    /// Number of live (unexpired) entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store rejects the count.
    pub async fn len(&self) -> Result<u64, CacheError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM asin_cache WHERE ? - cached_at <= ttl_seconds",
        )
        .bind(unix_now())
        .fetch_one(self.db.pool())
        .await?;
        let n: i64 = row.get("n");
        Ok(n.unsigned_abs())
    }

    /// True when no live entries remain.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store rejects the count.
    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }
}

/// Wall-clock seconds since the epoch. Clock skew is not compensated.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
