//! Persistent cache of validation verdicts.
//!
//! Keys are SHA-256 digests of `(canonical_path, size, mtime_ns)`, so
//! replacing a file invalidates its entry automatically and stale verdicts
//! are never returned. The payload is the serialized result minus the file
//! path. A store that fails to load or write degrades silently: correctness
//! never depends on persistence.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::{debug, instrument, warn};

use super::ValidationResult;
use crate::db::Database;

/// Persistent validation verdict cache over the shared [`Database`].
#[derive(Debug, Clone)]
pub struct ValidationCache {
    db: Database,
}

impl ValidationCache {
    /// Creates the cache over an opened store.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Computes the cache key for a file from its identity triple.
    ///
    /// When the file cannot be stat'd the key falls back to the path alone,
    /// so a later successful stat produces a different (fresh) key.
    #[must_use]
    pub fn file_key(path: &Path) -> String {
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        let mut hasher = Sha256::new();
        match std::fs::metadata(&canonical) {
            Ok(meta) => {
                let mtime_ns = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                hasher.update(
                    format!("{}:{}:{}", canonical.display(), meta.len(), mtime_ns).as_bytes(),
                );
            }
            Err(_) => hasher.update(canonical.display().to_string().as_bytes()),
        }
        format!("{:x}", hasher.finalize())
    }

    /// Fetches a cached verdict for the file, if its identity still matches.
    ///
    /// Undecodable payloads are evicted and treated as misses.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn get(&self, path: &Path) -> Option<ValidationResult> {
        let key = Self::file_key(path);
        let row = sqlx::query("SELECT payload FROM validation_cache WHERE key = ?")
            .bind(&key)
            .fetch_optional(self.db.pool())
            .await;

        let row = match row {
            Ok(row) => row?,
            Err(error) => {
                warn!(%error, "validation cache read failed; treating as miss");
                return None;
            }
        };

        let payload: String = row.get("payload");
        match serde_json::from_str::<ValidationResult>(&payload) {
            Ok(mut result) => {
                result.file_path = path.to_path_buf();
                debug!("validation cache hit");
                Some(result)
            }
            Err(error) => {
                warn!(%error, "evicting undecodable validation cache entry");
                let _ = sqlx::query("DELETE FROM validation_cache WHERE key = ?")
                    .bind(&key)
                    .execute(self.db.pool())
                    .await;
                None
            }
        }
    }

    /// Stores a verdict. Best-effort: failures are logged and swallowed.
    #[instrument(skip(self, result), fields(path = %result.file_path.display()))]
    pub async fn put(&self, result: &ValidationResult) {
        let key = Self::file_key(&result.file_path);
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "validation result not serializable; skipping cache write");
                return;
            }
        };

        let now = std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or(0);

        let write = sqlx::query(
            "INSERT INTO validation_cache (key, payload, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET \
               payload = excluded.payload, created_at = excluded.created_at",
        )
        .bind(&key)
        .bind(&payload)
        .bind(now)
        .execute(self.db.pool())
        .await;

        if let Err(error) = write {
            warn!(%error, "validation cache write failed; continuing without persistence");
        }
    }

    /// Drops every cached verdict.
    pub async fn clear(&self) {
        if let Err(error) = sqlx::query("DELETE FROM validation_cache")
            .execute(self.db.pool())
            .await
        {
            warn!(%error, "validation cache clear failed");
        }
    }
}
