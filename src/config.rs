//! Configuration loading for the CLI.
//!
//! The config file is JSON with two sections consumed by the core:
//! `asin_lookup` (cache path, source subset, rate limit) and `conversion`
//! (parallelism cap, output directory, KFX plugin requirement). A missing
//! file yields defaults; a malformed file or out-of-range value is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::asin::SourceId;
use crate::convert::ConverterSettings;

/// Bounds for `conversion.max_parallel`.
const MAX_PARALLEL_RANGE: std::ops::RangeInclusive<usize> = 1..=16;

/// Configuration errors surfaced at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but is not valid JSON of the expected shape.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A value is outside its documented range.
    #[error("invalid config value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// `asin_lookup` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsinLookupConfig {
    /// Path of the cache store.
    pub cache_path: PathBuf,
    /// Source subset to consult; unknown names are warned about and dropped.
    pub sources: Vec<String>,
    /// Minimum seconds between requests to one host.
    pub rate_limit: f64,
}

impl Default for AsinLookupConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            sources: vec![
                "isbn-direct".to_string(),
                "amazon-search".to_string(),
                "google-books".to_string(),
                "openlibrary".to_string(),
            ],
            rate_limit: 2.0,
        }
    }
}

impl AsinLookupConfig {
    /// The configured rate limit as a duration.
    #[must_use]
    pub fn rate_limit_duration(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit.max(0.0))
    }

    /// Resolves the configured source names to the closed source set.
    ///
    /// Unknown names (including the accepted-but-unimplemented `goodreads`)
    /// are dropped with a warning.
    #[must_use]
    pub fn resolved_sources(&self) -> Vec<SourceId> {
        let mut resolved = Vec::new();
        for name in &self.sources {
            match SourceId::from_config_name(name) {
                Some(source) => {
                    if !resolved.contains(&source) {
                        resolved.push(source);
                    }
                }
                None => warn!(source = %name, "ignoring unimplemented ASIN source"),
            }
        }
        resolved
    }
}

/// `conversion` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Worker-pool cap, 1..=16.
    pub max_parallel: usize,
    /// Output directory for converted books.
    pub output_path: PathBuf,
    /// Refuse KFX work without the Output plugin.
    pub kfx_plugin_required: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            output_path: default_output_path(),
            kfx_plugin_required: true,
        }
    }
}

impl ConversionConfig {
    /// Converts the section into converter settings.
    #[must_use]
    pub fn converter_settings(&self) -> ConverterSettings {
        ConverterSettings {
            max_parallel: self.max_parallel,
            output_path: self.output_path.clone(),
            kfx_plugin_required: self.kfx_plugin_required,
        }
    }
}

/// Whole-file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub asin_lookup: AsinLookupConfig,
    pub conversion: ConversionConfig,
}

impl AppConfig {
    /// Loads configuration from `path`, or defaults when `path` is `None`
    /// or does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable or malformed files and for
    /// out-of-range values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config: Self =
                    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                debug!(path = %path.display(), "loaded config file");
                config
            }
            Some(path) => {
                debug!(path = %path.display(), "config file missing; using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !MAX_PARALLEL_RANGE.contains(&self.conversion.max_parallel) {
            return Err(ConfigError::InvalidValue {
                key: "conversion.max_parallel",
                message: format!(
                    "{} is outside {}..={}",
                    self.conversion.max_parallel,
                    MAX_PARALLEL_RANGE.start(),
                    MAX_PARALLEL_RANGE.end()
                ),
            });
        }
        if !self.rate_limit_is_sane() {
            return Err(ConfigError::InvalidValue {
                key: "asin_lookup.rate_limit",
                message: format!("{} must be a non-negative number", self.asin_lookup.rate_limit),
            });
        }
        Ok(())
    }

    fn rate_limit_is_sane(&self) -> bool {
        self.asin_lookup.rate_limit.is_finite() && self.asin_lookup.rate_limit >= 0.0
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn default_cache_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(".cache").join("bookprep").join("caches.db"))
        .unwrap_or_else(|| PathBuf::from("bookprep-caches.db"))
}

fn default_output_path() -> PathBuf {
    home_dir()
        .map(|home| home.join("Converted-Books"))
        .unwrap_or_else(|| PathBuf::from("converted-books"))
}
