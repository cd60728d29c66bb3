//! File validation engine: content-vs-extension classification and
//! format-specific integrity checks for eBook collections.
//!
//! # Architecture
//!
//! - [`detector`] - Magic-byte and archive-introspection format detection
//! - [`structural`] - EPUB/MOBI structural validators and the per-file pipeline
//! - [`ValidationCache`] - Persistent verdict store keyed by `(path, size, mtime)`
//! - [`FileValidator`] - Discovery, worker-pool fan-out, and cache integration

pub mod detector;
mod cache;
mod orchestrator;
pub mod structural;

pub use cache::ValidationCache;
pub use orchestrator::{FileValidator, ValidateOptions, ValidationSummary};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File validation status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Content checks passed.
    Valid,
    /// Structure is wrong for the claimed format.
    Invalid,
    /// The container itself would not open.
    Corrupted,
    /// Extension disagrees with detected content.
    ExtensionMismatch,
    /// Extension not in the supported set.
    UnsupportedFormat,
    /// The file could not be read at all.
    Unreadable,
}

impl ValidationStatus {
    /// Stable snake_case name, as stored in cache payloads and summaries.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Corrupted => "corrupted",
            Self::ExtensionMismatch => "extension_mismatch",
            Self::UnsupportedFormat => "unsupported_format",
            Self::Unreadable => "unreadable",
        }
    }
}

/// Result of validating one file.
///
/// Invariants: `Valid` results carry no errors; `ExtensionMismatch` results
/// carry both the expected and the detected format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The validated file. Not persisted to the cache; the cache key encodes
    /// the path already.
    #[serde(skip)]
    pub file_path: PathBuf,
    pub status: ValidationStatus,
    pub format_expected: Option<String>,
    pub format_detected: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Free-form validation details (member counts, header fields, ...).
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ValidationResult {
    /// Creates a result with the given status and no findings yet.
    #[must_use]
    pub fn new(status: ValidationStatus, file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            status,
            format_expected: None,
            format_detected: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    /// A failed result carrying a single error message.
    #[must_use]
    pub fn failed(
        status: ValidationStatus,
        file_path: impl Into<PathBuf>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(status, file_path);
        result.errors.push(error.into());
        result
    }

    /// True when the file passed validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }

    /// True when the file's extension disagrees with its content.
    #[must_use]
    pub fn has_extension_mismatch(&self) -> bool {
        self.status == ValidationStatus::ExtensionMismatch
    }

    pub(crate) fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub(crate) fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub(crate) fn add_detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }
}
