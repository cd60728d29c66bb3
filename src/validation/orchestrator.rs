//! Validation orchestrator: discovery, worker-pool fan-out, and cache
//! integration.
//!
//! Individual file failures never abort a run: worker panics and I/O errors
//! are converted into `Unreadable` results carrying the message, and result
//! lists always come back sorted by path regardless of completion order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::cache::ValidationCache;
use super::detector::EBOOK_EXTENSIONS;
use super::structural::validate_file_format;
use super::{ValidationResult, ValidationStatus};
use crate::db::Database;

/// Options for a directory validation run.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Walk subdirectories.
    pub recursive: bool,
    /// Restrict discovery to these formats (extensions without the dot).
    pub formats: Option<Vec<String>>,
    /// Dispatch via a worker pool when more than one file is pending.
    pub parallel: bool,
    /// Worker pool size.
    pub workers: usize,
    /// Consult and update the verdict cache.
    pub use_cache: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            formats: None,
            parallel: false,
            workers: 4,
            use_cache: true,
        }
    }
}

/// Aggregate statistics over a validation run.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    /// Count per status name.
    pub status_counts: BTreeMap<&'static str, usize>,
    /// Count per detected (or expected) format.
    pub format_counts: BTreeMap<String, usize>,
    pub extension_mismatches: usize,
    /// Paths and first errors of everything that did not pass.
    pub problem_files: Vec<(PathBuf, Vec<String>)>,
}

/// Orchestrates validation of eBook collections with caching and bounded
/// parallelism.
#[derive(Debug, Clone)]
pub struct FileValidator {
    cache: ValidationCache,
}

impl FileValidator {
    /// Creates a validator over an opened store.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            cache: ValidationCache::new(db),
        }
    }

    /// Validates a single file, consulting the cache first.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn validate_file(&self, path: &Path, use_cache: bool) -> ValidationResult {
        if use_cache
            && let Some(cached) = self.cache.get(path).await
        {
            debug!("using cached validation result");
            return cached;
        }

        let owned = path.to_path_buf();
        let result = match tokio::task::spawn_blocking(move || validate_file_format(&owned)).await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, "validation worker failed");
                ValidationResult::failed(
                    ValidationStatus::Unreadable,
                    path,
                    format!("Validation failed: {error}"),
                )
            }
        };

        if use_cache {
            self.cache.put(&result).await;
        }
        result
    }

    /// Validates every eBook file under `root`.
    ///
    /// Results are sorted by path. A missing or non-directory root yields an
    /// empty list, not an error.
    #[instrument(skip(self, root, options), fields(root = %root.display()))]
    pub async fn validate_directory(
        &self,
        root: &Path,
        options: &ValidateOptions,
    ) -> Vec<ValidationResult> {
        let files = {
            let root = root.to_path_buf();
            let recursive = options.recursive;
            let formats = options.formats.clone();
            tokio::task::spawn_blocking(move || discover_ebook_files(&root, recursive, formats.as_deref()))
                .await
                .unwrap_or_default()
        };
        info!(count = files.len(), "discovered eBook files");

        if files.is_empty() {
            return Vec::new();
        }

        let mut results = if options.parallel && files.len() > 1 {
            self.validate_files_parallel(files, options.use_cache, options.workers)
                .await
        } else {
            let mut results = Vec::with_capacity(files.len());
            for file in files {
                results.push(self.validate_file(&file, options.use_cache).await);
            }
            results
        };

        results.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        results
    }

    async fn validate_files_parallel(
        &self,
        files: Vec<PathBuf>,
        use_cache: bool,
        workers: usize,
    ) -> Vec<ValidationResult> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            let validator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ValidationResult::failed(
                        ValidationStatus::Unreadable,
                        &file,
                        "Validation failed: worker pool closed",
                    );
                };
                validator.validate_file(&file, use_cache).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(error) => {
                    // Panicking workers still produce a result row
                    warn!(%error, "validation task panicked");
                    results.push(ValidationResult::failed(
                        ValidationStatus::Unreadable,
                        PathBuf::new(),
                        format!("Validation failed: {error}"),
                    ));
                }
            }
        }
        results
    }

    /// Aggregates run statistics for reporting.
    #[must_use]
    pub fn summary(results: &[ValidationResult]) -> ValidationSummary {
        let mut summary = ValidationSummary {
            total_files: results.len(),
            ..ValidationSummary::default()
        };

        for result in results {
            *summary
                .status_counts
                .entry(result.status.as_str())
                .or_default() += 1;

            let format = result
                .format_detected
                .clone()
                .or_else(|| result.format_expected.clone())
                .unwrap_or_else(|| "unknown".to_string());
            *summary.format_counts.entry(format).or_default() += 1;

            if result.has_extension_mismatch() {
                summary.extension_mismatches += 1;
            }
            if result.is_valid() {
                summary.valid_files += 1;
            } else {
                summary
                    .problem_files
                    .push((result.file_path.clone(), result.errors.clone()));
            }
        }
        summary.invalid_files = summary.total_files - summary.valid_files;
        summary
    }

    /// Drops every cached verdict.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        info!("validation cache cleared");
    }
}

/// Walks `root` collecting files whose extension is in the known eBook set,
/// optionally intersected with a caller-supplied format filter. Output is
/// sorted by path for deterministic runs.
fn discover_ebook_files(
    root: &Path,
    recursive: bool,
    formats: Option<&[String]>,
) -> Vec<PathBuf> {
    let allowed: Vec<String> = match formats {
        Some(formats) => {
            let requested: Vec<String> = formats
                .iter()
                .map(|f| f.trim_start_matches('.').to_lowercase())
                .collect();
            EBOOK_EXTENSIONS
                .iter()
                .filter(|ext| requested.iter().any(|r| r == *ext))
                .map(|ext| (*ext).to_string())
                .collect()
        }
        None => EBOOK_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
    };

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
                continue;
            }
            let Some(extension) = path.extension().map(|e| e.to_string_lossy().to_lowercase())
            else {
                continue;
            };
            if allowed.iter().any(|a| *a == extension) {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::validation::structural::tests_support::{write_minimal_epub, write_mobi};
    use tempfile::TempDir;

    async fn validator() -> FileValidator {
        FileValidator::new(Database::new_in_memory().await.unwrap())
    }

    fn build_library(dir: &TempDir) {
        write_minimal_epub(&dir.path().join("a_book.epub"));
        write_mobi(&dir.path().join("b_book.mobi"), 5);
        std::fs::write(dir.path().join("notes.md"), b"not an ebook").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_mobi(&dir.path().join("nested/c_book.mobi"), 5);
    }

    #[tokio::test]
    async fn test_validate_directory_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        build_library(&dir);

        let validator = validator().await;
        let results = validator
            .validate_directory(dir.path(), &ValidateOptions::default())
            .await;

        // Non-recursive: nested/ and notes.md excluded
        assert_eq!(results.len(), 2);
        assert!(results[0].file_path < results[1].file_path);
        assert!(results.iter().all(ValidationResult::is_valid));
    }

    #[tokio::test]
    async fn test_validate_directory_recursive_parallel() {
        let dir = TempDir::new().unwrap();
        build_library(&dir);

        let validator = validator().await;
        let options = ValidateOptions {
            recursive: true,
            parallel: true,
            workers: 4,
            ..ValidateOptions::default()
        };
        let results = validator.validate_directory(dir.path(), &options).await;

        assert_eq!(results.len(), 3);
        let paths: Vec<_> = results.iter().map(|r| r.file_path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted, "results must be sorted by path");
    }

    #[tokio::test]
    async fn test_format_filter_restricts_discovery() {
        let dir = TempDir::new().unwrap();
        build_library(&dir);

        let validator = validator().await;
        let options = ValidateOptions {
            formats: Some(vec!["mobi".to_string()]),
            ..ValidateOptions::default()
        };
        let results = validator.validate_directory(dir.path(), &options).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].format_detected.as_deref(), Some("mobi"));
    }

    #[tokio::test]
    async fn test_missing_root_yields_empty_list() {
        let validator = validator().await;
        let results = validator
            .validate_directory(Path::new("/nonexistent/library"), &ValidateOptions::default())
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_second_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.mobi");
        write_mobi(&path, 7);

        let validator = validator().await;
        let first = validator.validate_file(&path, true).await;
        assert!(first.is_valid());

        // Second call is served from the cache and still carries the path
        let second = validator.validate_file(&path, true).await;
        assert_eq!(second.file_path, path);
        assert_eq!(second.status, first.status);
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let dir = TempDir::new().unwrap();
        write_minimal_epub(&dir.path().join("good.epub"));
        std::fs::write(dir.path().join("fake.epub"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("empty.mobi"), b"").unwrap();

        let validator = validator().await;
        let results = validator
            .validate_directory(dir.path(), &ValidateOptions::default())
            .await;
        let summary = FileValidator::summary(&results);

        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.valid_files, 1);
        assert_eq!(summary.invalid_files, 2);
        assert_eq!(summary.extension_mismatches, 1);
        assert_eq!(summary.status_counts["valid"], 1);
        assert_eq!(summary.problem_files.len(), 2);
    }
}
