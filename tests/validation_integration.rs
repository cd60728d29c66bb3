//! Integration tests for the file validation engine.
//!
//! Fixtures are built on the fly with tempfile; round-trip laws and the
//! boundary cases run through the public validator API.

use bookprep_core::validation::detector::detect_format;
use bookprep_core::validation::structural::validate_file_format;
use bookprep_core::{Database, FileValidator, ValidateOptions, ValidationStatus};
use tempfile::TempDir;

mod support;
use support::fixtures::{write_minimal_epub, write_mobi, write_zip};

async fn validator() -> FileValidator {
    FileValidator::new(Database::new_in_memory().await.unwrap())
}

// ==================== Round-trip laws ====================

#[test]
fn test_built_epub_detects_and_validates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    write_minimal_epub(&path);

    let (format, _mime) = detect_format(&path);
    assert_eq!(format.as_deref(), Some("epub"));

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Valid);
    assert!(result.errors.is_empty());
}

#[test]
fn test_built_mobi_detects_and_validates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.mobi");
    write_mobi(&path, 12);

    let (format, _mime) = detect_format(&path);
    assert_eq!(format.as_deref(), Some("mobi"));

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Valid);
}

// ==================== Spec scenarios ====================

#[test]
fn test_pdf_content_under_epub_extension_is_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    std::fs::write(&path, b"%PDF-1.5 body").unwrap();

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::ExtensionMismatch);
    assert_eq!(result.format_expected.as_deref(), Some("epub"));
    assert_eq!(result.format_detected.as_deref(), Some("pdf"));
    assert!(!result.errors.is_empty());
}

#[test]
fn test_corrupted_zip_under_epub_extension_is_corrupted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    // ZIP signature, garbage afterwards
    std::fs::write(&path, b"PK\x03\x04\xde\xad\xbe\xef").unwrap();

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Corrupted);
    assert_eq!(result.format_detected.as_deref(), Some("corrupted_zip"));
}

// ==================== Boundary cases ====================

#[test]
fn test_empty_file_is_invalid_with_message() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.epub");
    std::fs::write(&path, b"").unwrap();

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Invalid);
    assert!(result.errors.iter().any(|e| e == "File is empty"));
}

#[test]
fn test_directory_as_file_is_unreadable() {
    let dir = TempDir::new().unwrap();
    let result = validate_file_format(dir.path());
    assert_eq!(result.status, ValidationStatus::Unreadable);
}

#[test]
fn test_zip_without_mimetype_under_epub_extension_is_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    write_zip(
        &path,
        &[
            ("META-INF/container.xml", b"<container/>"),
            ("content.opf", b"<package/>"),
        ],
    );

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Invalid);
    assert!(
        result
            .errors
            .iter()
            .any(|e| e.contains("Missing required 'mimetype'"))
    );
}

#[test]
fn test_mobi_of_67_bytes_is_too_small() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tiny.mobi");
    std::fs::write(&path, vec![0u8; 67]).unwrap();

    let result = validate_file_format(&path);
    assert_eq!(result.status, ValidationStatus::Invalid);
    assert!(result.errors.iter().any(|e| e.contains("too small")));
}

// ==================== Orchestrator behavior ====================

#[tokio::test]
async fn test_directory_run_returns_sorted_results_with_cache() {
    let dir = TempDir::new().unwrap();
    write_minimal_epub(&dir.path().join("zeta.epub"));
    write_mobi(&dir.path().join("alpha.mobi"), 4);
    std::fs::write(dir.path().join("broken.epub"), b"PK\x03\x04junk").unwrap();

    let validator = validator().await;
    let options = ValidateOptions {
        parallel: true,
        workers: 4,
        ..ValidateOptions::default()
    };

    let first = validator.validate_directory(dir.path(), &options).await;
    assert_eq!(first.len(), 3);
    let paths: Vec<_> = first.iter().map(|r| r.file_path.clone()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);

    // Second run is served from the cache and agrees with the first
    let second = validator.validate_directory(dir.path(), &options).await;
    assert_eq!(second.len(), first.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.file_path, b.file_path);
        assert_eq!(a.status, b.status);
    }

    let summary = FileValidator::summary(&second);
    assert_eq!(summary.total_files, 3);
    assert_eq!(summary.valid_files, 2);
    assert_eq!(summary.status_counts["corrupted"], 1);
}

#[tokio::test]
async fn test_single_file_failure_never_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    write_minimal_epub(&dir.path().join("good.epub"));
    std::fs::write(dir.path().join("empty.mobi"), b"").unwrap();
    std::fs::write(dir.path().join("fake.epub"), b"%PDF-1.4").unwrap();

    let validator = validator().await;
    let results = validator
        .validate_directory(dir.path(), &ValidateOptions::default())
        .await;

    assert_eq!(results.len(), 3);
    let statuses: Vec<ValidationStatus> = results.iter().map(|r| r.status).collect();
    assert!(statuses.contains(&ValidationStatus::Valid));
    assert!(statuses.contains(&ValidationStatus::Invalid));
    assert!(statuses.contains(&ValidationStatus::ExtensionMismatch));
}

#[tokio::test]
async fn test_valid_results_carry_no_errors() {
    let dir = TempDir::new().unwrap();
    write_minimal_epub(&dir.path().join("a.epub"));
    write_mobi(&dir.path().join("b.mobi"), 9);

    let validator = validator().await;
    let results = validator
        .validate_directory(dir.path(), &ValidateOptions::default())
        .await;

    for result in results {
        if result.status == ValidationStatus::Valid {
            assert!(
                result.errors.is_empty(),
                "valid result for {} carries errors",
                result.file_path.display()
            );
        }
    }
}
