//! Format-specific integrity checks and the per-file validation pipeline.
//!
//! EPUBs are checked as OCF containers (mimetype member, container.xml,
//! package document); the MOBI family is checked via its PDB header. All
//! other formats pass with a generic verdict.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::instrument;
use zip::ZipArchive;

use super::detector::{
    detect_format, expected_format_from_extension, formats_compatible,
};
use super::{ValidationResult, ValidationStatus};

/// The literal contents the `mimetype` member must carry.
const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Validates EPUB container structure and required components.
#[must_use]
#[instrument(skip(path), fields(path = %path.display()))]
pub fn validate_epub(path: &Path) -> ValidationResult {
    let mut result = ValidationResult::new(ValidationStatus::Valid, path);
    result.format_expected = Some("epub".to_string());

    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            result.status = ValidationStatus::Unreadable;
            result.add_error(format!("Cannot read file: {error}"));
            return result;
        }
    };

    let mut archive = match ZipArchive::new(file) {
        Ok(archive) => archive,
        Err(_) => {
            result.status = ValidationStatus::Corrupted;
            result.add_error("File is not a valid ZIP archive");
            result.format_detected = Some("corrupted_zip".to_string());
            return result;
        }
    };

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    if names.iter().any(|n| n == "mimetype") {
        let mut mimetype = String::new();
        match archive
            .by_name("mimetype")
            .map_err(|e| e.to_string())
            .and_then(|mut member| {
                member
                    .read_to_string(&mut mimetype)
                    .map_err(|e| e.to_string())
            }) {
            Ok(_) => {
                let mimetype = mimetype.trim().to_string();
                if mimetype != EPUB_MIMETYPE {
                    result.status = ValidationStatus::Invalid;
                    result.add_error(format!("Invalid mimetype: {mimetype}"));
                }
                result.add_detail("mimetype", mimetype);
            }
            Err(error) => {
                result.status = ValidationStatus::Invalid;
                result.add_error(format!("Cannot read mimetype: {error}"));
            }
        }
    } else {
        result.status = ValidationStatus::Invalid;
        result.add_error("Missing required 'mimetype' file");
    }

    if names.iter().any(|n| n == "META-INF/container.xml") {
        result.add_detail("has_container_xml", true);
    } else {
        result.status = ValidationStatus::Invalid;
        result.add_error("Missing required 'META-INF/container.xml'");
    }

    let opf_files: Vec<String> = names
        .iter()
        .filter(|n| n.ends_with(".opf"))
        .cloned()
        .collect();
    if opf_files.is_empty() {
        result.status = ValidationStatus::Invalid;
        result.add_error("No OPF (package document) file found");
    } else {
        result.add_detail("opf_files", opf_files);
    }

    result.add_detail("total_files", names.len());
    result.add_detail(
        "has_images",
        names.iter().any(|n| {
            let n = n.to_lowercase();
            [".jpg", ".jpeg", ".png", ".gif", ".svg"]
                .iter()
                .any(|ext| n.ends_with(ext))
        }),
    );
    result.add_detail(
        "has_css",
        names.iter().any(|n| n.to_lowercase().ends_with(".css")),
    );
    result.add_detail(
        "has_html",
        names.iter().any(|n| {
            let n = n.to_lowercase();
            n.ends_with(".html") || n.ends_with(".xhtml")
        }),
    );

    result.format_detected = Some(if result.status == ValidationStatus::Valid {
        "epub".to_string()
    } else {
        "corrupted_epub".to_string()
    });

    result
}

/// Validates a MOBI/AZW/AZW3 file's PDB header.
#[must_use]
#[instrument(skip(path), fields(path = %path.display()))]
pub fn validate_mobi(path: &Path) -> ValidationResult {
    let mut result = ValidationResult::new(ValidationStatus::Valid, path);
    result.format_expected = Some("mobi".to_string());

    let mut header = [0u8; 1024];
    let len = match File::open(path).and_then(|mut f| read_up_to(&mut f, &mut header)) {
        Ok(len) => len,
        Err(error) => {
            result.status = ValidationStatus::Unreadable;
            result.add_error(format!("Cannot read file: {error}"));
            return result;
        }
    };
    let header = &header[..len];

    if header.len() < 68 {
        result.status = ValidationStatus::Invalid;
        result.add_error("File too small to be a valid MOBI file");
        return result;
    }

    match &header[60..68] {
        b"BOOKMOBI" => {
            result.format_detected = Some("mobi".to_string());
            result.add_detail("mobi_type", "BOOKMOBI");
        }
        b"TPZ3\x00\x00\x00\x00" => {
            result.format_detected = Some("azw3".to_string());
            result.add_detail("mobi_type", "TPZ3");
        }
        _ => {
            if header[..header.len().min(100)].windows(3).any(|w| w == b"TPZ") {
                result.format_detected = Some("azw".to_string());
                result.add_detail("mobi_type", "TPZ");
                result.add_warning("Non-standard TPZ signature; classifying as AZW");
            } else {
                result.status = ValidationStatus::Invalid;
                result.add_error("Invalid MOBI signature - not a valid MOBI/AZW file");
                return result;
            }
        }
    }

    // PDB header fields: database name, creation date, record count
    let db_name = String::from_utf8_lossy(&header[..32])
        .trim_end_matches('\0')
        .to_string();
    result.add_detail("database_name", db_name);

    let creation_date = u32::from_be_bytes([header[36], header[37], header[38], header[39]]);
    result.add_detail("creation_date", creation_date);

    if header.len() >= 78 {
        let record_count = u16::from_be_bytes([header[76], header[77]]);
        result.add_detail("record_count", record_count);
        if record_count == 0 {
            result.add_warning("MOBI file has no records");
        }
    }

    result
}

/// The complete per-file validation pipeline: readability, emptiness,
/// extension-vs-content agreement, then format-specific structure.
#[must_use]
#[instrument(skip(path), fields(path = %path.display()))]
pub fn validate_file_format(path: &Path) -> ValidationResult {
    if !path.exists() {
        return ValidationResult::failed(
            ValidationStatus::Unreadable,
            path,
            "File does not exist",
        );
    }
    if !path.is_file() {
        return ValidationResult::failed(
            ValidationStatus::Unreadable,
            path,
            "Path is not a regular file",
        );
    }

    let file_size = match path.metadata() {
        Ok(meta) => meta.len(),
        Err(error) => {
            return ValidationResult::failed(
                ValidationStatus::Unreadable,
                path,
                format!("Cannot read file stats: {error}"),
            );
        }
    };
    if file_size == 0 {
        return ValidationResult::failed(ValidationStatus::Invalid, path, "File is empty");
    }

    let expected = expected_format_from_extension(path);
    let (detected, _mime) = detect_format(path);

    // A ZIP that would not open is corrupted, not mismatched: route straight
    // to the container check so the verdict carries the archive error.
    if detected.as_deref() == Some("corrupted_zip") {
        return validate_epub(path);
    }

    if let (Some(expected), Some(detected)) = (expected.as_deref(), detected.as_deref())
        && !formats_compatible(expected, detected)
    {
        let mut result = ValidationResult::failed(
            ValidationStatus::ExtensionMismatch,
            path,
            format!("Extension mismatch: expected {expected}, detected {detected}"),
        );
        result.format_expected = Some(expected.to_string());
        result.format_detected = Some(detected.to_string());
        return result;
    }

    let epub = expected.as_deref() == Some("epub") || detected.as_deref() == Some("epub");
    let mobi_family = |f: Option<&str>| matches!(f, Some("mobi" | "azw" | "azw3"));

    if epub {
        validate_epub(path)
    } else if mobi_family(expected.as_deref()) || mobi_family(detected.as_deref()) {
        validate_mobi(path)
    } else {
        let mut result = ValidationResult::new(ValidationStatus::Valid, path);
        result.format_expected = expected;
        result.format_detected = detected;
        result.add_detail("file_size", file_size);
        result.add_detail("readable", true);
        result
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
