//! Content-based format detection: magic bytes, archive introspection, and
//! an optional `file(1)` fallback.
//!
//! The first 100 bytes decide most formats; ZIP containers are opened to
//! tell EPUBs from Office documents and plain archives, and the MOBI family
//! is classified by the PDB type signature at offset 60.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;

use tracing::debug;
use zip::ZipArchive;

/// Bytes read for magic-number sniffing. Covers the MOBI signature at 60..68.
const SNIFF_LEN: usize = 100;

/// eBook extensions the validator knows how to handle.
pub const EBOOK_EXTENSIONS: &[&str] = &[
    "mobi", "epub", "azw", "azw3", "pdf", "txt", "fb2", "lit", "pdb", "rtf", "docx", "doc",
];

/// Detects the actual format of a file.
///
/// Returns `(format, mime)` where either side may be absent. Magic bytes are
/// tried first; when inconclusive, the host `file(1)` utility is consulted
/// if present. A missing tool is not an error.
#[must_use]
pub fn detect_format(path: &Path) -> (Option<String>, Option<String>) {
    if let Some(format) = detect_by_magic_bytes(path) {
        return (Some(format), None);
    }
    file_command_fallback(path)
}

/// Magic-byte classification over the first 100 bytes.
#[must_use]
pub fn detect_by_magic_bytes(path: &Path) -> Option<String> {
    let mut header = [0u8; SNIFF_LEN];
    let len = match File::open(path).and_then(|mut f| read_up_to(&mut f, &mut header)) {
        Ok(len) => len,
        Err(_) => return None,
    };
    let header = &header[..len];
    if header.is_empty() {
        return None;
    }

    // ZIP container: EPUB, Office Open XML, or a plain archive
    if header.starts_with(b"PK\x03\x04") {
        return Some(classify_zip(path));
    }

    // MOBI family: PDB type signature at bytes 60..68
    if header.len() >= 68 {
        match &header[60..68] {
            b"BOOKMOBI" => return Some("mobi".to_string()),
            b"TPZ3\x00\x00\x00\x00" => return Some("azw3".to_string()),
            _ => {}
        }
    }
    if header.windows(3).any(|w| w == b"TPZ") {
        return Some("azw".to_string());
    }

    if header.starts_with(b"%PDF") {
        return Some("pdf".to_string());
    }

    // Legacy MS Office compound document (Word files misnamed as eBooks)
    if header.starts_with(b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1") {
        return Some("ms_office".to_string());
    }

    if let Ok(text) = std::str::from_utf8(header)
        && text
            .chars()
            .all(|c| c.is_ascii_graphic() || c == ' ' || matches!(c, '\n' | '\r' | '\t'))
    {
        return Some("txt".to_string());
    }

    None
}

/// Classifies a ZIP container by its members.
fn classify_zip(path: &Path) -> String {
    let Ok(file) = File::open(path) else {
        return "corrupted_zip".to_string();
    };
    let Ok(mut archive) = ZipArchive::new(file) else {
        return "corrupted_zip".to_string();
    };

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    if names.iter().any(|n| n == "mimetype") {
        let mut mimetype = String::new();
        let is_epub = archive
            .by_name("mimetype")
            .ok()
            .and_then(|mut member| member.read_to_string(&mut mimetype).ok())
            .is_some()
            && mimetype.trim() == "application/epub+zip";
        if is_epub {
            return "epub".to_string();
        }
    }

    if names.iter().any(|n| n == "[Content_Types].xml") {
        if names.iter().any(|n| n.starts_with("word/")) {
            return "docx".to_string();
        }
        return "office_document".to_string();
    }

    "zip".to_string()
}

/// `file(1)` fallback for inconclusive magic bytes.
fn file_command_fallback(path: &Path) -> (Option<String>, Option<String>) {
    // MIME mode first
    if let Some(mime) = run_file_command(path, true) {
        if let Some(format) = mime_to_format(&mime) {
            return (Some(format.to_string()), Some(mime));
        }
    }

    // Descriptive mode catches formats the MIME table misses
    if let Some(description) = run_file_command(path, false) {
        let lower = description.to_lowercase();
        let format = if lower.contains("mobipocket") {
            Some("mobi")
        } else if lower.contains("epub") {
            Some("epub")
        } else if lower.contains("pdf") {
            Some("pdf")
        } else {
            None
        };
        if let Some(format) = format {
            return (Some(format.to_string()), Some(description));
        }
    }

    (None, None)
}

fn run_file_command(path: &Path, mime: bool) -> Option<String> {
    let mut command = Command::new("file");
    if mime {
        command.arg("--mime-type");
    }
    let output = command.arg("--brief").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(path = %path.display(), %value, mime, "file(1) fallback");
    (!value.is_empty()).then_some(value)
}

/// Maps a MIME type to a format name.
fn mime_to_format(mime: &str) -> Option<&'static str> {
    if mime.to_lowercase().contains("mobipocket") {
        return Some("mobi");
    }
    match mime {
        "application/epub+zip" => Some("epub"),
        "application/x-mobipocket-ebook" => Some("mobi"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        "application/zip" => Some("zip"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        _ => None,
    }
}

/// The format a file's extension claims.
#[must_use]
pub fn expected_format_from_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Compatibility classes absorbing near-equivalent detections: an EPUB is a
/// ZIP, and the Amazon formats share one container family.
#[must_use]
pub fn formats_compatible(expected: &str, detected: &str) -> bool {
    let class: &[&str] = match expected {
        "epub" => &["epub", "zip"],
        "mobi" | "azw" | "azw3" => &["mobi", "azw", "azw3"],
        other => return other == detected,
    };
    class.contains(&detected)
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
