//! OPF metadata extraction from EPUB containers.
//!
//! Reads `META-INF/container.xml` to locate the package document, then pulls
//! Dublin Core `title`/`creator`/`language` plus the `calibre:series` meta
//! conventions out of it. Failures bubble up so the caller can degrade to
//! filename heuristics.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use zip::ZipArchive;

use super::BookMetadata;

/// Errors opening or parsing an EPUB's metadata.
#[derive(Debug, Error)]
pub enum EpubMetaError {
    /// The file could not be opened or read.
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a readable ZIP archive.
    #[error("not a valid ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// container.xml or the OPF did not parse.
    #[error("malformed package XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// container.xml carried no rootfile path.
    #[error("container.xml has no rootfile entry")]
    MissingRootfile,
}

/// Extracts OPF metadata from an EPUB file.
///
/// # Errors
///
/// Returns [`EpubMetaError`] when the archive cannot be opened or the
/// package XML is malformed.
pub(crate) fn extract_epub(path: &Path) -> Result<BookMetadata, EpubMetaError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let container = read_member(&mut archive, "META-INF/container.xml")?;
    let opf_path = find_opf_path(&container)?;
    let opf = read_member(&mut archive, &opf_path)?;

    parse_opf_metadata(&opf)
}

fn read_member(
    archive: &mut ZipArchive<File>,
    name: &str,
) -> Result<String, EpubMetaError> {
    let mut member = archive.by_name(name)?;
    let mut content = String::new();
    member.read_to_string(&mut content)?;
    Ok(content)
}

/// Finds the package document path from container.xml.
fn find_opf_path(container: &str) -> Result<String, EpubMetaError> {
    let mut reader = Reader::from_str(container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e) | Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return String::from_utf8(attr.value.to_vec())
                            .map_err(|_| EpubMetaError::MissingRootfile);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EpubMetaError::Xml(e)),
            _ => {}
        }
    }
    Err(EpubMetaError::MissingRootfile)
}

/// Pulls title, creator, language, and the calibre series meta names out of
/// an OPF document. Only the first occurrence of each Dublin Core field is
/// used.
fn parse_opf_metadata(opf: &str) -> Result<BookMetadata, EpubMetaError> {
    let mut reader = Reader::from_str(opf);
    reader.config_mut().trim_text(true);

    let mut meta = BookMetadata::default();
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = match local_name(e.name().as_ref()) {
                    b"title" if meta.title.is_empty() => Some("title"),
                    b"creator" if meta.author.is_empty() => Some("creator"),
                    b"language" if meta.language.is_empty() => Some("language"),
                    _ => None,
                };
                if local_name(e.name().as_ref()) == b"meta" {
                    read_meta_attrs(&e, &mut meta);
                }
            }
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == b"meta" {
                    read_meta_attrs(&e, &mut meta);
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(field) = current {
                    let value = String::from_utf8_lossy(text.as_ref()).trim().to_string();
                    match field {
                        "title" => meta.title = value,
                        "creator" => meta.author = value,
                        "language" => meta.language = value,
                        _ => {}
                    }
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(EpubMetaError::Xml(e)),
            _ => {}
        }
    }

    Ok(meta)
}

/// Reads `calibre:series` / `calibre:series_index` out of a `<meta>` element.
/// These are external-tool conventions, not part of the OPF spec.
fn read_meta_attrs(element: &quick_xml::events::BytesStart<'_>, meta: &mut BookMetadata) {
    let mut name = None;
    let mut content = None;
    for attr in element.attributes().flatten() {
        match attr.key.as_ref() {
            b"name" => name = String::from_utf8(attr.value.to_vec()).ok(),
            b"content" => content = String::from_utf8(attr.value.to_vec()).ok(),
            _ => {}
        }
    }
    let (Some(name), Some(content)) = (name, content) else {
        return;
    };
    match name.to_lowercase().as_str() {
        "calibre:series" => meta.series = Some(content),
        "calibre:series_index" => meta.series_index = Some(content),
        _ => {}
    }
}

/// Strips a namespace prefix: `dc:title` becomes `title`.
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map_or(name, |pos| &name[pos + 1..])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Kinder des Nebels</dc:title>
    <dc:creator opf:role="aut">Brandon Sanderson</dc:creator>
    <dc:language>de</dc:language>
    <meta name="calibre:series" content="Mistborn"/>
    <meta name="calibre:series_index" content="1"/>
  </metadata>
</package>"#;

    #[test]
    fn test_parse_opf_metadata_extracts_dublin_core_and_series() {
        let meta = parse_opf_metadata(OPF).unwrap();
        assert_eq!(meta.title, "Kinder des Nebels");
        assert_eq!(meta.author, "Brandon Sanderson");
        assert_eq!(meta.language, "de");
        assert_eq!(meta.series.as_deref(), Some("Mistborn"));
        assert_eq!(meta.series_index.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_opf_metadata_first_title_wins() {
        let opf = r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>First</dc:title><dc:title>Second</dc:title>
        </metadata></package>"#;
        let meta = parse_opf_metadata(opf).unwrap();
        assert_eq!(meta.title, "First");
    }

    #[test]
    fn test_find_opf_path_reads_rootfile() {
        let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(find_opf_path(container).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_find_opf_path_missing_rootfile_errors() {
        assert!(matches!(
            find_opf_path("<container/>"),
            Err(EpubMetaError::MissingRootfile)
        ));
    }

    #[test]
    fn test_local_name_strips_prefix() {
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b"title"), b"title");
    }
}
