//! File fixtures for integration tests: minimal EPUBs, MOBI headers, and
//! stub Calibre executables.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Writes a ZIP file with the given members.
pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    for (name, contents) in members {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}

/// A minimal structurally-valid EPUB: mimetype + container.xml + one OPF.
pub fn write_minimal_epub(path: &Path) {
    write_epub_with_opf(
        path,
        r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Fixture</dc:title>
  </metadata>
</package>"#,
    );
}

/// An EPUB whose OPF carries the given package document.
pub fn write_epub_with_opf(path: &Path, opf: &str) {
    write_zip(
        path,
        &[
            ("mimetype", b"application/epub+zip"),
            (
                "META-INF/container.xml",
                br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
            ),
            ("content.opf", opf.as_bytes()),
        ],
    );
}

/// A German-language EPUB with Dublin Core metadata, for localization tests.
pub fn write_german_epub(path: &Path) {
    write_epub_with_opf(
        path,
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Kinder des Nebels</dc:title>
    <dc:creator>Brandon Sanderson</dc:creator>
    <dc:language>de</dc:language>
  </metadata>
</package>"#,
    );
}

/// A minimal MOBI header: `BOOKMOBI` at offset 60, `records` at 76..78.
pub fn write_mobi(path: &Path, records: u16) {
    let mut bytes = vec![0u8; 128];
    bytes[..4].copy_from_slice(b"Book");
    bytes[60..68].copy_from_slice(b"BOOKMOBI");
    bytes[76..78].copy_from_slice(&records.to_be_bytes());
    std::fs::write(path, bytes).unwrap();
}

/// Installs a stub `ebook-convert` that appends a line to `count_file` and
/// copies its input to its output. Returns the stub path.
#[cfg(unix)]
pub fn install_fake_ebook_convert(dir: &Path, count_file: &Path, succeed: bool) -> PathBuf {
    let body = if succeed {
        format!(
            "#!/bin/sh\necho run >> '{}'\ncp \"$1\" \"$2\"\nexit 0\n",
            count_file.display()
        )
    } else {
        format!(
            "#!/bin/sh\necho run >> '{}'\necho 'conversion exploded' >&2\nexit 1\n",
            count_file.display()
        )
    };
    install_script(dir, "ebook-convert", &body)
}

/// Installs a stub `calibre-customize` whose `-l` listing does or does not
/// contain the KFX Output plugin line. Returns the stub path.
#[cfg(unix)]
pub fn install_fake_calibre_customize(dir: &Path, with_kfx: bool) -> PathBuf {
    let listing = if with_kfx {
        "KFX Output (2, 17, 0) - Convert ebooks to KFX format"
    } else {
        "EPUB Output (1, 0, 0) - Convert ebooks to EPUB format"
    };
    install_script(
        dir,
        "calibre-customize",
        &format!("#!/bin/sh\necho '{listing}'\nexit 0\n"),
    )
}

#[cfg(unix)]
fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lines recorded by a stub's invocation counter.
pub fn invocation_count(count_file: &Path) -> usize {
    std::fs::read_to_string(count_file)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}
