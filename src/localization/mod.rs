//! Localization-aware metadata extraction for ASIN lookups.
//!
//! Non-English books sell under translated titles on regional Amazon
//! marketplaces, so lookups that only know the English store miss them.
//! This module extracts title/author/language from book files (EPUB OPF,
//! with filename heuristics as the fallback for MOBI-family and broken
//! archives), maps languages to marketplaces, and produces the ordered
//! [`SearchTerm`] sequence the resolver consumes.

mod epub;
mod search_terms;

pub use epub::EpubMetaError;
pub use search_terms::{SearchStrategy, SearchTerm, english_equivalent_title, search_terms};

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

/// Metadata extracted from a book file, best-effort.
///
/// `title`/`author` are empty strings when nothing could be recovered;
/// `language` is always a normalized two-letter code (default `en`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    pub series: Option<String>,
    pub series_index: Option<String>,
    /// Alternate title recovered alongside the primary one, if any.
    pub original_title: Option<String>,
    /// True when the fields came from filename heuristics.
    pub derived_from_filename: bool,
    /// True when the file's own metadata could not be opened (e.g. a broken
    /// EPUB archive) and heuristics took over.
    pub likely_corrupted: bool,
}

/// Maps a normalized language code to its Amazon marketplace.
///
/// Lookups not in the table fall back to `amazon.com`.
#[must_use]
pub fn marketplace_for(language: &str) -> &'static str {
    match language {
        "de" => "amazon.de",
        "fr" => "amazon.fr",
        "es" => "amazon.es",
        "it" => "amazon.it",
        "ja" => "amazon.co.jp",
        "pt" => "amazon.com.br",
        "nl" => "amazon.nl",
        _ => "amazon.com",
    }
}

/// Normalizes a language field to a two-letter code.
///
/// Three-letter and regional variants collapse onto the marketplace table's
/// codes; anything unrecognized becomes `en`.
#[must_use]
pub fn normalize_language(raw: &str) -> String {
    let code = raw.trim().to_ascii_lowercase();
    match code.as_str() {
        "deu" | "ger" => "de".to_string(),
        "jpn" => "ja".to_string(),
        "eng" => "en".to_string(),
        "pt-br" => "pt".to_string(),
        "nld" => "nl".to_string(),
        "de" | "fr" | "es" | "it" | "ja" | "pt" | "nl" | "en" => code,
        _ => "en".to_string(),
    }
}

/// Guesses a language from title substrings.
///
/// Consulted only when no language field was found. The dictionary is small
/// and skewed toward the collections this tool is run against.
#[must_use]
pub fn guess_language_from_title(title: &str) -> String {
    if title.is_empty() {
        return "en".to_string();
    }
    let title = title.to_lowercase();

    const GERMAN_INDICATORS: &[&str] = &[
        "kinder des",
        "der weg",
        "krieger des",
        "herrscher des",
        "ruf der",
        "pfad der",
    ];
    if GERMAN_INDICATORS.iter().any(|hint| title.contains(hint)) {
        return "de".to_string();
    }

    const FRENCH_INDICATORS: &[&str] = &["le chemin", "les enfants", "l'empire"];
    if FRENCH_INDICATORS.iter().any(|hint| title.contains(hint)) {
        return "fr".to_string();
    }

    "en".to_string()
}

/// `Series 01 - Title`
static SERIES_DASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+(\d+)\s*-\s*(.+)$")
        .unwrap_or_else(|e| panic!("invalid series regex: {e}"))
});
/// `Series Book 1: Title`
static SERIES_BOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+Book\s+(\d+):\s*(.+)$")
        .unwrap_or_else(|e| panic!("invalid series regex: {e}"))
});
/// `Series (1): Title`
static SERIES_PAREN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+\((\d+)\):\s*(.+)$")
        .unwrap_or_else(|e| panic!("invalid series regex: {e}"))
});

/// Splits series name and index out of a combined title string.
///
/// Returns `(series, series_index, bare_title)` when one of the known
/// patterns matches.
#[must_use]
pub(crate) fn split_series_from_title(title: &str) -> Option<(String, String, String)> {
    for re in [&*SERIES_DASH_RE, &*SERIES_BOOK_RE, &*SERIES_PAREN_RE] {
        if let Some(caps) = re.captures(title) {
            return Some((
                caps[1].trim().to_string(),
                caps[2].to_string(),
                caps[3].trim().to_string(),
            ));
        }
    }
    None
}

/// Title-cases a field recovered from a filename: each word gets an upper
/// first letter, the rest lower. Locale-sensitive for non-ASCII input.
fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts metadata from filename patterns: `author_series_title` or
/// `author_title`, with `-` standing in for spaces inside each field.
#[must_use]
pub fn extract_from_filename(path: &Path) -> BookMetadata {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut meta = BookMetadata {
        derived_from_filename: true,
        ..BookMetadata::default()
    };

    let parts: Vec<&str> = stem.splitn(3, '_').collect();
    match parts.as_slice() {
        [author, series, title] => {
            meta.author = title_case(&author.replace('-', " "));
            meta.series = Some(title_case(&series.replace('-', " ")));
            meta.title = title_case(&title.replace('-', " "));
        }
        [author, title] => {
            meta.author = title_case(&author.replace('-', " "));
            meta.title = title_case(&title.replace('-', " "));
        }
        _ => {}
    }

    meta.language = guess_language_from_title(&meta.title);
    meta
}

/// Extracts best-effort metadata from any supported file type.
///
/// EPUBs get full OPF extraction; the MOBI family carries little usable
/// metadata and falls through to filename heuristics, as does anything
/// unsupported or unreadable. This never fails: the caller always receives
/// a record, possibly flagged `likely_corrupted`.
#[must_use]
#[instrument(skip(path), fields(path = %path.display()))]
pub fn extract_metadata(path: &Path) -> BookMetadata {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "epub" => match epub::extract_epub(path) {
            Ok(mut meta) => {
                finalize_epub_metadata(&mut meta);
                debug!(title = %meta.title, language = %meta.language, "extracted OPF metadata");
                meta
            }
            Err(error) => {
                warn!(%error, "EPUB metadata extraction failed; falling back to filename");
                let mut meta = extract_from_filename(path);
                meta.likely_corrupted = true;
                meta
            }
        },
        "mobi" | "azw" | "azw3" => {
            // PDB-packed metadata is not worth parsing here; the filename
            // carries more signal for this collection.
            debug!("MOBI-family file; using filename extraction");
            extract_from_filename(path)
        }
        _ => {
            warn!(extension = %extension, "unsupported file type; using filename extraction");
            extract_from_filename(path)
        }
    }
}

/// Post-processing applied to OPF-derived metadata: series recovery from the
/// title and language inference when the OPF said nothing.
fn finalize_epub_metadata(meta: &mut BookMetadata) {
    if meta.series.is_none()
        && let Some((series, index, bare_title)) = split_series_from_title(&meta.title)
    {
        meta.series = Some(series);
        meta.series_index = Some(index);
        meta.original_title = Some(std::mem::replace(&mut meta.title, bare_title));
    }
    if meta.language.is_empty() {
        meta.language = guess_language_from_title(&meta.title);
    } else {
        meta.language = normalize_language(&meta.language);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_marketplace_table_complete() {
        assert_eq!(marketplace_for("de"), "amazon.de");
        assert_eq!(marketplace_for("fr"), "amazon.fr");
        assert_eq!(marketplace_for("es"), "amazon.es");
        assert_eq!(marketplace_for("it"), "amazon.it");
        assert_eq!(marketplace_for("ja"), "amazon.co.jp");
        assert_eq!(marketplace_for("pt"), "amazon.com.br");
        assert_eq!(marketplace_for("nl"), "amazon.nl");
        assert_eq!(marketplace_for("en"), "amazon.com");
        // Unknown codes fall back to the US store
        assert_eq!(marketplace_for("xx"), "amazon.com");
    }

    #[test]
    fn test_normalize_language_aliases() {
        assert_eq!(normalize_language("deu"), "de");
        assert_eq!(normalize_language("ger"), "de");
        assert_eq!(normalize_language("jpn"), "ja");
        assert_eq!(normalize_language("eng"), "en");
        assert_eq!(normalize_language("pt-BR"), "pt");
        assert_eq!(normalize_language("nld"), "nl");
        assert_eq!(normalize_language("DE"), "de");
        assert_eq!(normalize_language("tlh"), "en");
    }

    #[test]
    fn test_guess_language_from_title_german_and_french() {
        assert_eq!(guess_language_from_title("Kinder des Nebels"), "de");
        assert_eq!(guess_language_from_title("Der Weg der Könige"), "de");
        assert_eq!(guess_language_from_title("Les Enfants du Temps"), "fr");
        assert_eq!(guess_language_from_title("Mistborn"), "en");
        assert_eq!(guess_language_from_title(""), "en");
    }

    #[test]
    fn test_split_series_from_title_patterns() {
        assert_eq!(
            split_series_from_title("Mistborn 01 - Kinder des Nebels").unwrap(),
            (
                "Mistborn".to_string(),
                "01".to_string(),
                "Kinder des Nebels".to_string()
            )
        );
        assert_eq!(
            split_series_from_title("Stormlight Book 2: Words of Radiance").unwrap(),
            (
                "Stormlight".to_string(),
                "2".to_string(),
                "Words of Radiance".to_string()
            )
        );
        assert_eq!(
            split_series_from_title("Skyward (1): Ruf der Sterne").unwrap(),
            (
                "Skyward".to_string(),
                "1".to_string(),
                "Ruf der Sterne".to_string()
            )
        );
        assert!(split_series_from_title("Plain Title").is_none());
    }

    #[test]
    fn test_extract_from_filename_three_parts() {
        let meta =
            extract_from_filename(Path::new("sanderson_mistborn1_kinder-des-nebels.epub"));
        assert_eq!(meta.author, "Sanderson");
        assert_eq!(meta.series.as_deref(), Some("Mistborn1"));
        assert_eq!(meta.title, "Kinder Des Nebels");
        assert_eq!(meta.language, "de");
        assert!(meta.derived_from_filename);
    }

    #[test]
    fn test_extract_from_filename_two_parts() {
        let meta = extract_from_filename(Path::new("sanderson_mistborn.mobi"));
        assert_eq!(meta.author, "Sanderson");
        assert_eq!(meta.title, "Mistborn");
        assert!(meta.series.is_none());
        assert_eq!(meta.language, "en");
    }

    #[test]
    fn test_extract_from_filename_no_separator() {
        let meta = extract_from_filename(Path::new("mistborn.epub"));
        assert_eq!(meta.title, "");
        assert_eq!(meta.language, "en");
    }

    #[test]
    fn test_extract_metadata_missing_epub_falls_back_to_filename() {
        let meta = extract_metadata(Path::new("/nonexistent/sanderson_elantris.epub"));
        assert!(meta.likely_corrupted);
        assert!(meta.derived_from_filename);
        assert_eq!(meta.title, "Elantris");
        assert_eq!(meta.author, "Sanderson");
    }
}
