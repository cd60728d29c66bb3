//! Ordered search-term generation for the localized lookup strategy.
//!
//! Given extracted metadata, produces the attempts the resolver will make,
//! ascending by priority: the localized marketplace first, a known English
//! translation second, the series name third, and a cross-language retry of
//! the original title on `amazon.com` last.

use super::{BookMetadata, marketplace_for};

/// Which strategy produced a search term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Extracted title on the marketplace matching its language.
    LocalizedPrimary,
    /// Known English translation of the title on `amazon.com`.
    EnglishEquivalent,
    /// Series name + author on the localized marketplace.
    SeriesBased,
    /// Original title retried on `amazon.com`.
    CrossLanguageFallback,
    /// Primary attempt whose fields came from filename heuristics.
    FilenameDerived,
}

/// One attempt in the resolver's ordered strategy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub title: String,
    pub author: Option<String>,
    pub language: String,
    /// Marketplace domain, e.g. `amazon.de`.
    pub marketplace: &'static str,
    /// Small integer; the resolver consumes terms in ascending order.
    pub priority: u8,
    pub strategy: SearchStrategy,
}

/// Hand-maintained translation tables for series this tool is pointed at.
/// Index i of a translated list corresponds to index i of the English list.
/// Coverage is a known limitation, not a design flaw.
const SERIES_TRANSLATIONS: &[(&[&str], &[&str])] = &[
    (
        &[
            "Mistborn",
            "The Final Empire",
            "The Well of Ascension",
            "The Hero of Ages",
        ],
        &["Kinder des Nebels", "Krieger des Feuers", "Herrscher des Lichts"],
    ),
    (
        &[
            "The Way of Kings",
            "Words of Radiance",
            "Oathbringer",
            "Rhythm of War",
        ],
        &["Der Weg der Könige", "Pfad der Winde", "Schwurträger"],
    ),
    (
        &["Skyward", "Starsight", "Cytonic", "Defiant"],
        &["Ruf der Sterne", "Sternensicht"],
    ),
];

/// Looks up the English equivalent of a localized title.
///
/// Matches loosely in both directions so subtitle decorations do not defeat
/// the lookup.
#[must_use]
pub fn english_equivalent_title(title: &str) -> Option<String> {
    let needle = title.to_lowercase();
    if needle.is_empty() {
        return None;
    }

    for (english, translated) in SERIES_TRANSLATIONS {
        for (index, candidate) in translated.iter().enumerate() {
            let candidate_lower = candidate.to_lowercase();
            if candidate_lower.contains(&needle) || needle.contains(&candidate_lower) {
                return english.get(index).map(|t| (*t).to_string());
            }
        }
    }
    None
}

/// Produces the ordered search-term list for one book.
///
/// Tie-breaking is strictly by ascending priority; terms are emitted in a
/// stable order within equal priority.
#[must_use]
pub fn search_terms(meta: &BookMetadata) -> Vec<SearchTerm> {
    let mut terms = Vec::new();
    if meta.title.is_empty() {
        return terms;
    }

    let language = if meta.language.is_empty() {
        "en".to_string()
    } else {
        meta.language.clone()
    };
    let author = (!meta.author.is_empty()).then(|| meta.author.clone());
    let primary_strategy = if meta.derived_from_filename {
        SearchStrategy::FilenameDerived
    } else {
        SearchStrategy::LocalizedPrimary
    };

    terms.push(SearchTerm {
        title: meta.title.clone(),
        author: author.clone(),
        language: language.clone(),
        marketplace: marketplace_for(&language),
        priority: 1,
        strategy: primary_strategy,
    });

    if language != "en"
        && let Some(english_title) = english_equivalent_title(&meta.title)
    {
        terms.push(SearchTerm {
            title: english_title,
            author: author.clone(),
            language: "en".to_string(),
            marketplace: "amazon.com",
            priority: 2,
            strategy: SearchStrategy::EnglishEquivalent,
        });
    }

    if let Some(series) = &meta.series {
        terms.push(SearchTerm {
            title: format!("{series} {}", meta.author).trim().to_string(),
            author: author.clone(),
            language: language.clone(),
            marketplace: marketplace_for(&language),
            priority: 3,
            strategy: SearchStrategy::SeriesBased,
        });
    }

    if language != "en" {
        terms.push(SearchTerm {
            title: meta.title.clone(),
            author,
            language: "en".to_string(),
            marketplace: "amazon.com",
            priority: 4,
            strategy: SearchStrategy::CrossLanguageFallback,
        });
    }

    terms
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn german_mistborn() -> BookMetadata {
        BookMetadata {
            title: "Kinder des Nebels".to_string(),
            author: "Brandon Sanderson".to_string(),
            language: "de".to_string(),
            series: None,
            ..BookMetadata::default()
        }
    }

    #[test]
    fn test_first_term_is_localized_primary() {
        let terms = search_terms(&german_mistborn());
        let first = &terms[0];
        assert_eq!(first.title, "Kinder des Nebels");
        assert_eq!(first.marketplace, "amazon.de");
        assert_eq!(first.priority, 1);
        assert_eq!(first.strategy, SearchStrategy::LocalizedPrimary);
    }

    #[test]
    fn test_second_term_is_english_equivalent() {
        let terms = search_terms(&german_mistborn());
        let second = &terms[1];
        assert_eq!(second.title, "Mistborn");
        assert_eq!(second.marketplace, "amazon.com");
        assert_eq!(second.priority, 2);
        assert_eq!(second.strategy, SearchStrategy::EnglishEquivalent);
    }

    #[test]
    fn test_terms_ascend_by_priority() {
        let mut meta = german_mistborn();
        meta.series = Some("Mistborn".to_string());
        let terms = search_terms(&meta);
        let priorities: Vec<u8> = terms.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_series_term_targets_localized_marketplace() {
        let mut meta = german_mistborn();
        meta.series = Some("Mistborn".to_string());
        let terms = search_terms(&meta);
        let series_term = terms
            .iter()
            .find(|t| t.strategy == SearchStrategy::SeriesBased)
            .unwrap();
        assert_eq!(series_term.title, "Mistborn Brandon Sanderson");
        assert_eq!(series_term.marketplace, "amazon.de");
    }

    #[test]
    fn test_english_book_has_single_term() {
        let meta = BookMetadata {
            title: "Mistborn".to_string(),
            author: "Brandon Sanderson".to_string(),
            language: "en".to_string(),
            ..BookMetadata::default()
        };
        let terms = search_terms(&meta);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].marketplace, "amazon.com");
    }

    #[test]
    fn test_unknown_translation_skips_english_equivalent() {
        let meta = BookMetadata {
            title: "Ein unbekanntes Buch".to_string(),
            language: "de".to_string(),
            ..BookMetadata::default()
        };
        let terms = search_terms(&meta);
        assert!(
            terms
                .iter()
                .all(|t| t.strategy != SearchStrategy::EnglishEquivalent)
        );
        // The cross-language retry still runs on amazon.com
        let last = terms.last().unwrap();
        assert_eq!(last.strategy, SearchStrategy::CrossLanguageFallback);
        assert_eq!(last.marketplace, "amazon.com");
        assert_eq!(last.title, "Ein unbekanntes Buch");
    }

    #[test]
    fn test_filename_derived_primary_is_tagged() {
        let meta = BookMetadata {
            title: "Kinder Des Nebels".to_string(),
            language: "de".to_string(),
            derived_from_filename: true,
            ..BookMetadata::default()
        };
        assert_eq!(search_terms(&meta)[0].strategy, SearchStrategy::FilenameDerived);
    }

    #[test]
    fn test_english_equivalent_title_known_translations() {
        assert_eq!(
            english_equivalent_title("Kinder des Nebels").as_deref(),
            Some("Mistborn")
        );
        assert_eq!(
            english_equivalent_title("Der Weg der Könige").as_deref(),
            Some("The Way of Kings")
        );
        assert_eq!(english_equivalent_title("Unbekannt").as_deref(), None);
        assert_eq!(english_equivalent_title(""), None);
    }
}
