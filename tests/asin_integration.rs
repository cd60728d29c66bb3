//! Integration tests for the ASIN resolution engine.
//!
//! Adapters run against wiremock servers; the engine is assembled from
//! parts so every marketplace resolves to the mock.

use std::sync::Arc;
use std::time::Duration;

use bookprep_core::asin::{
    AmazonSearchAdapter, AsinCache, AsinLookupService, GoogleBooksAdapter, IsbnDirectAdapter,
    OpenLibraryAdapter, RateGovernor, SourceAdapter, SourceQuery,
};
use bookprep_core::{Asin, Database, SourceId, validate_asin};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::fixtures::write_german_epub;

async fn governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(Duration::ZERO))
}

async fn service_against(server: &MockServer) -> AsinLookupService {
    let db = Database::new_in_memory().await.unwrap();
    let governor = governor().await;
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(IsbnDirectAdapter::with_base_url(Arc::clone(&governor), server.uri()).unwrap()),
        Arc::new(AmazonSearchAdapter::with_base_url(Arc::clone(&governor), server.uri()).unwrap()),
        Arc::new(GoogleBooksAdapter::with_base_url(Arc::clone(&governor), server.uri()).unwrap()),
        Arc::new(OpenLibraryAdapter::with_base_url(Arc::clone(&governor), server.uri()).unwrap()),
    ];
    AsinLookupService::from_parts(AsinCache::new(db), governor, adapters, Vec::new()).unwrap()
}

fn search_page(asin: &str) -> String {
    format!(
        r#"<html><body>
<div class="s-result-item" data-asin="{asin}"><span>Result</span></div>
</body></html>"#
    )
}

// ==================== Scenario: cache hit ====================

#[tokio::test]
async fn test_isbn_lookup_served_from_seeded_cache() {
    // No adapters at all: any source traffic would come back as a miss, so
    // a successful result can only have come from the seeded cache.
    let cache = AsinCache::new(Database::new_in_memory().await.unwrap());
    cache
        .put(
            "isbn_9780765326355",
            &Asin::parse("B00ZVA3XL6").unwrap(),
            "isbn-direct",
        )
        .await;
    let service =
        AsinLookupService::from_parts(cache, governor().await, Vec::new(), Vec::new()).unwrap();

    let result = service.lookup_by_isbn("9780765326355", None, true).await;
    assert!(result.success);
    assert_eq!(result.asin.unwrap().as_str(), "B00ZVA3XL6");
    assert_eq!(result.source.as_deref(), Some("cache"));
    assert!(result.from_cache);
}

// ==================== isbn-direct adapter ====================

#[tokio::test]
async fn test_isbn_direct_scrapes_redirect_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dp/9780765326355"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", "/Mistborn-Final-Empire/dp/B00ZVA3XL6"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Mistborn-Final-Empire/dp/B00ZVA3XL6"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>product page</html>"))
        .mount(&server)
        .await;

    let adapter = IsbnDirectAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let asin = adapter
        .query(&SourceQuery {
            isbn: Some("978-0-7653-2635-5"),
            ..SourceQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(asin.unwrap().as_str(), "B00ZVA3XL6");
}

#[tokio::test]
async fn test_isbn_direct_no_redirect_yields_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dp/9780765326355"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>search page</html>"))
        .mount(&server)
        .await;

    let adapter = IsbnDirectAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let asin = adapter
        .query(&SourceQuery {
            isbn: Some("9780765326355"),
            ..SourceQuery::default()
        })
        .await
        .unwrap();
    assert!(asin.is_none());
}

// ==================== amazon-search adapter ====================

#[tokio::test]
async fn test_amazon_search_extracts_first_data_asin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .and(query_param("i", "digital-text"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page("B00ZVA3XL6")))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = AmazonSearchAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let asin = adapter
        .query(&SourceQuery {
            title: Some("Mistborn"),
            author: Some("Brandon Sanderson"),
            marketplace: "amazon.com",
            ..SourceQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(asin.unwrap().as_str(), "B00ZVA3XL6");
}

#[tokio::test]
async fn test_amazon_search_server_error_is_source_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let adapter = AmazonSearchAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let result = adapter
        .query(&SourceQuery {
            title: Some("Mistborn"),
            marketplace: "amazon.com",
            ..SourceQuery::default()
        })
        .await;
    assert!(result.is_err());
}

// ==================== google-books adapter ====================

#[tokio::test]
async fn test_google_books_finds_other_identifier() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "items": [{
            "volumeInfo": {
                "industryIdentifiers": [
                    {"type": "ISBN_13", "identifier": "9780765326355"},
                    {"type": "OTHER", "identifier": "B00ZVA3XL6"}
                ]
            }
        }]
    });
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let adapter = GoogleBooksAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let asin = adapter
        .query(&SourceQuery {
            isbn: Some("9780765326355"),
            ..SourceQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(asin.unwrap().as_str(), "B00ZVA3XL6");
}

// ==================== openlibrary adapter ====================

#[tokio::test]
async fn test_openlibrary_finds_amazon_identifier() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "ISBN:9780765326355": {
            "identifiers": { "amazon": ["B00ZVA3XL6"] }
        }
    });
    Mock::given(method("GET"))
        .and(path("/api/books"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let adapter = OpenLibraryAdapter::with_base_url(governor().await, server.uri()).unwrap();
    let asin = adapter
        .query(&SourceQuery {
            isbn: Some("9780765326355"),
            ..SourceQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(asin.unwrap().as_str(), "B00ZVA3XL6");
}

// ==================== Scenario: localized German file ====================

#[tokio::test]
async fn test_german_file_generates_localized_terms_then_english_equivalent() {
    let dir = tempfile::TempDir::new().unwrap();
    let book = dir.path().join("sanderson_mistborn1_kinder-des-nebels.epub");
    write_german_epub(&book);

    let meta = bookprep_core::localization::extract_metadata(&book);
    assert_eq!(meta.title, "Kinder des Nebels");
    assert_eq!(meta.author, "Brandon Sanderson");
    assert_eq!(meta.language, "de");

    let terms = bookprep_core::localization::search_terms(&meta);
    assert!(terms.len() >= 2);

    assert_eq!(terms[0].title, "Kinder des Nebels");
    assert_eq!(terms[0].marketplace, "amazon.de");
    assert_eq!(terms[0].priority, 1);
    assert_eq!(
        terms[0].strategy,
        bookprep_core::SearchStrategy::LocalizedPrimary
    );

    assert_eq!(terms[1].title, "Mistborn");
    assert_eq!(terms[1].marketplace, "amazon.com");
    assert_eq!(terms[1].priority, 2);
    assert_eq!(
        terms[1].strategy,
        bookprep_core::SearchStrategy::EnglishEquivalent
    );
}

#[tokio::test]
async fn test_file_lookup_hits_localized_search_first() {
    let dir = tempfile::TempDir::new().unwrap();
    let book = dir.path().join("sanderson_mistborn1_kinder-des-nebels.epub");
    write_german_epub(&book);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .and(query_param("i", "digital-text"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page("B004H4XBLK")))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let result = service.lookup_by_file(&book, None, true).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.asin.unwrap().as_str(), "B004H4XBLK");
    assert_eq!(result.source.as_deref(), Some("amazon-search"));
    // Localized-primary hits score above the standard search
    assert_eq!(result.confidence, Some(0.85));

    // The first request carried the localized title
    let requests = server.received_requests().await.unwrap();
    let first_query = requests[0].url.query().unwrap_or("").to_string();
    assert!(
        first_query.contains("Kinder") && first_query.contains("Nebels"),
        "first search was not localized: {first_query}"
    );
}

// ==================== Scenario: all sources exhausted ====================

#[tokio::test]
async fn test_all_sources_exhausted_reports_every_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no results</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let result = service
        .lookup_by_title("Nonexistent Book", None, None, true)
        .await;

    assert!(!result.success);
    assert!(result.asin.is_none());
    let error = result.error.unwrap();
    assert!(error.contains("amazon-search"), "error: {error}");
    assert!(error.contains("google-books"), "error: {error}");
    assert!(error.contains("openlibrary"), "error: {error}");
}

// ==================== Engine-level details ====================

#[tokio::test]
async fn test_successful_lookup_is_cached_for_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page("B00ZVA3XL6")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let service = service_against(&server).await;
    let first = service
        .lookup_by_title("Mistborn", Some("Brandon Sanderson"), None, true)
        .await;
    assert!(first.success);
    assert!(!first.from_cache);

    let second = service
        .lookup_by_title("Mistborn", Some("Brandon Sanderson"), None, true)
        .await;
    assert!(second.success);
    assert!(second.from_cache);
    assert_eq!(second.source.as_deref(), Some("cache"));
}

#[tokio::test]
async fn test_check_availability_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dp/B00ZVA3XL6"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>buy me</html>"))
        .mount(&server)
        .await;

    let service = service_against(&server)
        .await
        .with_availability_base(server.uri());
    let report = service
        .check_availability(&Asin::parse("B00ZVA3XL6").unwrap())
        .await;
    assert!(report.available);
    assert_eq!(report.metadata.get("status").map(String::as_str), Some("200"));
}

// ==================== Universal invariants ====================

#[test]
fn test_accepted_asins_are_b_prefixed_ten_chars() {
    for accepted in ["B00ZVA3XL6", "b004h4xblk", "B000000000"] {
        assert!(validate_asin(accepted), "{accepted} should validate");
        let asin = Asin::parse(accepted).unwrap();
        assert_eq!(asin.as_str().len(), 10);
        assert!(asin.as_str().starts_with('B'));
    }
    for rejected in ["A00ZVA3XL6", "1234567890", "B00ZVA3XL", "B00ZVA3XL66", ""] {
        assert!(!validate_asin(rejected), "{rejected} should not validate");
    }
}

#[tokio::test]
async fn test_result_success_iff_asin_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page("B00ZVA3XL6")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let service = service_against(&server).await;

    let hit = service.lookup_by_title("Mistborn", None, None, true).await;
    assert_eq!(hit.success, hit.asin.is_some());

    let miss = service
        .lookup_by_isbn("0000000000", Some(&[SourceId::OpenLibrary]), true)
        .await;
    assert_eq!(miss.success, miss.asin.is_some());
}
