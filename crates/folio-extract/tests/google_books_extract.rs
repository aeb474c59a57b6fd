use std::path::PathBuf;
use std::time::Duration;

use folio_extract::{load_staged_pages, run_extract, CatalogPlan, GoogleBooksSource};
use folio_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, StagingStore};
use tempfile::tempdir;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/raw")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(5),
        user_agent: Some("folio-test/0.1".into()),
        backoff: BackoffPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        token_bucket: None,
    })
    .expect("fetcher")
}

#[tokio::test]
async fn stages_catalog_pages_and_stops_genre_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .and(query_param("q", "fiction"))
        .and(query_param("startIndex", "0"))
        .and(query_param("maxResults", "40"))
        .and(query_param("printType", "books"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(fixture("google_books_fiction_page_0.json")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .and(query_param("q", "fiction"))
        .and(query_param("startIndex", "40"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/v1/volumes"))
        .and(query_param("q", "non-fiction"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(fixture("google_books_non_fiction_page_0.json")),
        )
        .expect(3)
        .mount(&server)
        .await;

    let plan = CatalogPlan {
        api_url: format!("{}/books/v1/volumes", server.uri()),
        genres: vec!["fiction".into(), "non-fiction".into()],
        pages_per_genre: 3,
        ..Default::default()
    };
    let dir = tempdir().expect("tempdir");
    let store = StagingStore::new(dir.path().join("raw"));
    let source = GoogleBooksSource::new(fetcher(), &plan);

    let summary = run_extract(&source, &store, &plan, Uuid::new_v4())
        .await
        .expect("extract");
    assert_eq!(summary.staged_pages.len(), 4);
    assert_eq!(summary.failed_pages.len(), 1);
    assert_eq!(summary.failed_pages[0].genre, "fiction");
    assert_eq!(summary.failed_pages[0].page, 1);

    let load = load_staged_pages(&store).await.expect("load");
    assert!(load.errors.is_empty());
    assert_eq!(load.pages.len(), 4);
    assert_eq!(load.pages[0].label, "google_books_fiction_page_0");
    assert_eq!(load.record_count(), 3 + 3 * 4);
}
