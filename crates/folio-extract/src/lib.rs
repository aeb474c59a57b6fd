//! Catalog query plan, the extract stage, and staged page loading.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use folio_core::{CatalogPage, RawCatalogRecord};
use folio_storage::{FetchError, HttpFetcher, StagingStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "folio-extract";

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Which catalog searches to run and how deep to page through each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPlan {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_genres")]
    pub genres: Vec<String>,
    #[serde(default = "default_pages_per_genre")]
    pub pages_per_genre: u32,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_print_type")]
    pub print_type: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_genres() -> Vec<String> {
    [
        "fiction",
        "non-fiction",
        "business",
        "psychology",
        "science",
        "history",
        "literature",
        "children",
        "romance",
        "fantasy",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_pages_per_genre() -> u32 {
    5
}

fn default_max_results() -> u32 {
    40
}

fn default_print_type() -> String {
    "books".to_string()
}

impl Default for CatalogPlan {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            genres: default_genres(),
            pages_per_genre: default_pages_per_genre(),
            max_results: default_max_results(),
            print_type: default_print_type(),
        }
    }
}

impl CatalogPlan {
    pub fn genre_queries(&self, genre: &str) -> Vec<PageQuery> {
        (0..self.pages_per_genre)
            .map(|page| PageQuery {
                genre: genre.to_string(),
                page,
                start_index: page.saturating_mul(self.max_results),
                max_results: self.max_results,
                label: batch_label(genre, page),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageQuery {
    pub genre: String,
    pub page: u32,
    pub start_index: u32,
    pub max_results: u32,
    pub label: String,
}

impl PageQuery {
    pub fn query_params(&self, print_type: &str) -> Vec<(&'static str, String)> {
        vec![
            ("q", self.genre.clone()),
            ("maxResults", self.max_results.to_string()),
            ("startIndex", self.start_index.to_string()),
            ("printType", print_type.to_string()),
        ]
    }
}

pub fn sanitize_genre(genre: &str) -> String {
    genre.to_lowercase().replace([' ', '-'], "_")
}

/// Staged file stem for one fetched page; the genre tagger reads it back.
pub fn batch_label(genre: &str, page: u32) -> String {
    format!("google_books_{}_page_{page}", sanitize_genre(genre))
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_page(&self, run_id: Uuid, query: &PageQuery) -> Result<Vec<u8>, ExtractError>;
}

pub struct GoogleBooksSource {
    fetcher: HttpFetcher,
    api_url: String,
    print_type: String,
}

impl GoogleBooksSource {
    pub fn new(fetcher: HttpFetcher, plan: &CatalogPlan) -> Self {
        Self {
            fetcher,
            api_url: plan.api_url.clone(),
            print_type: plan.print_type.clone(),
        }
    }
}

#[async_trait]
impl CatalogSource for GoogleBooksSource {
    fn source_id(&self) -> &'static str {
        "google-books"
    }

    async fn fetch_page(&self, run_id: Uuid, query: &PageQuery) -> Result<Vec<u8>, ExtractError> {
        let response = self
            .fetcher
            .fetch_query(
                run_id,
                &query.label,
                &self.api_url,
                &query.query_params(&self.print_type),
            )
            .await?;
        Ok(response.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPage {
    pub genre: String,
    pub page: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractSummary {
    pub run_id: Uuid,
    pub cleared_pages: usize,
    pub staged_pages: Vec<String>,
    pub failed_pages: Vec<FailedPage>,
}

/// Fetch every planned page into the staging store. A failed page skips the
/// rest of its genre; staging failures abort the stage.
pub async fn run_extract(
    source: &dyn CatalogSource,
    store: &StagingStore,
    plan: &CatalogPlan,
    run_id: Uuid,
) -> Result<ExtractSummary> {
    let cleared_pages = store.clear_pages().await?;
    info!(%run_id, cleared_pages, source = source.source_id(), "extract started");

    let mut summary = ExtractSummary {
        run_id,
        cleared_pages,
        ..Default::default()
    };

    for genre in &plan.genres {
        info!(genre = genre.as_str(), "fetching genre");
        for query in plan.genre_queries(genre) {
            match source.fetch_page(run_id, &query).await {
                Ok(body) => {
                    let staged = store.stage_page(&query.label, &body).await?;
                    info!(
                        label = staged.label.as_str(),
                        bytes = staged.byte_size,
                        "page staged"
                    );
                    summary.staged_pages.push(staged.label);
                }
                Err(err) => {
                    warn!(
                        genre = genre.as_str(),
                        page = query.page,
                        error = %err,
                        "page fetch failed; skipping remaining pages for genre"
                    );
                    summary.failed_pages.push(FailedPage {
                        genre: genre.clone(),
                        page: query.page,
                        error: err.to_string(),
                    });
                    break;
                }
            }
        }
    }

    info!(
        staged = summary.staged_pages.len(),
        failed = summary.failed_pages.len(),
        "extract finished"
    );
    Ok(summary)
}

#[derive(Debug, Clone)]
pub struct StagedPage {
    pub label: String,
    pub path: PathBuf,
    pub records: Vec<RawCatalogRecord>,
}

/// A staged file that could not be turned into catalog records.
#[derive(Debug, Error)]
pub enum StageLoadError {
    #[error("reading staged page {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing staged page {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StageLoadError {
    pub fn path(&self) -> &Path {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default)]
pub struct StagedLoad {
    pub pages: Vec<StagedPage>,
    pub errors: Vec<StageLoadError>,
}

impl StagedLoad {
    pub fn record_count(&self) -> usize {
        self.pages.iter().map(|p| p.records.len()).sum()
    }
}

pub fn parse_page(bytes: &[u8]) -> Result<CatalogPage, serde_json::Error> {
    serde_json::from_slice(bytes)
}

fn label_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read every staged page. Unreadable or malformed files are collected in
/// `errors` and the remaining files still load.
pub async fn load_staged_pages(store: &StagingStore) -> Result<StagedLoad> {
    let mut load = StagedLoad::default();
    for path in store.list_pages().await? {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(source) => {
                let err = StageLoadError::Read { path, source };
                warn!(error = %err, "skipping unreadable staged page");
                load.errors.push(err);
                continue;
            }
        };

        match parse_page(&bytes) {
            Ok(page) => load.pages.push(StagedPage {
                label: label_for(&path),
                path,
                records: page.items,
            }),
            Err(source) => {
                let err = StageLoadError::Parse { path, source };
                warn!(error = %err, "skipping malformed staged page");
                load.errors.push(err);
            }
        }
    }
    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct ScriptedSource {
        fail_on: Option<(String, u32)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        fn source_id(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_page(
            &self,
            _run_id: Uuid,
            query: &PageQuery,
        ) -> Result<Vec<u8>, ExtractError> {
            self.calls.lock().expect("calls").push(query.label.clone());
            if self.fail_on.as_ref() == Some(&(query.genre.clone(), query.page)) {
                return Err(ExtractError::Message("boom".into()));
            }
            Ok(format!(r#"{{"items":[{{"id":"{}"}}]}}"#, query.label).into_bytes())
        }
    }

    fn small_plan() -> CatalogPlan {
        CatalogPlan {
            genres: vec!["Science Fiction".into(), "non-fiction".into()],
            pages_per_genre: 3,
            max_results: 20,
            ..Default::default()
        }
    }

    #[test]
    fn genre_names_become_file_safe_labels() {
        assert_eq!(sanitize_genre("Non-Fiction"), "non_fiction");
        assert_eq!(sanitize_genre("science fiction"), "science_fiction");
        assert_eq!(batch_label("non-fiction", 2), "google_books_non_fiction_page_2");
    }

    #[test]
    fn queries_page_through_results() {
        let queries = small_plan().genre_queries("fiction");
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[2].start_index, 40);
        assert_eq!(
            queries[1].query_params("books"),
            vec![
                ("q", "fiction".to_string()),
                ("maxResults", "20".to_string()),
                ("startIndex", "20".to_string()),
                ("printType", "books".to_string()),
            ]
        );
    }

    #[test]
    fn oversized_paging_saturates_start_index() {
        let plan = CatalogPlan {
            pages_per_genre: 3,
            max_results: u32::MAX / 2 + 1,
            ..Default::default()
        };
        let queries = plan.genre_queries("fiction");
        assert_eq!(queries[1].start_index, u32::MAX / 2 + 1);
        assert_eq!(queries[2].start_index, u32::MAX);
    }

    #[test]
    fn plan_defaults_fill_missing_keys() {
        let plan: CatalogPlan =
            serde_json::from_str(r#"{"genres":["poetry"]}"#).expect("plan");
        assert_eq!(plan.genres, vec!["poetry".to_string()]);
        assert_eq!(plan.pages_per_genre, 5);
        assert_eq!(plan.max_results, 40);
        assert_eq!(plan.api_url, DEFAULT_API_URL);
        assert_eq!(CatalogPlan::default().genres.len(), 10);
    }

    #[tokio::test]
    async fn failed_page_skips_rest_of_genre_only() {
        let dir = tempdir().expect("tempdir");
        let store = StagingStore::new(dir.path());
        store.stage_page("stale_page_9", b"{}").await.expect("stale");

        let source = ScriptedSource {
            fail_on: Some(("Science Fiction".into(), 1)),
            calls: Mutex::new(Vec::new()),
        };
        let summary = run_extract(&source, &store, &small_plan(), Uuid::new_v4())
            .await
            .expect("extract");

        assert_eq!(summary.cleared_pages, 1);
        assert_eq!(
            summary.staged_pages,
            vec![
                "google_books_science_fiction_page_0",
                "google_books_non_fiction_page_0",
                "google_books_non_fiction_page_1",
                "google_books_non_fiction_page_2",
            ]
        );
        assert_eq!(summary.failed_pages.len(), 1);
        assert_eq!(summary.failed_pages[0].page, 1);
        assert_eq!(source.calls.lock().expect("calls").len(), 5);
        assert!(!store.page_path("stale_page_9").exists());
    }

    #[tokio::test]
    async fn malformed_pages_are_reported_and_others_load() {
        let dir = tempdir().expect("tempdir");
        let store = StagingStore::new(dir.path());
        store
            .stage_page(
                "google_books_fiction_page_0",
                br#"{"items":[{"id":"a"},{"id":"b"}]}"#,
            )
            .await
            .expect("good page");
        store
            .stage_page("google_books_fiction_page_1", b"{not json")
            .await
            .expect("bad page");
        store
            .stage_page("google_books_history_page_0", br#"{"totalItems":0}"#)
            .await
            .expect("empty page");

        let load = load_staged_pages(&store).await.expect("load");
        assert_eq!(load.pages.len(), 2);
        assert_eq!(load.record_count(), 2);
        assert_eq!(load.pages[0].label, "google_books_fiction_page_0");
        assert_eq!(load.errors.len(), 1);
        assert!(matches!(load.errors[0], StageLoadError::Parse { .. }));
        assert_eq!(load.errors[0].path(), store.page_path("google_books_fiction_page_1"));
    }
}
