//! Pipeline orchestration: configuration, the three stages, and the scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use folio_core::{DedupEngine, SimilarityJudge, TitleScorerKind};
use folio_extract::{run_extract, CatalogPlan, CatalogSource, ExtractSummary, GoogleBooksSource};
use folio_storage::{HttpClientConfig, HttpFetcher, StagingStore, TokenBucketConfig};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod load;
pub mod reports;
pub mod transform;

pub use load::LoadSummary;
pub use reports::{report_recent_runs, TransformSummary};
pub use transform::{cleaned_csv_path, run_transform, TransformOutput};

pub const CRATE_NAME: &str = "folio-sync";

pub const DEFAULT_SYNC_CRON: &str = "0 16 21 * * *";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub data_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub cleaned_dir: PathBuf,
    pub database_url: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub requests_per_sec: f64,
    pub title_scorer: TitleScorerKind,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace_root = lookup("FOLIO_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let data_dir = lookup("FOLIO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("data"));
        let raw_dir = lookup("FOLIO_RAW_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("raw"));
        let cleaned_dir = lookup("FOLIO_CLEANED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("cleaned"));
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("books.db").display()));

        let title_scorer = match lookup("FOLIO_TITLE_SCORER") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                warn!(%err, "falling back to the default title scorer");
                TitleScorerKind::default()
            }),
            None => TitleScorerKind::default(),
        };

        Self {
            workspace_root,
            raw_dir,
            cleaned_dir,
            database_url,
            scheduler_enabled: lookup("FOLIO_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: lookup("FOLIO_SYNC_CRON").unwrap_or_else(|| DEFAULT_SYNC_CRON.to_string()),
            user_agent: lookup("FOLIO_USER_AGENT").unwrap_or_else(|| "folio-bot/0.1".to_string()),
            http_timeout_secs: lookup("FOLIO_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            requests_per_sec: lookup("FOLIO_REQUESTS_PER_SEC")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            title_scorer,
            data_dir,
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.workspace_root.join("catalog.yaml")
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

/// Read the query plan. A missing file yields the built-in plan.
pub fn load_catalog_plan(path: &Path) -> Result<CatalogPlan> {
    if !path.exists() {
        info!(path = %path.display(), "no catalog plan file; using defaults");
        return Ok(CatalogPlan::default());
    }
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Dates in output file names follow the local calendar.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub extract: ExtractSummary,
    pub transform: TransformSummary,
    pub load: LoadSummary,
}

pub struct SyncPipeline {
    config: SyncConfig,
    plan: CatalogPlan,
    store: StagingStore,
    engine: DedupEngine,
    source: Box<dyn CatalogSource>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let plan = load_catalog_plan(&config.catalog_path())?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            token_bucket: TokenBucketConfig::per_second(config.requests_per_sec),
            ..Default::default()
        })?;
        let source = Box::new(GoogleBooksSource::new(http, &plan));
        Ok(Self::with_source(config, plan, source))
    }

    pub fn with_source(
        config: SyncConfig,
        plan: CatalogPlan,
        source: Box<dyn CatalogSource>,
    ) -> Self {
        let engine = DedupEngine::new(SimilarityJudge::from_kind(config.title_scorer));
        Self {
            store: StagingStore::new(config.raw_dir.clone()),
            config,
            plan,
            engine,
            source,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn extract(&self, run_id: Uuid) -> Result<ExtractSummary> {
        run_extract(self.source.as_ref(), &self.store, &self.plan, run_id).await
    }

    pub async fn transform(&self, run_id: Uuid, run_date: NaiveDate) -> Result<TransformSummary> {
        let started_at = Utc::now();
        let output =
            run_transform(&self.store, &self.config.cleaned_dir, &self.engine, run_date).await?;
        let reports_root = self.config.reports_root();
        let mut summary = TransformSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            scorer: self.engine.judge().scorer_name().to_string(),
            pages_read: output.pages_read,
            records_before: output.outcome.input_len,
            records_after: output.outcome.batch.len(),
            duplicates_removed: output.outcome.removed(),
            load_errors: output.load_errors.len(),
            cleaned_csv: output.cleaned_csv.display().to_string(),
            genre_counts_csv: output.genre_counts_csv.display().to_string(),
            reports_dir: reports::run_dir(&reports_root, run_id).display().to_string(),
        };
        reports::write_run_reports(&reports_root, &summary, &output).await?;
        summary.finished_at = Utc::now();
        Ok(summary)
    }

    pub async fn migrate(&self) -> Result<()> {
        let pool = self.connect().await?;
        load::migrate(&pool).await?;
        pool.close().await;
        Ok(())
    }

    pub async fn load(&self, run_date: NaiveDate) -> Result<LoadSummary> {
        let pool = self.connect().await?;
        let csv_path = cleaned_csv_path(&self.config.cleaned_dir, run_date);
        let summary = load::load_cleaned_csv(&pool, &csv_path, &self.config.cleaned_dir).await;
        pool.close().await;
        summary
    }

    async fn connect(&self) -> Result<sqlx::SqlitePool> {
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .with_context(|| format!("creating {}", self.config.data_dir.display()))?;
        load::connect(&self.config.database_url).await
    }

    /// Extract, transform, then load. The first failing stage ends the run.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_date = today();
        info!(%run_id, %run_date, "sync run started");

        let extract = self.extract(run_id).await.context("extract stage failed")?;
        let transform = self
            .transform(run_id, run_date)
            .await
            .context("transform stage failed")?;
        let load = self.load(run_date).await.context("load stage failed")?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            staged = extract.staged_pages.len(),
            kept = transform.records_after,
            rows = load.rows_after,
            "sync run finished"
        );
        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            extract,
            transform,
            load,
        })
    }

    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(run_id = %summary.run_id, "scheduled sync completed"),
                    Err(err) => error!(error = ?err, "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cron = cron.as_str(), "scheduler configured");
        Ok(Some(sched))
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    SyncPipeline::new(SyncConfig::from_env())?.run_once().await
}
