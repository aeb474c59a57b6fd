//! Transform stage: staged pages -> normalized, tagged, deduplicated CSVs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use folio_core::{
    count_by_genre, normalize, tag_genre, DedupEngine, DedupOutcome, GenreCount,
    NormalizedRecord, RECORD_COLUMNS,
};
use folio_extract::{load_staged_pages, StagedPage};
use folio_storage::StagingStore;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct StageFileError {
    pub path: String,
    pub error: String,
}

/// Everything a transform run produced, kept for reports.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub pages_read: usize,
    pub load_errors: Vec<StageFileError>,
    pub outcome: DedupOutcome,
    pub genre_counts: GenreCount,
    pub cleaned_csv: PathBuf,
    pub genre_counts_csv: PathBuf,
}

pub fn cleaned_csv_path(cleaned_dir: &Path, run_date: NaiveDate) -> PathBuf {
    cleaned_dir.join(format!("google_books_cleaned_{}.csv", run_date.format("%Y-%m-%d")))
}

pub fn genre_counts_csv_path(cleaned_dir: &Path, run_date: NaiveDate) -> PathBuf {
    cleaned_dir.join(format!("genre_counts_{}.csv", run_date.format("%Y-%m-%d")))
}

/// Normalize every record and tag it with the genre derived from its page label.
pub fn normalize_pages(pages: &[StagedPage]) -> Vec<NormalizedRecord> {
    pages
        .iter()
        .flat_map(|page| {
            let genre = tag_genre(&page.label);
            page.records
                .iter()
                .map(move |raw| normalize(raw).with_genre(genre.clone()))
        })
        .collect()
}

pub async fn run_transform(
    store: &StagingStore,
    cleaned_dir: &Path,
    engine: &DedupEngine,
    run_date: NaiveDate,
) -> Result<TransformOutput> {
    let staged = load_staged_pages(store).await?;
    let load_errors = staged
        .errors
        .iter()
        .map(|err| StageFileError {
            path: err.path().display().to_string(),
            error: err.to_string(),
        })
        .collect::<Vec<_>>();

    let records = normalize_pages(&staged.pages);
    info!(
        pages = staged.pages.len(),
        records = records.len(),
        "records before deduplication"
    );

    let outcome = engine.apply(records);
    info!(
        kept = outcome.batch.len(),
        removed = outcome.removed(),
        scorer = engine.judge().scorer_name(),
        "records after deduplication"
    );
    let genre_counts = count_by_genre(&outcome.batch);

    tokio::fs::create_dir_all(cleaned_dir)
        .await
        .with_context(|| format!("creating {}", cleaned_dir.display()))?;
    let cleaned_csv = cleaned_csv_path(cleaned_dir, run_date);
    write_cleaned_csv(&cleaned_csv, outcome.batch.records())?;
    let genre_counts_csv = genre_counts_csv_path(cleaned_dir, run_date);
    write_genre_counts_csv(&genre_counts_csv, &genre_counts)?;
    info!(csv = %cleaned_csv.display(), genres = genre_counts.len(), "cleaned data written");

    Ok(TransformOutput {
        pages_read: staged.pages.len(),
        load_errors,
        outcome,
        genre_counts,
        cleaned_csv,
        genre_counts_csv,
    })
}

/// Header is written explicitly so an empty batch still yields the full column set.
pub fn write_cleaned_csv(path: &Path, records: &[NormalizedRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(RECORD_COLUMNS)
        .with_context(|| format!("writing header to {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("writing book {} to {}", record.id, path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

pub fn write_genre_counts_csv(path: &Path, counts: &GenreCount) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(["genre", "count"])
        .with_context(|| format!("writing header to {}", path.display()))?;
    for (genre, count) in counts.ranked() {
        writer
            .write_record([genre, count.to_string().as_str()])
            .with_context(|| format!("writing {genre} to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}
