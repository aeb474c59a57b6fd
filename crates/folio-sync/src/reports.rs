//! Per-run reports and Parquet snapshots under `reports/<run_id>/`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use folio_core::{GenreCount, NormalizedRecord};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::transform::{StageFileError, TransformOutput};

pub const BRIEF_FILE: &str = "transform_brief.md";
pub const SUMMARY_FILE: &str = "run_summary.json";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scorer: String,
    pub pages_read: usize,
    pub records_before: usize,
    pub records_after: usize,
    pub duplicates_removed: usize,
    pub load_errors: usize,
    pub cleaned_csv: String,
    pub genre_counts_csv: String,
    pub reports_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn run_dir(reports_root: &Path, run_id: Uuid) -> PathBuf {
    reports_root.join(run_id.to_string())
}

/// Write the brief, the summary JSON, and the Parquet snapshots for one run.
pub async fn write_run_reports(
    reports_root: &Path,
    summary: &TransformSummary,
    output: &TransformOutput,
) -> Result<PathBuf> {
    let dir = run_dir(reports_root, summary.run_id);
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let brief = render_brief(summary, &output.genre_counts, &output.load_errors);
    fs::write(dir.join(BRIEF_FILE), brief)
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    let summary_json = serde_json::to_vec_pretty(&serde_json::json!({
        "summary": summary,
        "duplicates": output.outcome.duplicates,
        "load_errors": output.load_errors,
        "genre_counts": output.genre_counts,
    }))
    .context("serializing run summary")?;
    fs::write(dir.join(SUMMARY_FILE), summary_json)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;

    export_parquet_snapshots(&dir, output.outcome.batch.records(), &output.genre_counts).await?;
    Ok(dir)
}

pub fn render_brief(
    summary: &TransformSummary,
    counts: &GenreCount,
    load_errors: &[StageFileError],
) -> String {
    let mut lines = vec![
        "# Folio Transform Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Title scorer: {}", summary.scorer),
        format!("- Pages read: {}", summary.pages_read),
        format!("- Records before dedup: {}", summary.records_before),
        format!("- Records after dedup: {}", summary.records_after),
        format!("- Duplicates removed: {}", summary.duplicates_removed),
        format!("- Load errors: {}", summary.load_errors),
        String::new(),
        "## Genre Counts".to_string(),
        String::new(),
        "| genre | count |".to_string(),
        "|---|---:|".to_string(),
    ];
    lines.extend(
        counts
            .ranked()
            .into_iter()
            .map(|(genre, count)| format!("| {genre} | {count} |")),
    );
    if !load_errors.is_empty() {
        lines.push(String::new());
        lines.push("## Load Errors".to_string());
        lines.push(String::new());
        lines.extend(
            load_errors
                .iter()
                .map(|e| format!("- `{}`: {}", e.path, e.error)),
        );
    }
    lines.push(String::new());
    lines.join("\n")
}

async fn export_parquet_snapshots(
    dir: &Path,
    records: &[NormalizedRecord],
    counts: &GenreCount,
) -> Result<PathBuf> {
    let books_path = dir.join("books.parquet");
    let genres_path = dir.join("genre_counts.parquet");

    write_books_parquet(&books_path, records)?;
    write_genre_counts_parquet(&genres_path, counts)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("books", dir, &books_path)?,
            manifest_entry("genre_counts", dir, &genres_path)?,
        ],
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn string_column<'a>(
    records: &'a [NormalizedRecord],
    pick: impl Fn(&'a NormalizedRecord) -> &'a str,
) -> StringArray {
    StringArray::from(records.iter().map(|r| Some(pick(r))).collect::<Vec<_>>())
}

fn write_books_parquet(path: &Path, records: &[NormalizedRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("authors", DataType::Utf8, false),
        ArrowField::new("publisher", DataType::Utf8, false),
        ArrowField::new("published_date", DataType::Utf8, false),
        ArrowField::new("page_count", DataType::UInt32, false),
        ArrowField::new("average_rating", DataType::Float64, true),
        ArrowField::new("ratings_count", DataType::UInt32, false),
        ArrowField::new("language", DataType::Utf8, false),
        ArrowField::new("isbn_13", DataType::Utf8, false),
        ArrowField::new("retail_price", DataType::Float64, true),
        ArrowField::new("currency_code", DataType::Utf8, false),
        ArrowField::new("is_ebook", DataType::Boolean, false),
        ArrowField::new("genre", DataType::Utf8, false),
    ]));

    let page_counts = UInt32Array::from(records.iter().map(|r| r.page_count).collect::<Vec<_>>());
    let ratings = Float64Array::from(records.iter().map(|r| r.average_rating).collect::<Vec<_>>());
    let ratings_counts =
        UInt32Array::from(records.iter().map(|r| r.ratings_count).collect::<Vec<_>>());
    let prices = Float64Array::from(records.iter().map(|r| r.retail_price).collect::<Vec<_>>());
    let ebooks = BooleanArray::from(records.iter().map(|r| r.is_ebook).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(string_column(records, |r| r.id.as_str())),
            Arc::new(string_column(records, |r| r.title.as_str())),
            Arc::new(string_column(records, |r| r.authors.as_str())),
            Arc::new(string_column(records, |r| r.publisher.as_str())),
            Arc::new(string_column(records, |r| r.published_date.as_str())),
            Arc::new(page_counts),
            Arc::new(ratings),
            Arc::new(ratings_counts),
            Arc::new(string_column(records, |r| r.language.as_str())),
            Arc::new(string_column(records, |r| r.isbn_13.as_str())),
            Arc::new(prices),
            Arc::new(string_column(records, |r| r.currency_code.as_str())),
            Arc::new(ebooks),
            Arc::new(string_column(records, |r| r.genre.as_str())),
        ],
    )
    .context("building books record batch")?;
    write_parquet(path, batch)
}

fn write_genre_counts_parquet(path: &Path, counts: &GenreCount) -> Result<()> {
    let rows = counts.ranked();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("genre", DataType::Utf8, false),
        ArrowField::new("count", DataType::UInt64, false),
    ]));
    let genres = StringArray::from(rows.iter().map(|(g, _)| Some(*g)).collect::<Vec<_>>());
    let totals = UInt64Array::from(rows.iter().map(|(_, c)| *c as u64).collect::<Vec<_>>());
    let batch = RecordBatch::try_new(schema, vec![Arc::new(genres), Arc::new(totals)])
        .context("building genre_counts record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

fn read_run_summary(path: &Path) -> Result<TransformSummary> {
    let value: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
    )
    .with_context(|| format!("parsing {}", path.display()))?;
    serde_json::from_value(value.get("summary").cloned().unwrap_or_default())
        .with_context(|| format!("decoding summary in {}", path.display()))
}

/// Markdown digest of the most recent `runs` transform runs, newest first.
pub fn report_recent_runs(runs: usize, reports_root: &Path) -> Result<String> {
    let mut summaries = Vec::new();
    let mut skipped = 0usize;
    if reports_root.exists() {
        for entry in std::fs::read_dir(reports_root)
            .with_context(|| format!("reading {}", reports_root.display()))?
        {
            let entry = entry.with_context(|| format!("reading {}", reports_root.display()))?;
            let summary_path = entry.path().join(SUMMARY_FILE);
            if !summary_path.is_file() {
                continue;
            }
            let summary = match read_run_summary(&summary_path) {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(error = ?err, "skipping unreadable run summary");
                    skipped += 1;
                    continue;
                }
            };
            summaries.push((entry.path(), summary));
        }
    }
    summaries.sort_by(|a, b| b.1.started_at.cmp(&a.1.started_at));

    let mut lines = vec!["# Folio Recent Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push(format!("No runs recorded under `{}`.", reports_root.display()));
    }
    if skipped > 0 {
        lines.push(format!("Skipped {skipped} run(s) with an unreadable `{SUMMARY_FILE}`."));
        lines.push(String::new());
    }
    for (dir, summary) in summaries.into_iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!(
            "- records: {} -> {} ({} duplicates removed)",
            summary.records_before, summary.records_after, summary.duplicates_removed
        ));
        lines.push(format!("- load errors: {}", summary.load_errors));
        lines.push(format!("- cleaned csv: `{}`", summary.cleaned_csv));
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
