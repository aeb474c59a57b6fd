//! Load stage: cleaned CSV -> SQLite `books` table.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use folio_core::NormalizedRecord;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!();

pub const LAST_RUN_FILE: &str = "last_run.txt";

const UPSERT_SQL: &str = r#"
INSERT OR REPLACE INTO books (
    id, title, subtitle, authors, publisher, published_date, description,
    categories, page_count, average_rating, ratings_count, language,
    isbn_10, isbn_13, info_link, buy_link, retail_price, currency_code,
    thumbnail_link, is_ebook, genre
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub csv_path: String,
    pub rows_before: i64,
    pub rows_after: i64,
    pub upserted: usize,
    pub finished_at: DateTime<Local>,
}

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url {database_url}"))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {database_url}"))
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await.context("running books migrations")
}

pub async fn count_books(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS total FROM books")
        .fetch_one(pool)
        .await
        .context("counting books")?;
    Ok(row.try_get("total")?)
}

/// Insert-or-replace every record keyed on `id`, all in one transaction.
pub async fn upsert_books(pool: &SqlitePool, records: &[NormalizedRecord]) -> Result<usize> {
    let mut tx = pool.begin().await.context("starting upsert transaction")?;
    for record in records {
        sqlx::query(UPSERT_SQL)
            .bind(&record.id)
            .bind(&record.title)
            .bind(&record.subtitle)
            .bind(&record.authors)
            .bind(&record.publisher)
            .bind(&record.published_date)
            .bind(&record.description)
            .bind(&record.categories)
            .bind(i64::from(record.page_count))
            .bind(record.average_rating)
            .bind(i64::from(record.ratings_count))
            .bind(&record.language)
            .bind(&record.isbn_10)
            .bind(&record.isbn_13)
            .bind(&record.info_link)
            .bind(&record.buy_link)
            .bind(record.retail_price)
            .bind(&record.currency_code)
            .bind(&record.thumbnail_link)
            .bind(record.is_ebook)
            .bind(&record.genre)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upserting book {}", record.id))?;
    }
    tx.commit().await.context("committing upsert transaction")?;
    Ok(records.len())
}

pub fn read_cleaned_csv(path: &Path) -> Result<Vec<NormalizedRecord>> {
    if !path.exists() {
        bail!("cleaned CSV not found: {}", path.display());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        .map(|(row, record)| {
            record.with_context(|| format!("reading row {} of {}", row + 1, path.display()))
        })
        .collect()
}

/// Run the load stage against an open pool and record the run marker.
pub async fn load_cleaned_csv(
    pool: &SqlitePool,
    csv_path: &Path,
    last_run_dir: &Path,
) -> Result<LoadSummary> {
    migrate(pool).await?;

    info!(csv = %csv_path.display(), "reading cleaned CSV");
    let records = read_cleaned_csv(csv_path)?;

    let rows_before = count_books(pool).await?;
    info!(rows_before, "books before upsert");

    let upserted = upsert_books(pool, &records).await?;
    let rows_after = count_books(pool).await?;
    info!(upserted, rows_after, "books after upsert");

    let finished_at = Local::now();
    write_last_run(last_run_dir, finished_at).await?;

    Ok(LoadSummary {
        csv_path: csv_path.display().to_string(),
        rows_before,
        rows_after,
        upserted,
        finished_at,
    })
}

async fn write_last_run(dir: &Path, at: DateTime<Local>) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(LAST_RUN_FILE);
    tokio::fs::write(&path, format!("Last run: {}\n", at.format("%Y-%m-%d %H:%M:%S%.6f")))
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::write_cleaned_csv;
    use tempfile::tempdir;

    fn book(id: &str, title: &str, price: Option<f64>) -> NormalizedRecord {
        NormalizedRecord {
            id: id.to_string(),
            title: title.to_string(),
            authors: "Jane Doe".into(),
            page_count: 120,
            retail_price: price,
            is_ebook: price.is_some(),
            genre: "Fiction".into(),
            ..Default::default()
        }
    }

    async fn memory_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.expect("pool");
        migrate(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn upsert_replaces_rows_with_same_id() {
        let pool = memory_pool().await;
        upsert_books(&pool, &[book("a", "First", None), book("b", "Other", None)])
            .await
            .expect("first upsert");
        upsert_books(&pool, &[book("a", "Second", Some(4.99))])
            .await
            .expect("second upsert");

        assert_eq!(count_books(&pool).await.expect("count"), 2);
        let row = sqlx::query("SELECT title, retail_price, is_ebook FROM books WHERE id = ?")
            .bind("a")
            .fetch_one(&pool)
            .await
            .expect("row");
        assert_eq!(row.get::<String, _>("title"), "Second");
        assert_eq!(row.get::<Option<f64>, _>("retail_price"), Some(4.99));
        assert!(row.get::<bool, _>("is_ebook"));
    }

    #[tokio::test]
    async fn csv_round_trips_into_the_table() {
        let dir = tempdir().expect("tempdir");
        let csv_path = dir.path().join("cleaned.csv");
        let mut rich = book("a", "The Great Escape", Some(9.99));
        rich.average_rating = Some(4.5);
        rich.description = "Line one, with a comma\nand a newline".into();
        let records = vec![rich, book("b", "Journey To The Stars", None)];
        write_cleaned_csv(&csv_path, &records).expect("write csv");

        assert_eq!(read_cleaned_csv(&csv_path).expect("read csv"), records);

        let pool = connect("sqlite::memory:").await.expect("pool");
        let summary = load_cleaned_csv(&pool, &csv_path, dir.path())
            .await
            .expect("load");
        assert_eq!(summary.rows_before, 0);
        assert_eq!(summary.rows_after, 2);
        assert_eq!(summary.upserted, 2);

        let marker = std::fs::read_to_string(dir.path().join(LAST_RUN_FILE)).expect("marker");
        assert!(marker.starts_with("Last run: "));
    }

    #[tokio::test]
    async fn missing_csv_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let pool = connect("sqlite::memory:").await.expect("pool");
        let err = load_cleaned_csv(&pool, &dir.path().join("absent.csv"), dir.path())
            .await
            .expect_err("missing csv");
        assert!(err.to_string().contains("cleaned CSV not found"));
    }
}
