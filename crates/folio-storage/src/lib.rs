//! Raw page staging + rate-limited HTTP fetch utilities for Folio.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "folio-storage";

const PAGE_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct StagedPageFile {
    pub label: String,
    pub content_hash: String,
    pub path: PathBuf,
    pub byte_size: usize,
    pub unchanged: bool,
}

/// Directory of raw catalog pages, one `<label>.json` file per fetched page.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn page_path(&self, label: &str) -> PathBuf {
        self.root.join(format!("{label}.{PAGE_EXTENSION}"))
    }

    /// Write a page through a temp file + rename so readers never see a
    /// partial page. Identical content already on disk is left alone.
    pub async fn stage_page(&self, label: &str, bytes: &[u8]) -> anyhow::Result<StagedPageFile> {
        let content_hash = Self::sha256_hex(bytes);
        let path = self.page_path(label);

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating staging directory {}", self.root.display()))?;

        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking staged page {}", path.display()))?
        {
            let existing = fs::read(&path)
                .await
                .with_context(|| format!("reading staged page {}", path.display()))?;
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(StagedPageFile {
                    label: label.to_string(),
                    content_hash,
                    path,
                    byte_size: bytes.len(),
                    unchanged: true,
                });
            }
        }

        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp page file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp page file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp page file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp page {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        Ok(StagedPageFile {
            label: label.to_string(),
            content_hash,
            path,
            byte_size: bytes.len(),
            unchanged: false,
        })
    }

    /// Staged page files, sorted by file name. A missing directory has no pages.
    pub async fn list_pages(&self) -> anyhow::Result<Vec<PathBuf>> {
        if !fs::try_exists(&self.root)
            .await
            .with_context(|| format!("checking staging directory {}", self.root.display()))?
        {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading staging directory {}", self.root.display()))?;
        let mut pages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PAGE_EXTENSION)
                && entry.file_type().await.map(|ft| ft.is_file()).unwrap_or(false)
            {
                pages.push(path);
            }
        }
        pages.sort();
        Ok(pages)
    }

    /// Remove every staged page left over from an earlier run.
    pub async fn clear_pages(&self) -> anyhow::Result<usize> {
        let pages = self.list_pages().await?;
        for path in &pages {
            fs::remove_file(path)
                .await
                .with_context(|| format!("removing stale page {}", path.display()))?;
        }
        Ok(pages.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            token_bucket: Some(TokenBucketConfig {
                capacity: 1,
                refill_every: Duration::from_secs(1),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl TokenBucketConfig {
    /// One token per request, refilled at `requests_per_sec`. Zero disables pacing.
    pub fn per_second(requests_per_sec: f64) -> Option<Self> {
        if requests_per_sec <= 0.0 || !requests_per_sec.is_finite() {
            return None;
        }
        Some(Self {
            capacity: 1,
            refill_every: Duration::from_secs_f64(1.0 / requests_per_sec),
        })
    }
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait for a token. A zero refill period never waits.
    pub async fn take(&self) {
        if self.refill_every.is_zero() {
            return;
        }
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every {
                let refills = elapsed.as_nanos() / self.refill_every.as_nanos();
                let refills = u32::try_from(refills).unwrap_or(u32::MAX);
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            token_bucket,
            backoff: config.backoff,
        })
    }

    /// GET `url` with `query` parameters, retrying transient failures.
    pub async fn fetch_query(
        &self,
        run_id: Uuid,
        label: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, label, url);
        self.fetch_with_retries(url, query).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            if let Some(bucket) = &self.token_bucket {
                bucket.take().await;
            }

            let retry_allowed = attempt < self.backoff.max_retries;
            match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && retry_allowed {
                        warn!(status = status.as_u16(), attempt, "retryable status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && retry_allowed {
                        warn!(error = %err, attempt, "retryable request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}
