use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use futures::StreamExt;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DownloadSection;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const ORIGIN: &str = "https://www.youtube.com";
const REFERER: &str = "https://www.youtube.com/";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: u64,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    fn io(path: &Path, source: io::Error) -> Self {
        DownloadError::Io {
            source,
            path: path.to_path_buf(),
        }
    }

    fn is_forbidden(&self) -> bool {
        matches!(self, DownloadError::Http { status: 403, .. })
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Range-parallel fetcher for one source stream. Writes either nothing or a
/// complete file at the destination; partial state lives in `<dest>.chunks/`
/// and `<dest>.tmp` until the final rename.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    chunk_size: u64,
    workers: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl Downloader {
    pub fn new(section: &DownloadSection) -> DownloadResult<Self> {
        // Bodies are opaque media, so transparent decompression is left off;
        // the shared client keeps a bounded idle pool per host.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(section.workers as usize * 2)
            .timeout(section.chunk_timeout())
            .build()?;
        Ok(Self {
            client,
            chunk_size: section.chunk_size_bytes,
            workers: section.workers.max(1),
            max_retries: section.max_retries.max(1),
            retry_delay: section.retry_delay(),
        })
    }

    /// Fetches `total_size` bytes of `url` into `dest`. Small payloads go
    /// through a single range GET; larger ones fan out to the worker pool.
    pub async fn download(&self, url: &str, dest: &Path, total_size: u64) -> DownloadResult<()> {
        if total_size <= self.chunk_size {
            self.download_single(url, dest, total_size).await
        } else {
            self.download_chunked(url, dest, total_size).await
        }
    }

    async fn download_single(&self, url: &str, dest: &Path, total_size: u64) -> DownloadResult<()> {
        let tmp_path = sibling(dest, ".tmp");
        let response = self.fetch_range(url, 0, total_size.saturating_sub(1)).await?;
        if let Err(err) = stream_to_file(response, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        rename_over(&tmp_path, dest).await
    }

    async fn download_chunked(&self, url: &str, dest: &Path, total_size: u64) -> DownloadResult<()> {
        let chunks_dir = sibling(dest, ".chunks");
        fs::create_dir_all(&chunks_dir)
            .await
            .map_err(|source| DownloadError::io(&chunks_dir, source))?;

        let num_chunks = total_size.div_ceil(self.chunk_size);
        let outcome = self
            .run_workers(url, &chunks_dir, total_size, num_chunks)
            .await;
        let outcome = match outcome {
            Ok(()) => self.assemble(&chunks_dir, dest, num_chunks).await,
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            let _ = fs::remove_dir_all(&chunks_dir).await;
            let _ = fs::remove_file(sibling(dest, ".tmp")).await;
            return outcome;
        }
        let _ = fs::remove_dir_all(&chunks_dir).await;
        Ok(())
    }

    /// W workers share an atomic index; each claims the next chunk until the
    /// range is exhausted. The first failure aborts the remaining workers.
    async fn run_workers(
        &self,
        url: &str,
        chunks_dir: &Path,
        total_size: u64,
        num_chunks: u64,
    ) -> DownloadResult<()> {
        let next_index = Arc::new(AtomicU64::new(0));
        let workers = (0..self.workers).map(|_| {
            let next_index = Arc::clone(&next_index);
            async move {
                loop {
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    if index >= num_chunks {
                        return Ok(());
                    }
                    let start = index * self.chunk_size;
                    let end = (start + self.chunk_size).min(total_size) - 1;
                    let chunk_path = chunks_dir.join(format!("chunk_{index}"));
                    self.fetch_chunk_with_retry(url, &chunk_path, start, end)
                        .await
                        .map_err(|source| DownloadError::Chunk {
                            index,
                            source: Box::new(source),
                        })?;
                }
            }
        });
        try_join_all(workers).await.map(|_| ())
    }

    /// One chunk, up to `max_retries` attempts with linear backoff. An
    /// upstream 403 marks a dead URL and is surfaced without retrying.
    async fn fetch_chunk_with_retry(
        &self,
        url: &str,
        chunk_path: &Path,
        start: u64,
        end: u64,
    ) -> DownloadResult<()> {
        let tmp_path = sibling(chunk_path, ".tmp");
        let mut last_err = None;
        for attempt in 0..self.max_retries {
            let result = match self.fetch_range(url, start, end).await {
                Ok(response) => stream_to_file(response, &tmp_path).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => return rename_over(&tmp_path, chunk_path).await,
                Err(err) if err.is_forbidden() => return Err(err),
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    warn!(range = %format!("{start}-{end}"), attempt = attempt + 1, error = %err, "chunk attempt failed");
                    last_err = Some(err);
                    if attempt + 1 < self.max_retries {
                        sleep(self.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(DownloadError::Http {
            status: 0,
            message: "retries exhausted".to_string(),
        }))
    }

    /// The upstream CDN takes the byte range as a query parameter, not a
    /// Range header.
    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> DownloadResult<reqwest::Response> {
        let range_url = format!("{url}&range={start}-{end}");
        let response = self
            .client
            .get(&range_url)
            .header("Origin", ORIGIN)
            .header("Referer", REFERER)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response.text().await.unwrap_or_default();
            return Err(DownloadError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Concatenates `chunk_0..chunk_{n-1}` in index order into `<dest>.tmp`
    /// and renames it into place.
    async fn assemble(&self, chunks_dir: &Path, dest: &Path, num_chunks: u64) -> DownloadResult<()> {
        let tmp_path = sibling(dest, ".tmp");
        let mut out = fs::File::create(&tmp_path)
            .await
            .map_err(|source| DownloadError::io(&tmp_path, source))?;
        for index in 0..num_chunks {
            let chunk_path = chunks_dir.join(format!("chunk_{index}"));
            let mut chunk = fs::File::open(&chunk_path)
                .await
                .map_err(|source| DownloadError::io(&chunk_path, source))?;
            tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(|source| DownloadError::io(&tmp_path, source))?;
        }
        out.sync_all()
            .await
            .map_err(|source| DownloadError::io(&tmp_path, source))?;
        drop(out);
        debug!(dest = %dest.display(), chunks = num_chunks, "assembled download");
        rename_over(&tmp_path, dest).await
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> DownloadResult<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|source| DownloadError::io(path, source))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        file.write_all(&data)
            .await
            .map_err(|source| DownloadError::io(path, source))?;
    }
    file.flush()
        .await
        .map_err(|source| DownloadError::io(path, source))
}

/// Atomic-replace rename; the target is removed first so the rename also
/// succeeds on platforms where it does not overwrite.
async fn rename_over(from: &Path, to: &Path) -> DownloadResult<()> {
    if fs::metadata(to).await.is_ok() {
        let _ = fs::remove_file(to).await;
    }
    fs::rename(from, to)
        .await
        .map_err(|source| DownloadError::io(to, source))
}
