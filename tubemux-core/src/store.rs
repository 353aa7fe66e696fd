use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const JOB_ID_LENGTH: usize = 21;

const META_FILE: &str = "meta.json";
const ID_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {id} not found")]
    NotFound { id: String },
    #[error("job {id} metadata is corrupt: {source}")]
    Corrupt {
        id: String,
        source: serde_json::Error,
    },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            source,
            path: path.to_path_buf(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Generates a URL-safe job identifier from the OS CSPRNG.
pub fn new_job_id() -> String {
    let mut bytes = [0u8; JOB_ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|byte| ID_ALPHABET[(byte & 0x3f) as usize] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrimSpec {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub accurate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFiles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<FileEntry>,
}

/// Per-job metadata persisted as `meta.json` in the job directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub id: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub source_id: String,
    pub title: String,
    pub duration: f64,
    pub output_type: OutputKind,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim: Option<TrimSpec>,
    pub files: JobFiles,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filesystem-backed job store. One directory per job; the directory tree is
/// the only durable state and the only job index.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn meta_path(&self, id: &str) -> PathBuf {
        self.dir(id).join(META_FILE)
    }

    pub async fn create(&self, id: &str) -> StoreResult<()> {
        let dir = self.dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::io(&dir, source))
    }

    pub async fn exists(&self, id: &str) -> bool {
        fs::metadata(self.dir(id)).await.is_ok()
    }

    pub async fn read(&self, id: &str) -> StoreResult<Meta> {
        let path = self.meta_path(id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.to_string() })
            }
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
            id: id.to_string(),
            source,
        })
    }

    /// Writes the metadata document with serialize-then-atomic-replace so a
    /// concurrent reader sees either the previous or the new snapshot.
    pub async fn write(&self, meta: &Meta) -> StoreResult<()> {
        let path = self.meta_path(&meta.id);
        let tmp_path = self.dir(&meta.id).join(format!("{META_FILE}.tmp"));
        let data = serde_json::to_vec_pretty(meta).map_err(|source| StoreError::Corrupt {
            id: meta.id.clone(),
            source,
        })?;
        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|source| StoreError::io(&tmp_path, source))?;
        file.write_all(&data)
            .await
            .map_err(|source| StoreError::io(&tmp_path, source))?;
        file.sync_all()
            .await
            .map_err(|source| StoreError::io(&tmp_path, source))?;
        drop(file);
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StoreError::io(&path, source))
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let dir = self.dir(id);
        fs::remove_dir_all(&dir)
            .await
            .map_err(|source| StoreError::io(&dir, source))
    }

    /// Marks the job failed. A no-op when the job is already terminal: a
    /// terminal record is immutable until deletion.
    pub async fn mark_error(&self, id: &str, message: impl Into<String>) -> StoreResult<()> {
        let mut meta = self.read(id).await?;
        if meta.status.is_terminal() {
            warn!(job = %id, "refusing to overwrite terminal job state");
            return Ok(());
        }
        meta.status = JobStatus::Error;
        meta.error = Some(message.into());
        self.write(&meta).await
    }

    /// Marks the job completed without a merged artifact; clients must use
    /// the stream endpoint.
    pub async fn mark_stream_only(&self, id: &str) -> StoreResult<()> {
        let mut meta = self.read(id).await?;
        if meta.status.is_terminal() {
            warn!(job = %id, "refusing to overwrite terminal job state");
            return Ok(());
        }
        meta.status = JobStatus::Completed;
        meta.stream_only = true;
        self.write(&meta).await
    }

    /// Marks the job completed with a finalized output file.
    pub async fn mark_completed(&self, id: &str, output: impl Into<String>) -> StoreResult<()> {
        let mut meta = self.read(id).await?;
        if meta.status.is_terminal() {
            warn!(job = %id, "refusing to overwrite terminal job state");
            return Ok(());
        }
        meta.status = JobStatus::Completed;
        meta.output = Some(output.into());
        self.write(&meta).await
    }
}
