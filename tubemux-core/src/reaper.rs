use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::StorageSection;
use crate::store::{JobStore, StoreError};
use crate::validate::valid_job_id;

/// Periodic sweep over the job root: expired, misnamed, and corrupt job
/// directories are deleted. Errors are logged and never propagated; the next
/// tick retries.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: JobStore,
    max_age: Duration,
    batch_size: usize,
    tick: Duration,
}

impl Reaper {
    pub fn new(store: JobStore, section: &StorageSection) -> Self {
        Self {
            store,
            max_age: section.max_job_age(),
            batch_size: section.cleanup_batch_size,
            tick: section.cleanup_interval(),
        }
    }

    /// Sweeps immediately, then once per interval, until the task is
    /// dropped at shutdown.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            loop {
                ticker.tick().await;
                let deleted = self.sweep().await;
                info!(deleted, "cleanup sweep finished");
            }
        })
    }

    /// One pass over the root, bounded by the batch size; anything left over
    /// is picked up on the next tick. Returns the number of deleted jobs.
    pub async fn sweep(&self) -> usize {
        let root = self.store.root().to_path_buf();
        let mut entries = match fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "cannot read job root");
                return 0;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let max_age_ms = self.max_age.as_millis() as i64;
        let mut deleted = 0usize;
        let mut processed = 0usize;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !valid_job_id(&name) {
                if self.delete(&name, "invalid job id").await {
                    deleted += 1;
                }
                continue;
            }

            match self.store.read(&name).await {
                Ok(meta) => {
                    if now_ms - meta.created_at > max_age_ms {
                        if self.delete(&name, "expired").await {
                            deleted += 1;
                        }
                    }
                }
                Err(StoreError::NotFound { .. } | StoreError::Corrupt { .. }) => {
                    if self.delete(&name, "unreadable metadata").await {
                        deleted += 1;
                    }
                }
                Err(err) => {
                    warn!(job = %name, error = %err, "skipping job during sweep");
                }
            }

            processed += 1;
            if processed >= self.batch_size {
                break;
            }
        }

        deleted
    }

    async fn delete(&self, job_id: &str, reason: &str) -> bool {
        match self.store.delete(job_id).await {
            Ok(()) => {
                info!(job = %job_id, reason, "deleted job directory");
                true
            }
            Err(err) => {
                warn!(job = %job_id, error = %err, "failed to delete job directory");
                false
            }
        }
    }
}

/// Removes per-track intermediates (`*.tmp`, raw `video.*` / `audio.*`
/// downloads, chunk directories) once the finalized output exists. The
/// output file itself is never touched.
pub async fn cleanup_temp_files(job_dir: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(job_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("output.") || name == "meta.json" {
            continue;
        }
        let removable =
            name.ends_with(".tmp") || name.starts_with("video.") || name.starts_with("audio.");
        if !removable {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to remove intermediate");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobFiles, JobStatus, Meta, OutputKind};
    use tempfile::tempdir;

    fn section(batch: usize) -> StorageSection {
        StorageSection {
            root: String::new(),
            max_job_age_seconds: 3600,
            cleanup_interval_seconds: 3600,
            cleanup_batch_size: batch,
        }
    }

    fn meta_aged(id: &str, age_ms: i64) -> Meta {
        Meta {
            id: id.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now().timestamp_millis() - age_ms,
            source_id: "dQw4w9WgXcQ".to_string(),
            title: "t".to_string(),
            duration: 1.0,
            output_type: OutputKind::Audio,
            format: "mp3".to_string(),
            quality: None,
            bitrate: None,
            trim: None,
            files: JobFiles::default(),
            output: None,
            stream_only: false,
            error: None,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_jobs() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());

        let young = "Young0000000000000000";
        let old = "Old000000000000000000";
        store.create(young).await.unwrap();
        store.write(&meta_aged(young, 30 * 60 * 1000)).await.unwrap();
        store.create(old).await.unwrap();
        store.write(&meta_aged(old, 2 * 3600 * 1000)).await.unwrap();

        let reaper = Reaper::new(store.clone(), &section(5000));
        let deleted = reaper.sweep().await;
        assert_eq!(deleted, 1);
        assert!(store.exists(young).await);
        assert!(!store.exists(old).await);
    }

    #[tokio::test]
    async fn sweep_deletes_misnamed_and_corrupt_directories() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());

        std::fs::create_dir_all(dir.path().join("not-a-job-id")).unwrap();

        let corrupt = "Corrupt00000000000000";
        store.create(corrupt).await.unwrap();
        std::fs::write(store.meta_path(corrupt), b"garbage").unwrap();

        // Stray files are ignored.
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let reaper = Reaper::new(store.clone(), &section(5000));
        let deleted = reaper.sweep().await;
        assert_eq!(deleted, 2);
        assert!(dir.path().join("stray.txt").exists());
    }

    #[tokio::test]
    async fn sweep_respects_the_batch_cap() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());

        for i in 0..4 {
            let id = format!("Old{i}00000000000000000");
            store.create(&id).await.unwrap();
            store.write(&meta_aged(&id, 2 * 3600 * 1000)).await.unwrap();
        }

        let reaper = Reaper::new(store.clone(), &section(2));
        assert_eq!(reaper.sweep().await, 2);
        assert_eq!(reaper.sweep().await, 2);
        assert_eq!(reaper.sweep().await, 0);
    }

    #[tokio::test]
    async fn cleanup_keeps_output_and_meta() {
        let dir = tempdir().unwrap();
        let job_dir = dir.path().join("job");
        std::fs::create_dir_all(&job_dir).unwrap();
        for name in [
            "video.mp4",
            "audio.webm",
            "video.mp4.tmp",
            "output.mp4",
            "meta.json",
        ] {
            std::fs::write(job_dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir_all(job_dir.join("audio.webm.chunks")).unwrap();

        cleanup_temp_files(&job_dir).await.unwrap();

        assert!(job_dir.join("output.mp4").exists());
        assert!(job_dir.join("meta.json").exists());
        assert!(!job_dir.join("video.mp4").exists());
        assert!(!job_dir.join("audio.webm").exists());
        assert!(!job_dir.join("video.mp4.tmp").exists());
        assert!(!job_dir.join("audio.webm.chunks").exists());
    }
}
