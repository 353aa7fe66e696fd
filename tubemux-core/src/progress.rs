use std::path::Path;

use serde::Serialize;

use crate::store::{FileEntry, JobStatus, Meta, OutputKind};

/// Per-track percentages, reported only while a job is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<u8>,
    pub audio: u8,
}

/// Derives `(progress%, detail)` for a job from its on-disk byte counts.
/// There are no persisted intermediate states; the download phase is
/// inferred from final files, chunk directories, and `.tmp` assemblies.
pub fn estimate_progress(meta: &Meta, job_dir: &Path) -> (u8, Option<ProgressDetail>) {
    match meta.status {
        JobStatus::Error => return (0, None),
        JobStatus::Completed => return (100, None),
        JobStatus::Pending => {}
    }

    match (meta.output_type, &meta.files.video, &meta.files.audio) {
        (OutputKind::Video, Some(video), Some(audio)) => {
            let video_pct = track_percent(job_dir, video);
            let audio_pct = track_percent(job_dir, audio);
            let total = (0.7 * f64::from(video_pct) + 0.3 * f64::from(audio_pct)) as u8;
            (
                total.min(100),
                Some(ProgressDetail {
                    video: Some(video_pct),
                    audio: audio_pct,
                }),
            )
        }
        (_, _, Some(audio)) => {
            let audio_pct = track_percent(job_dir, audio);
            (
                audio_pct.min(100),
                Some(ProgressDetail {
                    video: None,
                    audio: audio_pct,
                }),
            )
        }
        _ => (0, None),
    }
}

/// Bytes present for one track, in download order of likelihood: the final
/// file, the chunk directory, the `.tmp` assembly.
fn track_percent(job_dir: &Path, entry: &FileEntry) -> u8 {
    if entry.size == 0 {
        return 0;
    }
    let bytes = track_bytes(job_dir, entry);
    let percent = (bytes as f64 / entry.size as f64 * 100.0) as u64;
    percent.min(100) as u8
}

fn track_bytes(job_dir: &Path, entry: &FileEntry) -> u64 {
    let final_path = job_dir.join(&entry.name);
    if file_size(&final_path) > 0 {
        return entry.size;
    }

    let chunks_dir = job_dir.join(format!("{}.chunks", entry.name));
    if chunks_dir.is_dir() {
        return std::fs::read_dir(&chunks_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);
    }

    // Assembly or post-processing in flight: the download itself is done.
    let tmp_path = job_dir.join(format!("{}.tmp", entry.name));
    if tmp_path.is_file() {
        return entry.size;
    }

    0
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
