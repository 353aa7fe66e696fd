use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::downloader::Downloader;
use crate::extract::{ExtractError, Extractor, TrackDescriptor};
use crate::ffmpeg;
use crate::naming::ext_from_mime;
use crate::reaper::cleanup_temp_files;
use crate::selector::{needs_reencode, select_audio, select_video};
use crate::signer::UrlSigner;
use crate::store::{
    new_job_id, FileEntry, JobFiles, JobStatus, JobStore, Meta, OutputKind, StoreError, TrimSpec,
};
use crate::validate::DownloadRequest;

/// Hard ceiling on one job's post-submit pipeline.
const JOB_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Pre-merge duration ceilings: transcoding is CPU-heavy, remuxing is not.
const MAX_DURATION_TRANSCODE: f64 = 15.0 * 60.0;
const MAX_DURATION_REMUX: f64 = 4.0 * 3600.0;

const DEFAULT_OS: &str = "windows";
const DEFAULT_BITRATE: &str = "192k";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to fetch source metadata: {0}")]
    Extract(#[from] ExtractError),
    #[error("no compatible video stream found")]
    VideoNotFound,
    #[error("no compatible audio stream found")]
    AudioNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type JobResult<T> = Result<T, JobError>;

/// What the submit endpoint reports back to the caller.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub status_url: String,
    pub title: String,
    pub duration: f64,
    pub requested_quality: Option<String>,
    pub selected_quality: Option<String>,
    pub quality_changed: bool,
    pub quality_change_reason: Option<String>,
    pub needs_reencode: bool,
}

/// Owns the job state machine: `pending -> (completed | error)`, with the
/// in-between phases implicit in the on-disk layout.
#[derive(Debug, Clone)]
pub struct JobRunner {
    store: JobStore,
    extractor: Extractor,
    downloader: Downloader,
    signer: UrlSigner,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        extractor: Extractor,
        downloader: Downloader,
        signer: UrlSigner,
    ) -> Self {
        Self {
            store,
            extractor,
            downloader,
            signer,
        }
    }

    /// Resolves the catalog, picks tracks, persists the initial metadata,
    /// and detaches the download/processing pipeline. Returns as soon as the
    /// job is accepted; progress is observed via the status endpoint.
    pub async fn submit(&self, source_id: &str, req: &DownloadRequest) -> JobResult<SubmitOutcome> {
        let catalog = self.extractor.extract(source_id).await?;

        let os_type = req.os.as_deref().filter(|os| !os.is_empty()).unwrap_or(DEFAULT_OS);
        let bitrate = req
            .audio
            .bitrate
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BITRATE)
            .to_string();
        let requested_quality = req.output.quality.as_deref().filter(|q| !q.is_empty());
        let track_id = req.audio.track_id.as_deref();

        let (video_pick, audio_stream) = match req.output.kind {
            OutputKind::Video => {
                let pick = select_video(&catalog, requested_quality, os_type);
                if pick.stream.is_none() {
                    return Err(JobError::VideoNotFound);
                }
                let audio =
                    select_audio(&catalog, track_id, os_type).ok_or(JobError::AudioNotFound)?;
                (pick, audio)
            }
            OutputKind::Audio => {
                let audio =
                    select_audio(&catalog, track_id, os_type).ok_or(JobError::AudioNotFound)?;
                (Default::default(), audio)
            }
        };

        let job_id = new_job_id();
        self.store.create(&job_id).await?;

        let mut files = JobFiles::default();
        if let Some(video) = &video_pick.stream {
            files.video = Some(FileEntry {
                name: format!("video.{}", ext_from_mime(&video.mime_type)),
                size: video.content_length,
            });
        }
        files.audio = Some(FileEntry {
            name: format!("audio.{}", ext_from_mime(&audio_stream.mime_type)),
            size: audio_stream.content_length,
        });

        let meta = Meta {
            id: job_id.clone(),
            status: JobStatus::Pending,
            created_at: Utc::now().timestamp_millis(),
            source_id: source_id.to_string(),
            title: catalog.title.clone(),
            duration: catalog.duration,
            output_type: req.output.kind,
            format: req.output.format.clone(),
            quality: video_pick.selected_quality.clone(),
            bitrate: Some(bitrate),
            trim: req.trim.map(|t| TrimSpec {
                start: t.start,
                end: t.end,
                accurate: t.accurate,
            }),
            files,
            output: None,
            stream_only: false,
            error: None,
        };
        if let Err(err) = self.store.write(&meta).await {
            let _ = self.store.delete(&job_id).await;
            return Err(err.into());
        }

        let reencode = video_pick
            .stream
            .as_ref()
            .map(|video| needs_reencode(video, Some(&audio_stream), &req.output.format))
            .unwrap_or(false);

        self.spawn_pipeline(meta.clone(), video_pick.stream.clone(), audio_stream);

        Ok(SubmitOutcome {
            status_url: self.signer.status_url(&job_id),
            job_id,
            title: catalog.title,
            duration: catalog.duration,
            requested_quality: requested_quality.map(str::to_string),
            selected_quality: video_pick.selected_quality,
            quality_changed: video_pick.quality_changed,
            quality_change_reason: video_pick.quality_change_reason,
            needs_reencode: reencode,
        })
    }

    /// Runs the pipeline under the job deadline and converts every failure
    /// mode, panics included, into a terminal `error` record. The process
    /// must never die because one job did.
    fn spawn_pipeline(
        &self,
        meta: Meta,
        video: Option<TrackDescriptor>,
        audio: TrackDescriptor,
    ) {
        let store = self.store.clone();
        let downloader = self.downloader.clone();
        let job_id = meta.id.clone();
        tokio::spawn(async move {
            let pipeline = run_pipeline(store.clone(), downloader, meta, video, audio);
            match std::panic::AssertUnwindSafe(timeout(JOB_DEADLINE, pipeline))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(_elapsed)) => {
                    warn!(job = %job_id, "job deadline exceeded");
                    if let Err(err) = store.mark_error(&job_id, "Job timed out").await {
                        error!(job = %job_id, error = %err, "failed to record job timeout");
                    }
                }
                Err(_panic) => {
                    error!(job = %job_id, "job pipeline panicked");
                    if let Err(err) = store.mark_error(&job_id, "Internal error").await {
                        error!(job = %job_id, error = %err, "failed to record job panic");
                    }
                }
            }
        });
    }
}

/// True when the post-processing step must re-encode rather than copy:
/// sample-accurate video trims, and audio conversions outside the container
/// compatibility set.
pub(crate) fn needs_transcode(meta: &Meta) -> bool {
    match meta.output_type {
        OutputKind::Video => meta
            .trim
            .as_ref()
            .map(|trim| trim.accurate)
            .unwrap_or(false),
        OutputKind::Audio => meta
            .files
            .audio
            .as_ref()
            .map(|audio| {
                let ext = audio.name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
                !ffmpeg::can_copy_audio(ext, &meta.format)
            })
            .unwrap_or(false),
    }
}

/// Merge only when the duration is within budget for the work involved;
/// everything longer is served by the on-demand streamer instead.
pub(crate) fn should_merge(meta: &Meta) -> bool {
    if needs_transcode(meta) {
        meta.duration <= MAX_DURATION_TRANSCODE
    } else {
        meta.duration <= MAX_DURATION_REMUX
    }
}

async fn run_pipeline(
    store: JobStore,
    downloader: Downloader,
    meta: Meta,
    video: Option<TrackDescriptor>,
    audio: TrackDescriptor,
) {
    let job_id = meta.id.clone();
    let job_dir = store.dir(&job_id);
    info!(job = %job_id, source = %meta.source_id, "starting downloads");

    let download_result = match (&video, &meta.files.video, &meta.files.audio) {
        (Some(video_stream), Some(video_file), Some(audio_file)) => {
            let video_dest = job_dir.join(&video_file.name);
            let audio_dest = job_dir.join(&audio_file.name);
            tokio::try_join!(
                downloader.download(&video_stream.url, &video_dest, video_stream.content_length),
                downloader.download(&audio.url, &audio_dest, audio.content_length),
            )
            .map(|_| ())
        }
        (_, _, Some(audio_file)) => {
            let audio_dest = job_dir.join(&audio_file.name);
            downloader
                .download(&audio.url, &audio_dest, audio.content_length)
                .await
        }
        _ => return fail(&store, &job_id, "Download failed: no tracks selected").await,
    };
    if let Err(err) = download_result {
        warn!(job = %job_id, error = %err, "download failed");
        return fail(&store, &job_id, format!("Download failed: {err}")).await;
    }

    info!(job = %job_id, "downloads complete");

    if !should_merge(&meta) {
        info!(
            job = %job_id,
            duration = meta.duration,
            transcode = needs_transcode(&meta),
            "duration over merge budget, marking stream-only"
        );
        if let Err(err) = store.mark_stream_only(&job_id).await {
            error!(job = %job_id, error = %err, "failed to mark job stream-only");
        }
        return;
    }

    let bitrate = meta.bitrate.clone().unwrap_or_default();
    let output = match meta.output_type {
        OutputKind::Video => {
            let (video_name, audio_name) = match (&meta.files.video, &meta.files.audio) {
                (Some(v), Some(a)) => (v.name.clone(), a.name.clone()),
                _ => return fail(&store, &job_id, "Processing failed: track records missing").await,
            };
            let merged =
                match ffmpeg::merge(&job_dir, &meta.format, &video_name, &audio_name).await {
                    Ok(output) => output,
                    Err(err) => {
                        return fail(&store, &job_id, format!("Processing failed: {err}")).await
                    }
                };
            match &meta.trim {
                Some(trim) => {
                    match ffmpeg::trim_video(&job_dir, &meta.format, trim, &bitrate).await {
                        Ok(output) => output,
                        Err(err) => {
                            return fail(&store, &job_id, format!("Trim failed: {err}")).await
                        }
                    }
                }
                None => merged,
            }
        }
        OutputKind::Audio => {
            let audio_name = match &meta.files.audio {
                Some(a) => a.name.clone(),
                None => return fail(&store, &job_id, "Conversion failed: track record missing").await,
            };
            let converted =
                match ffmpeg::convert_audio(&job_dir, &meta.format, &bitrate, &audio_name).await {
                    Ok(output) => output,
                    Err(err) => {
                        return fail(&store, &job_id, format!("Conversion failed: {err}")).await
                    }
                };
            match &meta.trim {
                Some(trim) => {
                    match ffmpeg::trim_audio(&job_dir, &meta.format, trim, &bitrate).await {
                        Ok(output) => output,
                        Err(err) => {
                            return fail(&store, &job_id, format!("Trim failed: {err}")).await
                        }
                    }
                }
                None => converted,
            }
        }
    };

    if let Err(err) = cleanup_temp_files(&job_dir).await {
        warn!(job = %job_id, error = %err, "failed to remove intermediate files");
    }

    match store.mark_completed(&job_id, &output).await {
        Ok(()) => info!(job = %job_id, output = %output, "job completed"),
        Err(err) => error!(job = %job_id, error = %err, "failed to finalize job"),
    }
}

async fn fail(store: &JobStore, job_id: &str, message: impl Into<String>) {
    if let Err(err) = store.mark_error(job_id, message).await {
        error!(job = %job_id, error = %err, "failed to record job error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(output_type: OutputKind, format: &str, duration: f64) -> Meta {
        Meta {
            id: "A1b2C3d4E5f6G7h8I9j0K".to_string(),
            status: JobStatus::Pending,
            created_at: 0,
            source_id: "dQw4w9WgXcQ".to_string(),
            title: "t".to_string(),
            duration,
            output_type,
            format: format.to_string(),
            quality: None,
            bitrate: Some("192k".to_string()),
            trim: None,
            files: JobFiles {
                video: Some(FileEntry {
                    name: "video.mp4".to_string(),
                    size: 10,
                }),
                audio: Some(FileEntry {
                    name: "audio.webm".to_string(),
                    size: 10,
                }),
            },
            output: None,
            stream_only: false,
            error: None,
        }
    }

    #[test]
    fn accurate_video_trim_forces_transcode() {
        let mut m = meta(OutputKind::Video, "mp4", 100.0);
        assert!(!needs_transcode(&m));
        m.trim = Some(TrimSpec {
            start: 0.0,
            end: 10.0,
            accurate: false,
        });
        assert!(!needs_transcode(&m));
        m.trim = Some(TrimSpec {
            start: 0.0,
            end: 10.0,
            accurate: true,
        });
        assert!(needs_transcode(&m));
    }

    #[test]
    fn audio_transcode_follows_compatibility() {
        // webm source to opus target is a copy.
        let mut m = meta(OutputKind::Audio, "opus", 100.0);
        assert!(!needs_transcode(&m));
        // webm source to mp3 needs an encode.
        m.format = "mp3".to_string();
        assert!(needs_transcode(&m));
        // m4a to mp4 is within the compatible pair.
        m.files.audio = Some(FileEntry {
            name: "audio.m4a".to_string(),
            size: 10,
        });
        m.format = "mp4".to_string();
        assert!(!needs_transcode(&m));
    }

    #[test]
    fn merge_budget_is_fifteen_minutes_for_transcodes() {
        let mut m = meta(OutputKind::Audio, "mp3", 14.0 * 60.0);
        assert!(needs_transcode(&m));
        assert!(should_merge(&m));
        m.duration = 16.0 * 60.0;
        assert!(!should_merge(&m));
    }

    #[test]
    fn merge_budget_is_four_hours_for_remuxes() {
        let mut m = meta(OutputKind::Video, "mp4", 3.9 * 3600.0);
        assert!(!needs_transcode(&m));
        assert!(should_merge(&m));
        m.duration = 4.1 * 3600.0;
        assert!(!should_merge(&m));
    }
}
