use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::ffmpeg::{self, FFMPEG_BIN};
use crate::naming::{content_type_for_ext, output_filename};
use crate::store::{Meta, OutputKind};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("track file missing: {path}")]
    MissingTrack { path: PathBuf },
    #[error("failed to launch media tool: {0}")]
    Spawn(#[source] io::Error),
    #[error("media tool stdout unavailable")]
    NoStdout,
}

pub type StreamResult<T> = Result<T, StreamError>;

/// A live on-demand remux: response headers plus the byte channel fed by the
/// subprocess copy task. Dropping the receiver kills the subprocess.
#[derive(Debug)]
pub struct StreamJob {
    pub content_type: &'static str,
    pub filename: String,
    pub receiver: mpsc::Receiver<io::Result<Bytes>>,
}

/// Runs the media tool with stdout piped and shapes the copy toward the
/// client. The rate limit keeps the tool from running far ahead of a slow
/// consumer; 0 disables shaping.
#[derive(Debug, Clone)]
pub struct Streamer {
    rate_limit: u64,
    binary: String,
}

impl Streamer {
    pub fn new(rate_limit_bytes_per_sec: u64) -> Self {
        Self {
            rate_limit: rate_limit_bytes_per_sec,
            binary: FFMPEG_BIN.to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Starts the remux/transcode for a completed job's raw tracks.
    pub async fn open(&self, meta: &Meta, job_dir: &Path) -> StreamResult<StreamJob> {
        let args = match meta.output_type {
            OutputKind::Video => {
                let video = meta
                    .files
                    .video
                    .as_ref()
                    .map(|entry| job_dir.join(&entry.name))
                    .ok_or_else(|| StreamError::MissingTrack {
                        path: job_dir.join("video"),
                    })?;
                let audio = meta
                    .files
                    .audio
                    .as_ref()
                    .map(|entry| job_dir.join(&entry.name))
                    .ok_or_else(|| StreamError::MissingTrack {
                        path: job_dir.join("audio"),
                    })?;
                require_file(&video).await?;
                require_file(&audio).await?;
                ffmpeg::stream_video_args(&video, &audio, &meta.format)
            }
            OutputKind::Audio => {
                let audio = meta
                    .files
                    .audio
                    .as_ref()
                    .map(|entry| job_dir.join(&entry.name))
                    .ok_or_else(|| StreamError::MissingTrack {
                        path: job_dir.join("audio"),
                    })?;
                require_file(&audio).await?;
                ffmpeg::stream_audio_args(
                    &audio,
                    &meta.format,
                    meta.bitrate.as_deref().unwrap_or(""),
                )
            }
        };
        self.spawn_piped(&args, content_type_for_ext(&meta.format), output_filename(meta))
    }

    fn spawn_piped(
        &self,
        args: &[String],
        content_type: &'static str,
        filename: String,
    ) -> StreamResult<StreamJob> {
        debug!(binary = %self.binary, args = ?args, "starting stream subprocess");
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(StreamError::Spawn)?;
        let stdout = child.stdout.take().ok_or(StreamError::NoStdout)?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(copy_loop(child, stdout, tx, self.rate_limit));

        Ok(StreamJob {
            content_type,
            filename,
            receiver: rx,
        })
    }
}

/// Reads the subprocess stdout in 64 KiB slices and forwards them to the
/// response channel. A failed send means the client went away: the
/// subprocess is killed so it does not linger as a zombie. After `n` bytes
/// the loop sleeps until `elapsed >= n / rate`.
async fn copy_loop(
    mut child: Child,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<io::Result<Bytes>>,
    rate_limit: u64,
) {
    let started = Instant::now();
    let mut written: u64 = 0;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buffer).await {
            Ok(0) => {
                let _ = child.wait().await;
                debug!("stream subprocess finished");
                return;
            }
            Ok(n) => {
                if tx
                    .send(Ok(Bytes::copy_from_slice(&buffer[..n])))
                    .await
                    .is_err()
                {
                    warn!("stream consumer disconnected, killing subprocess");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return;
                }
                written += n as u64;
                if let Some(delay) = pacing_delay(written, rate_limit, started.elapsed()) {
                    sleep(delay).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "stream subprocess read error");
                let _ = tx.send(Err(err)).await;
                let _ = child.wait().await;
                return;
            }
        }
    }
}

/// Elapsed/bytes accounting: how much longer the copy must have taken to
/// stay at or below the target rate.
fn pacing_delay(written: u64, rate: u64, elapsed: Duration) -> Option<Duration> {
    if rate == 0 {
        return None;
    }
    let required = Duration::from_secs_f64(written as f64 / rate as f64);
    required.checked_sub(elapsed).filter(|d| !d.is_zero())
}

async fn require_file(path: &Path) -> StreamResult<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(StreamError::MissingTrack {
            path: path.to_path_buf(),
        }),
    }
}
