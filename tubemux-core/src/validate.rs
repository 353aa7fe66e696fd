use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::store::OutputKind;

pub const VIDEO_FORMATS: &[&str] = &["mp4", "webm", "mkv"];
pub const AUDIO_FORMATS: &[&str] = &["mp3", "m4a", "wav", "opus", "flac"];
pub const QUALITIES: &[&str] = &["2160p", "1440p", "1080p", "720p", "480p", "360p", "144p"];
pub const OS_TYPES: &[&str] = &["ios", "android", "macos", "windows", "linux"];

const MAX_TRIM_SECONDS: f64 = 24.0 * 3600.0;

static SOURCE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/(?:watch\?v=|embed/|v/|shorts/)|youtu\.be/)([A-Za-z0-9_-]{11})")
        .expect("static regex")
});
static JOB_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{21}$").expect("static regex"));
static BITRATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}k$").expect("static regex"));

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

fn invalid(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

/// Body of `POST /api/download`.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub os: Option<String>,
    pub output: OutputOptions,
    #[serde(default)]
    pub audio: AudioOptions,
    #[serde(default)]
    pub trim: Option<TrimOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputOptions {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub format: String,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioOptions {
    #[serde(rename = "trackId", default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub bitrate: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrimOptions {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub accurate: bool,
}

/// Pulls the 11-character source id out of any recognized URL shape.
pub fn extract_source_id(url: &str) -> Result<String, ValidationError> {
    SOURCE_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| invalid("url", "not a recognized video URL"))
}

pub fn validate_request(req: &DownloadRequest) -> Result<(), ValidationError> {
    if req.url.is_empty() {
        return Err(invalid("url", "URL is required"));
    }
    extract_source_id(&req.url)?;

    if let Some(os) = req.os.as_deref().filter(|os| !os.is_empty()) {
        if !OS_TYPES.contains(&os) {
            return Err(invalid(
                "os",
                format!("invalid OS type, must be one of {OS_TYPES:?}"),
            ));
        }
    }

    let format = req.output.format.as_str();
    match req.output.kind {
        OutputKind::Video => {
            if !VIDEO_FORMATS.contains(&format) {
                return Err(invalid(
                    "output.format",
                    format!("invalid video format, must be one of {VIDEO_FORMATS:?}"),
                ));
            }
            if let Some(quality) = req.output.quality.as_deref().filter(|q| !q.is_empty()) {
                if !QUALITIES.contains(&quality) {
                    return Err(invalid(
                        "output.quality",
                        format!("invalid quality, must be one of {QUALITIES:?}"),
                    ));
                }
            }
        }
        OutputKind::Audio => {
            if !AUDIO_FORMATS.contains(&format) {
                return Err(invalid(
                    "output.format",
                    format!("invalid audio format, must be one of {AUDIO_FORMATS:?}"),
                ));
            }
        }
    }

    if let Some(bitrate) = req.audio.bitrate.as_deref().filter(|b| !b.is_empty()) {
        if !BITRATE.is_match(bitrate) {
            return Err(invalid(
                "audio.bitrate",
                "invalid bitrate format, must be like '192k'",
            ));
        }
    }

    if let Some(trim) = &req.trim {
        if trim.start < 0.0 {
            return Err(invalid("trim.start", "start time must be >= 0"));
        }
        if trim.end <= trim.start {
            return Err(invalid("trim.end", "end time must be greater than start"));
        }
        if trim.end - trim.start > MAX_TRIM_SECONDS {
            return Err(invalid("trim", "trim duration must be <= 24h"));
        }
    }

    Ok(())
}

pub fn valid_job_id(id: &str) -> bool {
    JOB_ID.is_match(id)
}

/// Rejects path traversal in a filename path segment.
pub fn valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}
