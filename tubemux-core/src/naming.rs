use std::sync::LazyLock;

use regex::Regex;

use crate::store::{Meta, OutputKind};

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("static regex"));
static RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_]+").expect("static regex"));

const MAX_TITLE_LEN: usize = 200;

/// Strips characters that are unsafe in a download filename and collapses
/// whitespace/underscore runs.
pub fn sanitize_filename(name: &str) -> String {
    let name = INVALID_CHARS.replace_all(name, "_");
    let name = RUNS.replace_all(&name, "_");
    let name = name.trim_matches(|c| c == '_' || c == ' ');
    let mut out: String = name.chars().take(MAX_TITLE_LEN).collect();
    while !out.is_char_boundary(out.len()) {
        out.pop();
    }
    out
}

/// Builds the user-facing filename for Content-Disposition:
/// `title[_quality][_bitrate][_start-ends].format`.
pub fn output_filename(meta: &Meta) -> String {
    let mut title = sanitize_filename(&meta.title);
    if title.is_empty() {
        title = "output".to_string();
    }

    let mut parts = vec![title];
    match meta.output_type {
        OutputKind::Video => {
            if let Some(quality) = meta.quality.as_deref().filter(|q| !q.is_empty()) {
                parts.push(quality.to_string());
            }
        }
        OutputKind::Audio => {
            if let Some(bitrate) = meta.bitrate.as_deref().filter(|b| !b.is_empty()) {
                parts.push(bitrate.to_string());
            }
        }
    }
    if let Some(trim) = &meta.trim {
        parts.push(format!("{:.0}-{:.0}s", trim.start, trim.end));
    }

    format!("{}.{}", parts.join("_"), meta.format)
}

/// Maps a stream MIME type (codec parameters included) to a track file
/// extension.
pub fn ext_from_mime(mime_type: &str) -> String {
    let base = mime_type
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or(mime_type);
    match base {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "audio/mp4" => "m4a",
        "audio/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/flac" => "flac",
        "audio/wav" | "audio/x-wav" => "wav",
        other => return other.split('/').nth(1).unwrap_or("bin").to_string(),
    }
    .to_string()
}

pub fn content_type_for_ext(ext: &str) -> &'static str {
    match ext {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// ffmpeg muxer name for a container extension (`-f` flag); m4a is spelled
/// `ipod` and mkv `matroska` in ffmpeg.
pub fn ffmpeg_container(ext: &str) -> &str {
    match ext {
        "mkv" => "matroska",
        "m4a" => "ipod",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobFiles, JobStatus, TrimSpec};

    fn meta(output_type: OutputKind, format: &str) -> Meta {
        Meta {
            id: "A1b2C3d4E5f6G7h8I9j0K".to_string(),
            status: JobStatus::Pending,
            created_at: 0,
            source_id: "dQw4w9WgXcQ".to_string(),
            title: "Video: The \"Best\" One?".to_string(),
            duration: 100.0,
            output_type,
            format: format.to_string(),
            quality: Some("1080p".to_string()),
            bitrate: Some("192k".to_string()),
            trim: None,
            files: JobFiles::default(),
            output: None,
            stream_only: false,
            error: None,
        }
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("  spaced   out  "), "spaced_out");
        assert_eq!(sanitize_filename("__trimmed__"), "trimmed");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 200);
    }

    #[test]
    fn video_filename_carries_quality_and_trim() {
        let mut m = meta(OutputKind::Video, "mp4");
        m.trim = Some(TrimSpec {
            start: 10.0,
            end: 60.0,
            accurate: false,
        });
        assert_eq!(output_filename(&m), "Video_The_Best_One_1080p_10-60s.mp4");
    }

    #[test]
    fn audio_filename_carries_bitrate() {
        let m = meta(OutputKind::Audio, "mp3");
        assert_eq!(output_filename(&m), "Video_The_Best_One_192k.mp3");
    }

    #[test]
    fn empty_title_falls_back() {
        let mut m = meta(OutputKind::Audio, "mp3");
        m.title = "///".to_string();
        m.bitrate = None;
        assert_eq!(output_filename(&m), "output.mp3");
    }

    #[test]
    fn mime_mapping() {
        assert_eq!(ext_from_mime("audio/mp4; codecs=\"mp4a.40.2\""), "m4a");
        assert_eq!(ext_from_mime("audio/webm; codecs=\"opus\""), "webm");
        assert_eq!(ext_from_mime("video/mp4"), "mp4");
        assert_eq!(ext_from_mime("application/weird"), "weird");
    }

    #[test]
    fn container_names() {
        assert_eq!(ffmpeg_container("mkv"), "matroska");
        assert_eq!(ffmpeg_container("m4a"), "ipod");
        assert_eq!(ffmpeg_container("mp4"), "mp4");
    }
}
