use std::io;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::naming::ffmpeg_container;
use crate::store::TrimSpec;

pub const FFMPEG_BIN: &str = "ffmpeg";

/// Codecs that take no bitrate flag.
const LOSSLESS_CODECS: &[&str] = &["pcm_s16le", "flac"];

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("failed to launch ffmpeg: {0}")]
    Spawn(#[source] io::Error),
    #[error("ffmpeg exited with status {0}")]
    Failed(std::process::ExitStatus),
    #[error("invalid trim range: end ({end:.2}) must be greater than start ({start:.2})")]
    InvalidTrim { start: f64, end: f64 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type FfmpegResult<T> = Result<T, FfmpegError>;

pub fn audio_codec_for(format: &str) -> &'static str {
    match format {
        "mp3" => "libmp3lame",
        "m4a" | "mp4" => "aac",
        "wav" => "pcm_s16le",
        "opus" => "libopus",
        "flac" => "flac",
        "webm" => "libopus",
        _ => "aac",
    }
}

pub fn video_codec_for(format: &str) -> &'static str {
    match format {
        "mp4" | "mkv" => "libx264",
        "webm" => "libvpx-vp9",
        _ => "libx264",
    }
}

/// Whether the downloaded audio can land in the target container with a
/// plain codec copy: same container, the m4a/mp4 pair, or webm source into
/// opus (the upstream packs Opus in webm audio).
pub fn can_copy_audio(input_ext: &str, output_format: &str) -> bool {
    let input_ext = input_ext.trim_start_matches('.');
    if input_ext == output_format {
        return true;
    }
    if (input_ext == "m4a" || input_ext == "mp4")
        && (output_format == "m4a" || output_format == "mp4")
    {
        return true;
    }
    input_ext == "webm" && output_format == "opus"
}

fn extension_of(file: &str) -> &str {
    file.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

/// Muxes the two raw tracks into `output.<format>` with codec copy.
pub fn merge_args(job_dir: &Path, format: &str, video_file: &str, audio_file: &str) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        job_dir.join(video_file).display().to_string(),
        "-i".into(),
        job_dir.join(audio_file).display().to_string(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        job_dir.join(format!("output.{format}")).display().to_string(),
    ]
}

/// Converts the raw audio track into `output.<format>`: codec copy when the
/// containers are compatible, otherwise an encode at the configured bitrate.
pub fn convert_audio_args(
    job_dir: &Path,
    format: &str,
    bitrate: &str,
    audio_file: &str,
) -> Vec<String> {
    let input = job_dir.join(audio_file).display().to_string();
    let output = job_dir.join(format!("output.{format}")).display().to_string();

    if can_copy_audio(extension_of(audio_file), format) {
        return vec![
            "-y".into(),
            "-i".into(),
            input,
            "-c:a".into(),
            "copy".into(),
            output,
        ];
    }

    let codec = audio_codec_for(format);
    let mut args = vec![
        "-y".into(),
        "-i".into(),
        input,
        "-threads".into(),
        "0".into(),
        "-c:a".into(),
        codec.into(),
    ];
    if !bitrate.is_empty() && !LOSSLESS_CODECS.contains(&codec) {
        args.push("-b:a".into());
        args.push(bitrate.into());
    }
    args.push(output);
    args
}

fn trim_output_args(
    input: String,
    output: String,
    trim: &TrimSpec,
    encode: Option<Vec<String>>,
) -> Vec<String> {
    let duration = trim.end - trim.start;
    let mut args = vec![
        "-y".into(),
        "-ss".into(),
        format!("{:.3}", trim.start),
        "-i".into(),
        input,
        "-t".into(),
        format!("{duration:.3}"),
    ];
    match encode {
        Some(codec_args) => args.extend(codec_args),
        None => {
            args.push("-c".into());
            args.push("copy".into());
        }
    }
    args.push(output);
    args
}

/// Re-cuts `output.<format>` in place: copy at keyframes, or a re-encode
/// when the trim must be sample-accurate.
pub fn trim_video_args(job_dir: &Path, format: &str, trim: &TrimSpec, bitrate: &str) -> Vec<String> {
    let input = job_dir.join(format!("output.{format}")).display().to_string();
    let output = job_dir
        .join(format!("output_trimmed.{format}"))
        .display()
        .to_string();

    let encode = trim.accurate.then(|| {
        let mut codec_args = vec![
            "-c:v".into(),
            video_codec_for(format).into(),
            "-c:a".into(),
            audio_codec_for(format).into(),
        ];
        if !bitrate.is_empty() {
            codec_args.push("-b:a".into());
            codec_args.push(bitrate.into());
        }
        codec_args
    });
    trim_output_args(input, output, trim, encode)
}

pub fn trim_audio_args(job_dir: &Path, format: &str, trim: &TrimSpec, bitrate: &str) -> Vec<String> {
    let input = job_dir.join(format!("output.{format}")).display().to_string();
    let output = job_dir
        .join(format!("output_trimmed.{format}"))
        .display()
        .to_string();

    let encode = trim.accurate.then(|| {
        let codec = audio_codec_for(format);
        let mut codec_args = vec![
            "-threads".into(),
            "0".into(),
            "-c:a".into(),
            codec.to_string(),
        ];
        if !bitrate.is_empty() && !LOSSLESS_CODECS.contains(&codec) {
            codec_args.push("-b:a".into());
            codec_args.push(bitrate.into());
        }
        codec_args
    });
    let encode = encode.or_else(|| Some(vec!["-c:a".into(), "copy".into()]));
    trim_output_args(input, output, trim, encode)
}

/// Remux argv for the stream endpoint: both tracks copied into the target
/// container on stdout. mp4 gets the fragmented flags so the stream is
/// playable progressively.
pub fn stream_video_args(video_path: &Path, audio_path: &Path, format: &str) -> Vec<String> {
    let mut args = vec![
        "-y".into(),
        "-i".into(),
        video_path.display().to_string(),
        "-i".into(),
        audio_path.display().to_string(),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-f".into(),
        ffmpeg_container(format).to_string(),
    ];
    if format == "mp4" {
        args.push("-movflags".into());
        args.push("frag_keyframe+empty_moov+faststart".into());
    }
    args.push("pipe:1".into());
    args
}

pub fn stream_audio_args(audio_path: &Path, format: &str, bitrate: &str) -> Vec<String> {
    let input_ext = audio_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    let input = audio_path.display().to_string();

    if can_copy_audio(input_ext, format) {
        return vec![
            "-y".into(),
            "-i".into(),
            input,
            "-c:a".into(),
            "copy".into(),
            "-f".into(),
            ffmpeg_container(format).to_string(),
            "pipe:1".into(),
        ];
    }

    let codec = audio_codec_for(format);
    let mut args = vec![
        "-y".into(),
        "-i".into(),
        input,
        "-vn".into(),
        "-c:a".into(),
        codec.into(),
    ];
    if !LOSSLESS_CODECS.contains(&codec) {
        args.push("-b:a".into());
        args.push(if bitrate.is_empty() { "192k" } else { bitrate }.into());
    }
    args.push("-f".into());
    args.push(ffmpeg_container(format).to_string());
    args.push("pipe:1".into());
    args
}

/// Runs an ffmpeg invocation to completion. The tool is resolved from PATH
/// at call time; a missing binary surfaces as `Spawn`.
pub async fn run(args: &[String]) -> FfmpegResult<()> {
    debug!(args = ?args, "running ffmpeg");
    let status = Command::new(FFMPEG_BIN)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(FfmpegError::Spawn)?;
    if !status.success() {
        return Err(FfmpegError::Failed(status));
    }
    Ok(())
}

pub async fn merge(
    job_dir: &Path,
    format: &str,
    video_file: &str,
    audio_file: &str,
) -> FfmpegResult<String> {
    run(&merge_args(job_dir, format, video_file, audio_file)).await?;
    Ok(format!("output.{format}"))
}

pub async fn convert_audio(
    job_dir: &Path,
    format: &str,
    bitrate: &str,
    audio_file: &str,
) -> FfmpegResult<String> {
    run(&convert_audio_args(job_dir, format, bitrate, audio_file)).await?;
    Ok(format!("output.{format}"))
}

async fn replace_with_trimmed(job_dir: &Path, format: &str) -> FfmpegResult<String> {
    let input = job_dir.join(format!("output.{format}"));
    let trimmed = job_dir.join(format!("output_trimmed.{format}"));
    // Remove first so the rename lands cleanly on every platform.
    let _ = tokio::fs::remove_file(&input).await;
    tokio::fs::rename(&trimmed, &input).await?;
    Ok(format!("output.{format}"))
}

pub async fn trim_video(
    job_dir: &Path,
    format: &str,
    trim: &TrimSpec,
    bitrate: &str,
) -> FfmpegResult<String> {
    if trim.end <= trim.start {
        return Err(FfmpegError::InvalidTrim {
            start: trim.start,
            end: trim.end,
        });
    }
    run(&trim_video_args(job_dir, format, trim, bitrate)).await?;
    replace_with_trimmed(job_dir, format).await
}

pub async fn trim_audio(
    job_dir: &Path,
    format: &str,
    trim: &TrimSpec,
    bitrate: &str,
) -> FfmpegResult<String> {
    if trim.end <= trim.start {
        return Err(FfmpegError::InvalidTrim {
            start: trim.start,
            end: trim.end,
        });
    }
    run(&trim_audio_args(job_dir, format, trim, bitrate)).await?;
    replace_with_trimmed(job_dir, format).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dir() -> PathBuf {
        PathBuf::from("/jobs/abc")
    }

    #[test]
    fn merge_is_copy_only() {
        let args = merge_args(&dir(), "mp4", "video.mp4", "audio.m4a");
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy -c:a copy"));
        assert!(joined.ends_with("/jobs/abc/output.mp4"));
    }

    #[test]
    fn audio_copy_vs_encode() {
        let copy = convert_audio_args(&dir(), "m4a", "192k", "audio.m4a");
        assert!(copy.join(" ").contains("-c:a copy"));

        let encode = convert_audio_args(&dir(), "mp3", "192k", "audio.webm");
        let joined = encode.join(" ");
        assert!(joined.contains("-c:a libmp3lame"));
        assert!(joined.contains("-b:a 192k"));
    }

    #[test]
    fn lossless_targets_take_no_bitrate() {
        let wav = convert_audio_args(&dir(), "wav", "192k", "audio.m4a");
        assert!(!wav.join(" ").contains("-b:a"));
        let flac = convert_audio_args(&dir(), "flac", "192k", "audio.m4a");
        assert!(!flac.join(" ").contains("-b:a"));
    }

    #[test]
    fn copy_compatibility_table() {
        assert!(can_copy_audio("m4a", "m4a"));
        assert!(can_copy_audio("m4a", "mp4"));
        assert!(can_copy_audio("mp4", "m4a"));
        assert!(can_copy_audio("webm", "opus"));
        assert!(!can_copy_audio("webm", "mp3"));
        assert!(!can_copy_audio("m4a", "opus"));
    }

    #[test]
    fn fast_trim_copies_at_keyframes() {
        let trim = TrimSpec {
            start: 10.0,
            end: 60.0,
            accurate: false,
        };
        let args = trim_video_args(&dir(), "mp4", &trim, "");
        let joined = args.join(" ");
        assert!(joined.contains("-ss 10.000"));
        assert!(joined.contains("-t 50.000"));
        assert!(joined.contains("-c copy"));
    }

    #[test]
    fn accurate_trim_reencodes() {
        let trim = TrimSpec {
            start: 1.5,
            end: 4.0,
            accurate: true,
        };
        let args = trim_video_args(&dir(), "webm", &trim, "128k");
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.contains("-b:a 128k"));
    }

    #[test]
    fn stream_video_mp4_is_fragmented() {
        let args = stream_video_args(
            &dir().join("video.mp4"),
            &dir().join("audio.m4a"),
            "mp4",
        );
        let joined = args.join(" ");
        assert!(joined.contains("-movflags frag_keyframe+empty_moov+faststart"));
        assert!(joined.ends_with("pipe:1"));

        let mkv = stream_video_args(&dir().join("video.mp4"), &dir().join("audio.m4a"), "mkv");
        let joined = mkv.join(" ");
        assert!(joined.contains("-f matroska"));
        assert!(!joined.contains("-movflags"));
    }

    #[test]
    fn stream_audio_copy_and_transcode() {
        let copy = stream_audio_args(&dir().join("audio.webm"), "opus", "");
        assert!(copy.join(" ").contains("-c:a copy"));

        let transcode = stream_audio_args(&dir().join("audio.webm"), "mp3", "");
        let joined = transcode.join(" ");
        assert!(joined.contains("-vn"));
        assert!(joined.contains("-c:a libmp3lame"));
        assert!(joined.contains("-b:a 192k"));
    }

    #[test]
    fn m4a_streams_through_the_ipod_muxer() {
        let args = stream_audio_args(&dir().join("audio.m4a"), "m4a", "");
        assert!(args.join(" ").contains("-f ipod"));
    }
}
