use std::cmp::Ordering;

use crate::extract::{ExtractResponse, TrackDescriptor};

/// Static capability profile for a client OS; the codec lists are ordered by
/// preference and double as the compatibility filter.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub max_quality: &'static str,
    pub video_codecs: &'static [&'static str],
    pub audio_codecs: &'static [&'static str],
}

const PROFILE_IOS: DeviceProfile = DeviceProfile {
    max_quality: "1080p",
    video_codecs: &["avc1"],
    audio_codecs: &["mp4a"],
};

const PROFILE_MACOS: DeviceProfile = DeviceProfile {
    max_quality: "1080p",
    video_codecs: &["avc1"],
    audio_codecs: &["mp4a"],
};

const PROFILE_MODERN: DeviceProfile = DeviceProfile {
    max_quality: "2160p",
    video_codecs: &["av01", "vp9", "avc1"],
    audio_codecs: &["opus", "mp4a"],
};

const DEFAULT_PROFILE: DeviceProfile = DeviceProfile {
    max_quality: "1080p",
    video_codecs: &["avc1"],
    audio_codecs: &["mp4a"],
};

const QUALITY_LADDER: &[(&str, u32)] = &[
    ("2160p", 2160),
    ("1440p", 1440),
    ("1080p", 1080),
    ("720p", 720),
    ("480p", 480),
    ("360p", 360),
    ("144p", 144),
];

pub fn device_profile(os_type: &str) -> &'static DeviceProfile {
    match os_type {
        "ios" => &PROFILE_IOS,
        "macos" => &PROFILE_MACOS,
        "android" | "windows" | "linux" => &PROFILE_MODERN,
        _ => &DEFAULT_PROFILE,
    }
}

pub fn quality_to_height(quality: &str) -> Option<u32> {
    QUALITY_LADDER
        .iter()
        .find(|(label, _)| *label == quality)
        .map(|(_, height)| *height)
}

pub fn height_to_quality(height: u32) -> Option<&'static str> {
    QUALITY_LADDER
        .iter()
        .find(|(_, h)| *h == height)
        .map(|(label, _)| *label)
}

fn quality_label(height: u32) -> String {
    height_to_quality(height)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{height}p"))
}

/// Pulls the codec tag out of a MIME type: `video/mp4; codecs="avc1.640028"`
/// yields `avc1`. Falls back to the MIME subtype when no codecs parameter is
/// present.
pub fn extract_codec(mime_type: &str) -> String {
    if let Some(idx) = mime_type.find("codecs=") {
        let codec = mime_type[idx + 7..].trim_matches(|c| c == '"' || c == '\'' || c == ' ');
        let codec = codec.split('.').next().unwrap_or(codec);
        return codec.to_string();
    }
    mime_type
        .split('/')
        .nth(1)
        .map(|sub| sub.split(';').next().unwrap_or(sub).trim().to_string())
        .unwrap_or_default()
}

fn codec_supported(codec: &str, supported: &[&str]) -> bool {
    supported.iter().any(|s| codec.starts_with(s))
}

/// Index of the codec in the preference list; absent codecs rank last.
fn codec_priority(codec: &str, preference: &[&str]) -> usize {
    preference
        .iter()
        .position(|c| codec.starts_with(c))
        .unwrap_or(preference.len())
}

#[derive(Debug, Clone, Default)]
pub struct VideoSelection {
    pub stream: Option<TrackDescriptor>,
    pub selected_quality: Option<String>,
    pub quality_changed: bool,
    pub quality_change_reason: Option<String>,
}

/// Picks the video track for a requested quality under a device profile.
pub fn select_video(
    catalog: &ExtractResponse,
    requested_quality: Option<&str>,
    os_type: &str,
) -> VideoSelection {
    let profile = device_profile(os_type);
    let mut result = VideoSelection::default();

    let mut compatible: Vec<&TrackDescriptor> = catalog
        .video_streams
        .iter()
        .filter(|stream| codec_supported(&extract_codec(&stream.mime_type), profile.video_codecs))
        .collect();
    if compatible.is_empty() {
        return result;
    }

    // Height descending, then bitrate descending.
    compatible.sort_by(|a, b| match b.height.cmp(&a.height) {
        Ordering::Equal => b
            .bitrate
            .partial_cmp(&a.bitrate)
            .unwrap_or(Ordering::Equal),
        other => other,
    });

    let max_height = quality_to_height(profile.max_quality).unwrap_or(0);
    let mut requested_height = requested_quality
        .and_then(quality_to_height)
        .unwrap_or(0);

    if requested_height > max_height {
        requested_height = max_height;
        result.quality_changed = true;
        result.quality_change_reason =
            Some(format!("Device max quality is {}", profile.max_quality));
    }

    let selected: Option<&TrackDescriptor> = if requested_height > 0 {
        let mut pick = compatible
            .iter()
            .find(|stream| stream.height == requested_height)
            .copied();
        if pick.is_none() {
            // No exact match: the closest lower quality, the list being
            // sorted descending.
            if let Some(stream) = compatible
                .iter()
                .find(|stream| stream.height < requested_height)
                .copied()
            {
                result.quality_changed = true;
                result.quality_change_reason = Some(format!(
                    "Requested {} not available, using {}",
                    requested_quality.unwrap_or_default(),
                    quality_label(stream.height)
                ));
                pick = Some(stream);
            }
        }
        if pick.is_none() {
            if let Some(stream) = compatible.first().copied() {
                result.quality_changed = true;
                result.quality_change_reason = Some(format!(
                    "Using highest available: {}",
                    quality_label(stream.height)
                ));
                pick = Some(stream);
            }
        }
        pick
    } else {
        compatible
            .iter()
            .find(|stream| stream.height <= max_height)
            .copied()
            .or_else(|| compatible.first().copied())
    };

    if let Some(stream) = selected {
        result.selected_quality = Some(quality_label(stream.height));
        result.stream = Some(stream.clone());
    }
    result
}

/// Picks the audio track: optional explicit track id, otherwise original
/// tracks preferred; ranked by codec preference then bitrate.
pub fn select_audio(
    catalog: &ExtractResponse,
    track_id: Option<&str>,
    os_type: &str,
) -> Option<TrackDescriptor> {
    let profile = device_profile(os_type);

    let mut compatible: Vec<&TrackDescriptor> = catalog
        .audio_streams
        .iter()
        .filter(|stream| codec_supported(&extract_codec(&stream.mime_type), profile.audio_codecs))
        .collect();
    if compatible.is_empty() {
        return None;
    }

    if let Some(wanted) = track_id.filter(|id| !id.is_empty()) {
        let filtered: Vec<&TrackDescriptor> = compatible
            .iter()
            .filter(|stream| stream.audio_track_id.as_deref() == Some(wanted))
            .copied()
            .collect();
        if !filtered.is_empty() {
            compatible = filtered;
        }
    } else {
        let originals: Vec<&TrackDescriptor> = compatible
            .iter()
            .filter(|stream| stream.is_original)
            .copied()
            .collect();
        if !originals.is_empty() {
            compatible = originals;
        }
    }

    compatible.sort_by(|a, b| {
        let pa = codec_priority(&extract_codec(&a.mime_type), profile.audio_codecs);
        let pb = codec_priority(&extract_codec(&b.mime_type), profile.audio_codecs);
        match pa.cmp(&pb) {
            Ordering::Equal => b
                .bitrate
                .partial_cmp(&a.bitrate)
                .unwrap_or(Ordering::Equal),
            other => other,
        }
    });

    compatible.first().map(|stream| (*stream).clone())
}

/// Whether the selected tracks would need re-encoding to land in the target
/// container; purely diagnostic, surfaced in the submit response.
pub fn needs_reencode(
    video: &TrackDescriptor,
    audio: Option<&TrackDescriptor>,
    target_format: &str,
) -> bool {
    let video_codec = extract_codec(&video.mime_type);
    let audio_codec = audio.map(|stream| extract_codec(&stream.mime_type));

    match target_format {
        "mp4" => {
            let video_ok = ["avc1", "hvc1", "hev1"].contains(&video_codec.as_str());
            let audio_ok = audio_codec
                .as_deref()
                .map_or(true, |codec| codec.starts_with("mp4a"));
            !(video_ok && audio_ok)
        }
        "webm" => {
            let video_ok = ["vp8", "vp9", "vp09", "av01"].contains(&video_codec.as_str());
            let audio_ok = audio_codec
                .as_deref()
                .map_or(true, |codec| codec == "opus" || codec == "vorbis");
            !(video_ok && audio_ok)
        }
        // mkv swallows nearly anything.
        _ => false,
    }
}
