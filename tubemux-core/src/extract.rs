use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("metadata request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("metadata API error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse metadata response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// Catalog returned by the metadata provider for one source id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub video_streams: Vec<TrackDescriptor>,
    #[serde(default)]
    pub audio_streams: Vec<TrackDescriptor>,
}

/// One remote elementary stream. Only `url` and `content_length` matter to
/// the downloader; the rest feeds track selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDescriptor {
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub bitrate: f64,
    #[serde(rename = "fileSize", default)]
    pub content_length: u64,
    #[serde(default)]
    pub audio_track_id: Option<String>,
    #[serde(default)]
    pub is_original: bool,
}

/// HTTP client for the external metadata provider.
#[derive(Debug, Clone)]
pub struct Extractor {
    client: reqwest::Client,
    api_base: String,
}

impl Extractor {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> ExtractResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    pub async fn extract(&self, source_id: &str) -> ExtractResult<ExtractResponse> {
        let url = format!("{}/{}", self.api_base.trim_end_matches('/'), source_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExtractError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_parses_provider_field_names() {
        let raw = r#"{
            "title": "Some clip",
            "duration": 213.5,
            "videoStreams": [
                {"url": "http://cdn/v", "mimeType": "video/mp4; codecs=\"avc1.640028\"",
                 "height": 1080, "bitrate": 2500000, "fileSize": 52428800}
            ],
            "audioStreams": [
                {"url": "http://cdn/a", "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"",
                 "bitrate": 128000, "fileSize": 3145728,
                 "audioTrackId": "en.0", "isOriginal": true}
            ]
        }"#;
        let parsed: ExtractResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.title, "Some clip");
        assert_eq!(parsed.video_streams.len(), 1);
        assert_eq!(parsed.video_streams[0].height, 1080);
        assert_eq!(parsed.video_streams[0].content_length, 52_428_800);
        assert_eq!(parsed.audio_streams[0].audio_track_id.as_deref(), Some("en.0"));
        assert!(parsed.audio_streams[0].is_original);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"title": "t", "duration": 1.0,
                      "videoStreams": [{"url": "http://cdn/v"}], "audioStreams": []}"#;
        let parsed: ExtractResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.video_streams[0].height, 0);
        assert_eq!(parsed.video_streams[0].content_length, 0);
        assert!(!parsed.video_streams[0].is_original);
    }
}
