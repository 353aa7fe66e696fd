use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Environment variable that overrides `server.public_base_url`.
pub const PUBLIC_BASE_URL_ENV: &str = "TUBEMUX_PUBLIC_BASE_URL";

#[derive(Debug, Clone, Deserialize)]
pub struct TubemuxConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub download: DownloadSection,
    pub extract: ExtractSection,
    pub stream: StreamSection,
    pub signing: SigningSection,
}

impl TubemuxConfig {
    /// Base URL embedded in signed links, with the environment override applied.
    pub fn public_base_url(&self) -> String {
        std::env::var(PUBLIC_BASE_URL_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.server.public_base_url.clone())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.root)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub port: u16,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub root: String,
    pub max_job_age_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub cleanup_batch_size: usize,
}

impl StorageSection {
    pub fn max_job_age(&self) -> Duration {
        Duration::from_secs(self.max_job_age_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    pub workers: u32,
    pub chunk_size_bytes: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub chunk_timeout_seconds: u64,
}

impl DownloadSection {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractSection {
    pub api_base: String,
    pub timeout_seconds: u64,
}

impl ExtractSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    /// Bytes per second for the stream copy loop; 0 disables shaping.
    pub rate_limit_bytes_per_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningSection {
    pub secret: String,
    pub url_ttl_seconds: u64,
}

impl SigningSection {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_seconds)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TubemuxConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let config = load_config(dir.join("tubemux.toml")).expect("config should parse");
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.download.workers, 4);
        assert_eq!(config.download.chunk_size_bytes, 10_000_000);
        assert_eq!(config.storage.cleanup_batch_size, 5000);
        assert!(!config.signing.secret.is_empty());
    }

    #[test]
    fn env_var_overrides_public_base_url() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let config = load_config(dir.join("tubemux.toml")).unwrap();
        std::env::set_var(PUBLIC_BASE_URL_ENV, "https://dl.example.org/");
        let base = config.public_base_url();
        std::env::remove_var(PUBLIC_BASE_URL_ENV);
        assert_eq!(base, "https://dl.example.org");
    }
}
