use std::sync::Arc;

use thiserror::Error;
use tubemux_core::{
    ConfigError, Downloader, Extractor, JobRunner, JobStore, Streamer, TubemuxConfig, UrlSigner,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared server state; everything inside is cheap to clone and the job
/// directory tree is the only durable store.
pub struct AppState {
    pub config: Arc<TubemuxConfig>,
    pub store: JobStore,
    pub signer: UrlSigner,
    pub runner: JobRunner,
    pub streamer: Streamer,
}

impl AppState {
    pub fn new(config: TubemuxConfig) -> Result<Arc<Self>, ServerError> {
        let config = Arc::new(config);
        let store = JobStore::new(config.storage_root());
        let signer = UrlSigner::new(
            config.signing.secret.as_bytes().to_vec(),
            config.signing.url_ttl(),
            config.public_base_url(),
        );
        let extractor = Extractor::new(&config.extract.api_base, config.extract.timeout())
            .map_err(|err| ServerError::Client(err.to_string()))?;
        let downloader = Downloader::new(&config.download)
            .map_err(|err| ServerError::Client(err.to_string()))?;
        let runner = JobRunner::new(store.clone(), extractor, downloader, signer.clone());
        let streamer = Streamer::new(config.stream.rate_limit_bytes_per_sec);
        Ok(Arc::new(Self {
            config,
            store,
            signer,
            runner,
            streamer,
        }))
    }
}
