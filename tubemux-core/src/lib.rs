pub mod config;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod naming;
pub mod progress;
pub mod reaper;
pub mod runner;
pub mod selector;
pub mod signer;
pub mod store;
pub mod streamer;
pub mod validate;

pub use config::{load_config, TubemuxConfig, PUBLIC_BASE_URL_ENV};
pub use downloader::{DownloadError, DownloadResult, Downloader};
pub use error::{ConfigError, Result};
pub use extract::{ExtractError, ExtractResponse, ExtractResult, Extractor, TrackDescriptor};
pub use progress::{estimate_progress, ProgressDetail};
pub use reaper::{cleanup_temp_files, Reaper};
pub use runner::{JobError, JobResult, JobRunner, SubmitOutcome};
pub use selector::{
    device_profile, needs_reencode, select_audio, select_video, DeviceProfile, VideoSelection,
};
pub use signer::{SignerError, TokenQuery, UrlSigner};
pub use store::{
    new_job_id, FileEntry, JobFiles, JobStatus, JobStore, Meta, OutputKind, StoreError,
    StoreResult, TrimSpec,
};
pub use streamer::{StreamError, StreamJob, StreamResult, Streamer};
pub use validate::{
    extract_source_id, valid_filename, valid_job_id, validate_request, AudioOptions,
    DownloadRequest, OutputOptions, TrimOptions, ValidationError,
};
