use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use sha2::{Digest, Sha256};
use tempfile::tempdir;

use tubemux_core::config::DownloadSection;
use tubemux_core::{DownloadError, Downloader};

#[derive(Clone)]
struct CdnState {
    data: Arc<Vec<u8>>,
    /// Requests seen per range, for retry/no-retry assertions.
    hits: Arc<Mutex<HashMap<String, usize>>>,
    /// Total requests answered with an error before the CDN recovers.
    fail_first: Arc<AtomicUsize>,
    fail_status: StatusCode,
}

async fn serve_range(
    State(state): State<CdnState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Vec<u8>) {
    let range = params.get("range").cloned().unwrap_or_default();
    *state.hits.lock().unwrap().entry(range.clone()).or_insert(0) += 1;

    if state.fail_first.load(Ordering::SeqCst) > 0 {
        state.fail_first.fetch_sub(1, Ordering::SeqCst);
        return (state.fail_status, b"upstream says no".to_vec());
    }

    let Some((start, end)) = range
        .split_once('-')
        .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)))
    else {
        return (StatusCode::BAD_REQUEST, Vec::new());
    };
    if end >= state.data.len() || start > end {
        return (StatusCode::RANGE_NOT_SATISFIABLE, Vec::new());
    }
    (StatusCode::OK, state.data[start..=end].to_vec())
}

async fn spawn_cdn(state: CdnState) -> SocketAddr {
    let app = Router::new().route("/media", get(serve_range)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn cdn_state(data: Vec<u8>, fail_first: usize, fail_status: StatusCode) -> CdnState {
    CdnState {
        data: Arc::new(data),
        hits: Arc::new(Mutex::new(HashMap::new())),
        fail_first: Arc::new(AtomicUsize::new(fail_first)),
        fail_status,
    }
}

fn downloader(chunk_size: u64) -> Downloader {
    Downloader::new(&DownloadSection {
        workers: 4,
        chunk_size_bytes: chunk_size,
        max_retries: 3,
        retry_delay_ms: 1,
        chunk_timeout_seconds: 5,
    })
    .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[tokio::test]
async fn chunked_download_is_byte_exact() {
    let data = payload(10_500);
    let state = cdn_state(data.clone(), 0, StatusCode::OK);
    let addr = spawn_cdn(state.clone()).await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("video.mp4");

    downloader(1000)
        .download(
            &format!("http://{addr}/media?v=1"),
            &dest,
            data.len() as u64,
        )
        .await
        .unwrap();

    let written = std::fs::read(&dest).unwrap();
    assert_eq!(written.len(), data.len());
    assert_eq!(sha256(&written), sha256(&data));

    // 11 chunks, one request each, and no partial state left behind.
    let hits = state.hits.lock().unwrap();
    assert_eq!(hits.len(), 11);
    assert!(hits.values().all(|&count| count == 1));
    assert!(!dir.path().join("video.mp4.chunks").exists());
    assert!(!dir.path().join("video.mp4.tmp").exists());
}

#[tokio::test]
async fn small_payload_uses_a_single_request() {
    let data = payload(600);
    let state = cdn_state(data.clone(), 0, StatusCode::OK);
    let addr = spawn_cdn(state.clone()).await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("audio.webm");

    downloader(1000)
        .download(
            &format!("http://{addr}/media?v=1"),
            &dest,
            data.len() as u64,
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    let hits = state.hits.lock().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits.get("0-599"), Some(&1));
}

#[tokio::test]
async fn forbidden_is_not_retried() {
    let data = payload(3_000);
    let state = cdn_state(data.clone(), usize::MAX / 2, StatusCode::FORBIDDEN);
    let addr = spawn_cdn(state.clone()).await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("video.mp4");

    let err = downloader(1000)
        .download(
            &format!("http://{addr}/media?v=1"),
            &dest,
            data.len() as u64,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("HTTP 403"), "{err}");
    // No range was attempted twice.
    let hits = state.hits.lock().unwrap();
    assert!(hits.values().all(|&count| count == 1), "{hits:?}");
    assert!(!dest.exists());
    assert!(!dir.path().join("video.mp4.chunks").exists());
    assert!(!dir.path().join("video.mp4.tmp").exists());
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let data = payload(2_500);
    let state = cdn_state(data.clone(), 2, StatusCode::INTERNAL_SERVER_ERROR);
    let addr = spawn_cdn(state.clone()).await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("video.mp4");

    downloader(1000)
        .download(
            &format!("http://{addr}/media?v=1"),
            &dest,
            data.len() as u64,
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    // Two failed attempts were absorbed by the retry budget.
    let hits = state.hits.lock().unwrap();
    let total: usize = hits.values().sum();
    assert_eq!(total, 5);
}

#[tokio::test]
async fn exhausted_retries_leave_no_partial_file() {
    let data = payload(2_500);
    let state = cdn_state(data.clone(), usize::MAX / 2, StatusCode::INTERNAL_SERVER_ERROR);
    let addr = spawn_cdn(state.clone()).await;
    let dir = tempdir().unwrap();
    let dest = dir.path().join("video.mp4");

    let err = downloader(1000)
        .download(
            &format!("http://{addr}/media?v=1"),
            &dest,
            data.len() as u64,
        )
        .await
        .unwrap_err();

    match err {
        DownloadError::Chunk { source, .. } => {
            assert!(matches!(*source, DownloadError::Http { status: 500, .. }));
        }
        other => panic!("expected chunk error, got {other:?}"),
    }
    assert!(!dest.exists());
    assert!(!dir.path().join("video.mp4.chunks").exists());
}
