//! Shared fixtures for the relay integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use frame_relay::config::{
    CaptureConfig, DrainConfig, LoggingConfig, MetricsConfig, PipelineConfig, UploadConfig,
};
use frame_relay::{AcquisitionError, CaptureStore, FrameRecord, FrameSource};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

/// Temporary capture store root, removed on drop.
pub struct ScratchDir {
    pub path: PathBuf,
}

impl ScratchDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("frame-relay-it-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn store(&self) -> CaptureStore {
        CaptureStore::new(&self.path)
    }

    /// Write a frame file under a fixed capture-time name.
    pub fn write_orphan(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// An upload accepted by [`IngestServer`].
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub file_name: Option<String>,
    pub image: Vec<u8>,
    pub timestamp: String,
    pub store_id: String,
}

#[derive(Clone)]
struct ServerState {
    status: Arc<AtomicU16>,
    accepted: Arc<Mutex<Vec<Upload>>>,
    attempts: Arc<AtomicUsize>,
}

/// In-process ingestion endpoint answering with a switchable status.
pub struct IngestServer {
    pub endpoint: String,
    state: ServerState,
}

impl IngestServer {
    pub async fn start(status: StatusCode) -> Self {
        let state = ServerState {
            status: Arc::new(AtomicU16::new(status.as_u16())),
            accepted: Arc::default(),
            attempts: Arc::default(),
        };

        let router = Router::new()
            .route("/api/v1/analytics/upload-images/", post(handle_upload))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            endpoint: format!("http://{addr}/api/v1/analytics/upload-images/"),
            state,
        }
    }

    pub fn set_status(&self, status: StatusCode) {
        self.state.status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn accepted(&self) -> Vec<Upload> {
        self.state.accepted.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

async fn handle_upload(State(state): State<ServerState>, mut multipart: Multipart) -> (StatusCode, &'static str) {
    state.attempts.fetch_add(1, Ordering::SeqCst);

    let mut upload = Upload::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name().unwrap_or_default() {
            "image" => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.image = field.bytes().await.unwrap().to_vec();
            }
            "timestamp" => upload.timestamp = field.text().await.unwrap(),
            "store_id" => upload.store_id = field.text().await.unwrap(),
            _ => {}
        }
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    if status.is_success() {
        state.accepted.lock().push(upload);
        (status, "")
    } else {
        (status, "rejected")
    }
}

/// Frame source that writes a small fake JPEG into the store on every call.
pub struct FakeCamera {
    store: CaptureStore,
    captures: AtomicUsize,
}

impl FakeCamera {
    pub fn new(store: CaptureStore) -> Self {
        Self {
            store,
            captures: AtomicUsize::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for FakeCamera {
    async fn capture(&self, _source_url: &str) -> Result<FrameRecord, AcquisitionError> {
        let (captured_at, path) = self.store.allocate_frame_path(Utc::now()).await?;
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let mut data = vec![0xff, 0xd8];
        data.extend_from_slice(format!("frame-{n}").as_bytes());
        let payload = Bytes::from(data);

        tokio::fs::write(&path, &payload)
            .await
            .map_err(|source| AcquisitionError::OutputUnreadable {
                path: path.clone(),
                source,
            })?;

        Ok(FrameRecord::new(captured_at, path, Some(payload)))
    }
}

/// Session configuration with fast timers against `endpoint`.
pub fn relay_config(store_path: &Path, endpoint: &str) -> PipelineConfig {
    PipelineConfig {
        capture: CaptureConfig {
            source_url: "rtsp://camera.test:554/stream".to_string(),
            store_path: store_path.to_path_buf(),
            interval_ms: 3_600_000,
            ffmpeg_path: "ffmpeg".to_string(),
            width: 1280,
            height: 720,
            jpeg_quality: 1,
            transport: "tcp".to_string(),
            timeout_ms: 20_000,
        },
        upload: UploadConfig {
            endpoint: endpoint.to_string(),
            api_key: "integration-key".to_string(),
            store_id: "111".to_string(),
            interval_ms: 3_600_000,
            request_timeout_ms: 2_000,
            connect_timeout_ms: 1_000,
        },
        drain: DrainConfig {
            max_passes: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 20,
            recover_on_start: true,
        },
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
    }
}
