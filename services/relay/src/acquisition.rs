//! Single-frame acquisition through an external capture tool.
//!
//! Each capture spawns the tool once for a single still, waits for it to exit
//! and reads the produced file from the capture store.

use crate::config::CaptureConfig;
use crate::frame::FrameRecord;
use crate::store::{CaptureStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors that can occur while acquiring a frame.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Capture tool not found: {0}")]
    ToolMissing(String),

    #[error("Failed to run capture tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("Capture tool exited with {status}: {diagnostics}")]
    NonZeroExit { status: String, diagnostics: String },

    #[error("Captured frame {path} is unreadable: {source}")]
    OutputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture tool produced an empty frame at {0}")]
    EmptyOutput(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces one still frame per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Capture one frame from `source_url` into the capture store.
    async fn capture(&self, source_url: &str) -> Result<FrameRecord, AcquisitionError>;
}

/// [`FrameSource`] backed by an `ffmpeg` one-shot invocation.
pub struct FfmpegSource {
    config: CaptureConfig,
    store: CaptureStore,
}

impl FfmpegSource {
    pub fn new(config: CaptureConfig, store: CaptureStore) -> Self {
        Self { config, store }
    }

    /// Arguments for a single-frame still capture written to `output`.
    fn build_args(&self, source_url: &str, output: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-loglevel".to_string(), "error".to_string()];

        if source_url.starts_with("rtsp://") || source_url.starts_with("rtsps://") {
            args.push("-rtsp_transport".to_string());
            args.push(self.config.transport.clone());
        }

        args.extend([
            "-i".to_string(),
            source_url.to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            self.config.jpeg_quality.to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.config.width, self.config.height),
            "-f".to_string(),
            "image2".to_string(),
            "-pix_fmt".to_string(),
            "yuvj420p".to_string(),
            output.to_string_lossy().into_owned(),
        ]);

        args
    }

    async fn discard_partial(&self, path: &Path) {
        if let Err(e) = self.store.remove_frame(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove partial frame");
        }
    }

    async fn run_tool(&self, source_url: &str, output: &Path) -> Result<(), AcquisitionError> {
        let child = Command::new(&self.config.ffmpeg_path)
            .args(self.build_args(source_url, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => AcquisitionError::ToolMissing(self.config.ffmpeg_path.clone()),
                _ => AcquisitionError::Spawn(e),
            })?;

        // Dropping the child on timeout kills it.
        let result = tokio::time::timeout(self.config.timeout(), child.wait_with_output())
            .await
            .map_err(|_| AcquisitionError::Timeout(self.config.timeout()))?
            .map_err(AcquisitionError::Spawn)?;

        if !result.status.success() {
            return Err(AcquisitionError::NonZeroExit {
                status: result.status.to_string(),
                diagnostics: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl FrameSource for FfmpegSource {
    async fn capture(&self, source_url: &str) -> Result<FrameRecord, AcquisitionError> {
        let (captured_at, output) = self.store.allocate_frame_path(Utc::now()).await?;

        debug!(path = %output.display(), "Capturing frame");

        if let Err(e) = self.run_tool(source_url, &output).await {
            self.discard_partial(&output).await;
            return Err(e);
        }

        let data = match tokio::fs::read(&output).await {
            Ok(data) => data,
            Err(source) => {
                self.discard_partial(&output).await;
                return Err(AcquisitionError::OutputUnreadable {
                    path: output,
                    source,
                });
            }
        };

        if data.is_empty() {
            self.discard_partial(&output).await;
            return Err(AcquisitionError::EmptyOutput(output));
        }

        Ok(FrameRecord::new(captured_at, output, Some(Bytes::from(data))))
    }
}
