//! Capture store: the directory of frames that have not been delivered yet.
//!
//! The store is the durable source of truth across restarts. It also holds the
//! append-only dead-letter log of frames that failed terminally.

use crate::frame::{frame_file_name, frame_timestamp, is_frame_file_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Name of the dead-letter log inside the store.
pub const DEAD_LETTER_FILE: &str = "dead_letter.log";

/// Errors raised by capture store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode dead-letter entry: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One terminally failed upload attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub reason: String,
}

/// Directory-backed store of pending frame files.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.root.join(DEAD_LETTER_FILE)
    }

    /// Create the store directory if needed.
    pub async fn ensure(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))
    }

    /// Reserve a file path for a frame captured at `at`.
    ///
    /// Names are advanced by one millisecond until they do not collide with an
    /// existing file, keeping ids unique and ordered.
    pub async fn allocate_frame_path(
        &self,
        at: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, PathBuf), StoreError> {
        let mut at = frame_timestamp(at);
        loop {
            let path = self.root.join(frame_file_name(at));
            if !self.exists(&path).await? {
                return Ok((at, path));
            }
            at += chrono::Duration::milliseconds(1);
        }
    }

    /// Whether a file exists at `path`.
    pub async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    /// List every pending frame file, oldest first.
    pub async fn list_frames(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut frames = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let name = entry.file_name();
            if is_file && name.to_str().map(is_frame_file_name).unwrap_or(false) {
                frames.push(entry.path());
            }
        }

        frames.sort();
        Ok(frames)
    }

    /// Delete a frame file. Returns `false` if it was already gone.
    pub async fn remove_frame(&self, path: &Path) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed frame file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Append one line to the dead-letter log.
    pub async fn append_dead_letter(&self, entry: &DeadLetterEntry) -> Result<(), StoreError> {
        let path = self.dead_letter_path();
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(&line)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))
    }

    /// Read back the dead-letter log. Malformed lines are skipped.
    pub async fn read_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, StoreError> {
        let path = self.dead_letter_path();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
