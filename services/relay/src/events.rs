//! Notifications published to external observers (UI shells, log relays).
//!
//! Observers only receive events; they have no handle on pipeline internals.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    CaptureStarted,
    CaptureError { message: String },
    FrameCaptured { id: String, path: PathBuf },
    UploadStats { uploaded: u64 },
    PipelineStopped,
}

/// Fan-out channel for [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
