//! Session lifecycle: start both schedulers, stop them and drain on shutdown.
//!
//! ```text
//!  Idle ──start──▶ Capturing ──stop──▶ Draining ──drained / passes exhausted──▶ Idle
//! ```

use crate::acquisition::{FfmpegSource, FrameSource};
use crate::config::{ConfigValidationError, DrainConfig, PipelineConfig};
use crate::events::{EventBus, PipelineEvent};
use crate::pipeline::UploadPipeline;
use crate::queue::FrameQueue;
use crate::reconciler::RecoveryReconciler;
use crate::scheduler::{CaptureScheduler, UploadScheduler};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::store::{CaptureStore, StoreError};
use crate::uploader::{FrameSink, HttpUploader};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Capturing,
    Draining,
}

/// Errors returned by lifecycle transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Cannot {operation}: pipeline is {actual:?}, expected {expected:?}")]
    InvalidState {
        operation: &'static str,
        expected: LifecycleState,
        actual: LifecycleState,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Capture store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to build upload client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome of the shutdown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Frames re-enqueued from the capture store during the drain
    pub recovered: usize,
    /// Upload passes run
    pub passes: u32,
    /// Frame files left on disk for the next session
    pub remaining: usize,
    /// Whether the queue and the store were both emptied
    pub completed: bool,
}

struct Session {
    store: CaptureStore,
    queue: Arc<FrameQueue>,
    pipeline: Arc<UploadPipeline>,
    reconciler: RecoveryReconciler,
    drain: DrainConfig,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the capture session and its state machine.
pub struct LifecycleController {
    state: Mutex<LifecycleState>,
    session: tokio::sync::Mutex<Option<Session>>,
    stats: Arc<PipelineStats>,
    events: EventBus,
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Idle),
            session: tokio::sync::Mutex::new(None),
            stats: Arc::new(PipelineStats::new()),
            events: EventBus::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: LifecycleState,
    ) -> Result<(), LifecycleError> {
        let actual = self.state();
        if actual != expected {
            return Err(LifecycleError::InvalidState {
                operation,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Start a capture session using the ffmpeg source and HTTP uploader.
    pub async fn start(&self, config: PipelineConfig) -> Result<(), LifecycleError> {
        self.expect_state("start", LifecycleState::Idle)?;
        config.validate()?;

        let store = CaptureStore::new(&config.capture.store_path);
        let source = Arc::new(FfmpegSource::new(config.capture.clone(), store));
        let sink = Arc::new(HttpUploader::new(&config.upload)?);

        self.start_with(config, source, sink).await
    }

    /// Start a capture session with the given collaborators.
    pub async fn start_with(
        &self,
        config: PipelineConfig,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), LifecycleError> {
        let mut slot = self.session.lock().await;
        self.expect_state("start", LifecycleState::Idle)?;
        config.validate()?;

        let store = CaptureStore::new(&config.capture.store_path);
        store.ensure().await?;

        let queue = Arc::new(FrameQueue::new());
        let pipeline = Arc::new(UploadPipeline::new(
            queue.clone(),
            store.clone(),
            sink,
            self.stats.clone(),
            self.events.clone(),
        ));
        let reconciler = RecoveryReconciler::new(store.clone(), queue.clone(), self.stats.clone());

        if config.drain.recover_on_start {
            let recovered = reconciler.reconcile().await?;
            info!(recovered, "Startup reconciliation complete");
        }

        let cancel = CancellationToken::new();
        let capture = CaptureScheduler::new(
            source,
            config.capture.source_url.clone(),
            queue.clone(),
            self.stats.clone(),
            self.events.clone(),
            config.capture.interval(),
        );
        let upload = UploadScheduler::new(pipeline.clone(), config.upload.interval());
        let tasks = vec![
            tokio::spawn(capture.run(cancel.clone())),
            tokio::spawn(upload.run(cancel.clone())),
        ];

        *self.state.lock() = LifecycleState::Capturing;
        info!(
            store = %store.root().display(),
            capture_interval_ms = config.capture.interval_ms,
            upload_interval_ms = config.upload.interval_ms,
            "Capture session started"
        );

        *slot = Some(Session {
            store,
            queue,
            pipeline,
            reconciler,
            drain: config.drain,
            cancel,
            tasks,
        });

        Ok(())
    }

    /// Stop scheduling and drain every pending frame.
    ///
    /// Blocks until the queue and the store are empty or the configured number
    /// of drain passes is exhausted; frames still on disk are picked up by the
    /// next session.
    pub async fn stop(&self) -> Result<DrainReport, LifecycleError> {
        let mut slot = self.session.lock().await;
        self.expect_state("stop", LifecycleState::Capturing)?;
        let mut session = slot.take().ok_or(LifecycleError::InvalidState {
            operation: "stop",
            expected: LifecycleState::Capturing,
            actual: LifecycleState::Idle,
        })?;

        *self.state.lock() = LifecycleState::Draining;
        info!(queued = session.queue.len(), "Stopping capture session");

        session.cancel.cancel();
        for task in session.tasks.iter_mut() {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }

        let report = drain(&session).await;

        *self.state.lock() = LifecycleState::Idle;
        self.events.publish(PipelineEvent::PipelineStopped);

        if report.completed {
            info!(passes = report.passes, recovered = report.recovered, "Drain complete");
        } else {
            warn!(
                passes = report.passes,
                remaining = report.remaining,
                "Drain abandoned, frames left for next session"
            );
        }

        Ok(report)
    }
}

async fn reconcile_logged(session: &Session) -> usize {
    match session.reconciler.reconcile().await {
        Ok(recovered) => recovered,
        Err(e) => {
            warn!(error = %e, "Reconciliation failed");
            0
        }
    }
}

async fn pending_files(store: &CaptureStore) -> Option<usize> {
    match store.list_frames().await {
        Ok(frames) => Some(frames.len()),
        Err(e) => {
            warn!(error = %e, "Could not list capture store");
            None
        }
    }
}

async fn drain(session: &Session) -> DrainReport {
    let mut recovered = reconcile_logged(session).await;

    let mut backoff = ExponentialBackoff {
        initial_interval: session.drain.retry_base_delay(),
        max_interval: session.drain.retry_max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    };
    backoff.reset();

    let mut passes = 0u32;
    let completed = loop {
        if session.queue.is_empty() {
            if pending_files(&session.store).await == Some(0) {
                break true;
            }
            // files on disk the queue does not know about
            recovered += reconcile_logged(session).await;
        }

        if passes >= session.drain.max_passes {
            break false;
        }

        if passes > 0 {
            if let Some(delay) = backoff.next_backoff() {
                tokio::time::sleep(delay).await;
            }
        }

        passes += 1;
        match session.pipeline.run_pass().await {
            Ok(report) => info!(
                pass = passes,
                uploaded = report.uploaded,
                requeued = report.requeued,
                "Drain pass complete"
            ),
            Err(e) => warn!(pass = passes, error = %e, "Drain pass failed"),
        }
    };

    DrainReport {
        recovered,
        passes,
        remaining: pending_files(&session.store).await.unwrap_or(0),
        completed,
    }
}
