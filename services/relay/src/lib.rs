//! Frame Relay
//!
//! Periodic still-frame capture and reliable upload for live camera feeds.
//! A capture task grabs one JPEG from the stream per period, persists it to a
//! local capture store, and queues it; an upload task periodically drains the
//! queue to a remote ingestion endpoint. Frames leave the store only once they
//! are delivered or rejected for good, so nothing is lost across restarts.
//!
//! ## Features
//!
//! - **Durable Capture Store**: every frame is a file on disk until the
//!   endpoint accepts it
//! - **Failure Classification**: transient failures are retried on the next
//!   pass, permanent rejections are dead-lettered once
//! - **Crash Recovery**: orphaned frame files are re-enqueued on startup and
//!   during shutdown
//! - **Graceful Drain**: stopping the pipeline flushes everything that was
//!   captured, within a bounded number of passes
//!
//! ## Architecture
//!
//! ```text
//! Camera Stream              Capture Store              Ingestion Endpoint
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ RTSP / HTTP  │           │ frame_*.jpg  │          │ multipart    │
//! │ feed         │           │ dead_letter  │          │ POST         │
//! └──────────────┘           └──────────────┘          └──────────────┘
//!        │                       ▲      │                     ▲
//!        ▼                       │      │                     │
//! ┌──────────────┐               │      ▼                     │
//! │ Capture      │───────────────┘ ┌──────────────┐          │
//! │ Scheduler    │                 │ Recovery     │          │
//! └──────────────┘                 │ Reconciler   │          │
//!        │                         └──────────────┘          │
//!        ▼                                │                  │
//! ┌──────────────┐                        │                  │
//! │ Frame        │◀───────────────────────┘                  │
//! │ Queue        │                                           │
//! └──────────────┘                                           │
//!        │                                                   │
//!        ▼                                                   │
//! ┌──────────────┐           ┌──────────────┐               │
//! │ Upload       │──────────▶│ HTTP         │───────────────┘
//! │ Pipeline     │           │ Uploader     │
//! └──────────────┘           └──────────────┘
//! ```
//!
//! The [`LifecycleController`] owns one capture session at a time and runs the
//! shutdown drain.

pub mod acquisition;
pub mod classifier;
pub mod config;
pub mod events;
pub mod frame;
pub mod lifecycle;
pub mod pipeline;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod uploader;

pub use acquisition::{AcquisitionError, FfmpegSource, FrameSource};
pub use classifier::{classify, RetryDecision, UploadAttemptResult, UploadFailure};
pub use config::{ConfigValidationError, PipelineConfig};
pub use events::{EventBus, PipelineEvent};
pub use frame::FrameRecord;
pub use lifecycle::{DrainReport, LifecycleController, LifecycleError, LifecycleState};
pub use pipeline::{PassReport, UploadPipeline};
pub use queue::FrameQueue;
pub use reconciler::RecoveryReconciler;
pub use scheduler::{CaptureScheduler, CaptureTick, UploadScheduler};
pub use stats::{PipelineStats, StatsSnapshot};
pub use store::{CaptureStore, DeadLetterEntry, StoreError};
pub use uploader::{FrameSink, HttpUploader};
