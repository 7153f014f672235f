//! Upload pass: deliver every queued frame, requeue or dead-letter failures.

use crate::classifier::UploadAttemptResult;
use crate::events::{EventBus, PipelineEvent};
use crate::frame::FrameRecord;
use crate::queue::FrameQueue;
use crate::stats::PipelineStats;
use crate::store::{CaptureStore, DeadLetterEntry, StoreError};
use crate::uploader::FrameSink;
use chrono::Utc;
use futures::FutureExt;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Totals for one upload pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub dropped: usize,
}

enum RecordOutcome {
    Uploaded,
    Retry(FrameRecord),
    DeadLettered,
    Dropped,
}

/// Drains the frame queue into a [`FrameSink`].
pub struct UploadPipeline {
    queue: Arc<FrameQueue>,
    store: CaptureStore,
    sink: Arc<dyn FrameSink>,
    stats: Arc<PipelineStats>,
    events: EventBus,
}

impl UploadPipeline {
    pub fn new(
        queue: Arc<FrameQueue>,
        store: CaptureStore,
        sink: Arc<dyn FrameSink>,
        stats: Arc<PipelineStats>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            store,
            sink,
            stats,
            events,
        }
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    /// Process every frame currently queued, one at a time.
    ///
    /// Retryable failures are requeued ahead of frames captured during the
    /// pass. If the store is inaccessible before dispatch starts, the batch
    /// is returned to the queue and the error is reported.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<PassReport, StoreError> {
        let batch = self.queue.drain_snapshot();
        if batch.is_empty() {
            return Ok(PassReport::default());
        }

        if let Err(e) = self.store.ensure().await {
            error!(error = %e, frames = batch.len(), "Capture store unavailable, returning batch to queue");
            self.reinstate(batch).await;
            return Err(e);
        }

        let mut report = PassReport {
            attempted: batch.len(),
            ..Default::default()
        };
        let mut retry = Vec::new();

        for record in batch {
            let fallback = FrameRecord {
                payload: None,
                ..record.clone()
            };

            match AssertUnwindSafe(self.process_record(record)).catch_unwind().await {
                Ok(RecordOutcome::Uploaded) => {
                    report.uploaded += 1;
                    self.queue.settle(&fallback.storage_path);
                }
                Ok(RecordOutcome::Retry(mut record)) => {
                    // re-read from the store on the next attempt
                    record.payload = None;
                    retry.push(record);
                }
                Ok(RecordOutcome::DeadLettered) => {
                    report.dead_lettered += 1;
                    self.queue.settle(&fallback.storage_path);
                }
                Ok(RecordOutcome::Dropped) => {
                    report.dropped += 1;
                    self.queue.settle(&fallback.storage_path);
                }
                Err(_) => {
                    error!(frame_id = %fallback.id, "Frame handling panicked");
                    if self.store.exists(&fallback.storage_path).await.unwrap_or(true) {
                        retry.push(fallback);
                    } else {
                        report.dropped += 1;
                        self.queue.settle(&fallback.storage_path);
                    }
                }
            }
        }

        if !retry.is_empty() {
            report.requeued = retry.len();
            self.stats.record_requeued(retry.len());
            self.queue.requeue(retry);
        }

        info!(
            attempted = report.attempted,
            uploaded = report.uploaded,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            dropped = report.dropped,
            "Upload pass complete"
        );

        Ok(report)
    }

    async fn process_record(&self, record: FrameRecord) -> RecordOutcome {
        match self.store.exists(&record.storage_path).await {
            Ok(true) => {}
            Ok(false) => return self.drop_record(&record),
            Err(e) => {
                warn!(frame_id = %record.id, error = %e, "Could not check frame file, keeping it queued");
                return RecordOutcome::Retry(record);
            }
        }

        let payload = match record.load_payload().await {
            Ok(payload) => payload,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.drop_record(&record),
            Err(e) => {
                let reason = format!("Local error: failed to read frame: {e}");
                return self.dead_letter(&record, reason).await;
            }
        };

        match UploadAttemptResult::from_result(self.sink.submit(&record, payload).await) {
            UploadAttemptResult::Success => {
                if let Err(e) = self.store.remove_frame(&record.storage_path).await {
                    error!(frame_id = %record.id, error = %e, "Uploaded frame could not be deleted");
                }
                let uploaded = self.stats.record_upload();
                self.events.publish(PipelineEvent::UploadStats { uploaded });
                info!(frame_id = %record.id, uploaded, "Frame uploaded");
                RecordOutcome::Uploaded
            }
            UploadAttemptResult::RetryableFailure(reason) => {
                warn!(frame_id = %record.id, reason = %reason, "Upload failed, frame requeued");
                RecordOutcome::Retry(record)
            }
            UploadAttemptResult::TerminalFailure(reason) => self.dead_letter(&record, reason).await,
        }
    }

    fn drop_record(&self, record: &FrameRecord) -> RecordOutcome {
        debug!(frame_id = %record.id, "Frame file no longer exists, dropping record");
        self.stats.record_dropped();
        RecordOutcome::Dropped
    }

    async fn dead_letter(&self, record: &FrameRecord, reason: String) -> RecordOutcome {
        let entry = DeadLetterEntry {
            timestamp: Utc::now(),
            path: record.storage_path.clone(),
            reason,
        };

        error!(
            frame_id = %record.id,
            path = %entry.path.display(),
            reason = %entry.reason,
            "Upload failed permanently, frame dead-lettered"
        );

        if let Err(e) = self.store.append_dead_letter(&entry).await {
            error!(frame_id = %record.id, error = %e, "Failed to write dead-letter entry");
        }
        if let Err(e) = self.store.remove_frame(&record.storage_path).await {
            error!(frame_id = %record.id, error = %e, "Dead-lettered frame could not be deleted");
        }

        self.stats.record_dead_letter();
        RecordOutcome::DeadLettered
    }

    /// Return records that still have a backing file to the queue.
    async fn reinstate(&self, batch: Vec<FrameRecord>) {
        let mut kept = Vec::with_capacity(batch.len());
        for record in batch {
            if self.store.exists(&record.storage_path).await.unwrap_or(true) {
                kept.push(record);
            } else {
                self.queue.settle(&record.storage_path);
            }
        }
        self.queue.requeue(kept);
    }
}
