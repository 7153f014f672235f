//! Periodic capture and upload tasks.
//!
//! Each scheduler runs its ticks sequentially: a tick body always completes
//! before the next tick is awaited, and ticks missed while a body was busy are
//! skipped. Cancellation is only observed while waiting for a tick.

use crate::acquisition::FrameSource;
use crate::events::{EventBus, PipelineEvent};
use crate::pipeline::UploadPipeline;
use crate::queue::FrameQueue;
use crate::stats::PipelineStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Ticker whose first tick fires one full period after start.
fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// What a single capture tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTick {
    Captured,
    Failed,
    Skipped,
}

/// Captures one frame per period and appends it to the queue.
pub struct CaptureScheduler {
    source: Arc<dyn FrameSource>,
    source_url: String,
    queue: Arc<FrameQueue>,
    stats: Arc<PipelineStats>,
    events: EventBus,
    period: Duration,
    in_flight: AtomicBool,
}

impl CaptureScheduler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        source_url: String,
        queue: Arc<FrameQueue>,
        stats: Arc<PipelineStats>,
        events: EventBus,
        period: Duration,
    ) -> Self {
        Self {
            source,
            source_url,
            queue,
            stats,
            events,
            period,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one acquisition. Skipped if another acquisition is in flight.
    pub async fn tick(&self) -> CaptureTick {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Acquisition still in flight, skipping tick");
            return CaptureTick::Skipped;
        }

        let outcome = match self.source.capture(&self.source_url).await {
            Ok(record) => {
                info!(frame_id = %record.id, path = %record.storage_path.display(), "Frame captured");
                self.stats.record_capture();
                self.events.publish(PipelineEvent::FrameCaptured {
                    id: record.id.clone(),
                    path: record.storage_path.clone(),
                });
                self.queue.enqueue(record);
                CaptureTick::Captured
            }
            Err(e) => {
                warn!(error = %e, "Frame capture failed");
                self.stats.record_capture_error();
                self.events.publish(PipelineEvent::CaptureError {
                    message: e.to_string(),
                });
                CaptureTick::Failed
            }
        };

        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_ms = self.period.as_millis() as u64, "Capture scheduler started");
        self.events.publish(PipelineEvent::CaptureStarted);

        let mut ticker = ticker(self.period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!("Capture scheduler stopped");
    }
}

/// Runs an upload pass once per period while frames are queued.
pub struct UploadScheduler {
    pipeline: Arc<UploadPipeline>,
    period: Duration,
}

impl UploadScheduler {
    pub fn new(pipeline: Arc<UploadPipeline>, period: Duration) -> Self {
        Self { pipeline, period }
    }

    pub async fn tick(&self) {
        if self.pipeline.queue().is_empty() {
            debug!("No frames queued, skipping upload tick");
            return;
        }

        if let Err(e) = self.pipeline.run_pass().await {
            error!(error = %e, "Upload pass failed");
        }
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_ms = self.period.as_millis() as u64, "Upload scheduler started");

        let mut ticker = ticker(self.period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!("Upload scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionError, MockFrameSource};
    use crate::frame::FrameRecord;
    use bytes::Bytes;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;

    fn counting_source() -> MockFrameSource {
        let counter = Arc::new(AtomicU32::new(0));
        let mut source = MockFrameSource::new();
        source.expect_capture().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(FrameRecord::new(
                Utc::now(),
                PathBuf::from(format!("/store/frame_{n}.jpg")),
                Some(Bytes::from_static(b"jpeg")),
            ))
        });
        source
    }

    fn scheduler(source: MockFrameSource, queue: Arc<FrameQueue>, events: EventBus) -> CaptureScheduler {
        CaptureScheduler::new(
            Arc::new(source),
            "rtsp://camera/stream".to_string(),
            queue,
            Arc::new(PipelineStats::new()),
            events,
            Duration::from_secs(30),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_captures_in_ninety_seconds() {
        let queue = Arc::new(FrameQueue::new());
        let scheduler = scheduler(counting_source(), queue.clone(), EventBus::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(queue.len(), 0);

        time::sleep(Duration::from_secs(66)).await;
        assert_eq!(queue.len(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_does_not_stop_scheduler() {
        let queue = Arc::new(FrameQueue::new());
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let calls = Arc::new(AtomicU32::new(0));

        let mut source = MockFrameSource::new();
        let counter = calls.clone();
        source.expect_capture().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AcquisitionError::NonZeroExit {
                    status: "exit status: 1".to_string(),
                    diagnostics: "Connection refused".to_string(),
                })
            } else {
                Ok(FrameRecord::new(Utc::now(), PathBuf::from("/store/frame_1.jpg"), None))
            }
        });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler(source, queue.clone(), events).run(cancel.clone()));

        time::sleep(Duration::from_secs(65)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(rx.recv().await.unwrap(), PipelineEvent::CaptureStarted);
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::CaptureError { message } if message.contains("Connection refused")
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::FrameCaptured { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick_captures_nothing() {
        let mut source = MockFrameSource::new();
        source.expect_capture().never();
        let queue = Arc::new(FrameQueue::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler(source, queue.clone(), EventBus::default()).run(cancel.clone()));

        time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = scheduler(counting_source(), Arc::new(FrameQueue::new()), EventBus::default());
        scheduler.in_flight.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.tick().await, CaptureTick::Skipped);

        scheduler.in_flight.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.tick().await, CaptureTick::Captured);
    }
}
