//! Pipeline counters.
//!
//! Every counter is kept in-process for the final report and mirrored to the
//! `metrics` facade for an optional Prometheus exporter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the schedulers.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_captured: AtomicU64,
    capture_errors: AtomicU64,
    frames_uploaded: AtomicU64,
    frames_requeued: AtomicU64,
    frames_dead_lettered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_recovered: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub frames_uploaded: u64,
    pub frames_requeued: u64,
    pub frames_dead_lettered: u64,
    pub frames_dropped: u64,
    pub frames_recovered: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_capture(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay.frames.captured").increment(1);
    }

    pub fn record_capture_error(&self) {
        self.capture_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay.capture.errors").increment(1);
    }

    /// Count a delivered frame and return the running total.
    pub fn record_upload(&self) -> u64 {
        metrics::counter!("relay.frames.uploaded").increment(1);
        self.frames_uploaded.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_requeued(&self, count: usize) {
        self.frames_requeued.fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("relay.frames.requeued").increment(count as u64);
    }

    pub fn record_dead_letter(&self) {
        self.frames_dead_lettered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay.frames.dead_lettered").increment(1);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("relay.frames.dropped").increment(1);
    }

    pub fn record_recovered(&self, count: usize) {
        self.frames_recovered.fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!("relay.frames.recovered").increment(count as u64);
    }

    pub fn uploaded(&self) -> u64 {
        self.frames_uploaded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            frames_uploaded: self.frames_uploaded.load(Ordering::Relaxed),
            frames_requeued: self.frames_requeued.load(Ordering::Relaxed),
            frames_dead_lettered: self.frames_dead_lettered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_recovered: self.frames_recovered.load(Ordering::Relaxed),
        }
    }
}
