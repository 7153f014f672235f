//! In-memory FIFO of frames awaiting upload.
//!
//! All operations share one lock, which is never held across an await.
//! Records handed out by [`FrameQueue::drain_snapshot`] stay tracked as in
//! flight until they are requeued or settled, so a reconciliation running
//! alongside an upload pass cannot enqueue a second copy of the same file.

use crate::frame::FrameRecord;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<FrameRecord>,
    in_flight: HashSet<PathBuf>,
}

impl QueueState {
    fn is_tracked(&self, path: &Path) -> bool {
        self.in_flight.contains(path) || self.pending.iter().any(|r| r.storage_path == path)
    }
}

/// Ordered queue of frames, oldest first.
#[derive(Debug, Default)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly captured frame.
    pub fn enqueue(&self, record: FrameRecord) {
        self.state.lock().pending.push_back(record);
    }

    /// Take the full current contents, leaving the queue empty.
    ///
    /// The returned records are tracked as in flight.
    pub fn drain_snapshot(&self) -> Vec<FrameRecord> {
        let mut state = self.state.lock();
        let batch: Vec<FrameRecord> = state.pending.drain(..).collect();
        for record in &batch {
            state.in_flight.insert(record.storage_path.clone());
        }
        batch
    }

    /// Put records back ahead of anything enqueued since they were taken,
    /// preserving their relative order.
    pub fn requeue(&self, records: Vec<FrameRecord>) {
        let mut state = self.state.lock();
        for record in records.into_iter().rev() {
            state.in_flight.remove(&record.storage_path);
            state.pending.push_front(record);
        }
    }

    /// Forget an in-flight record that was delivered, dead-lettered or dropped.
    pub fn settle(&self, path: &Path) {
        self.state.lock().in_flight.remove(path);
    }

    /// Enqueue only the records whose files are not already queued or in flight.
    ///
    /// Returns the number of records added.
    pub fn enqueue_untracked(&self, records: Vec<FrameRecord>) -> usize {
        let mut state = self.state.lock();
        let mut added = 0;
        for record in records {
            if !state.is_tracked(&record.storage_path) {
                state.pending.push_back(record);
                added += 1;
            }
        }
        added
    }

    /// Whether a file is represented by a queued or in-flight record.
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.state.lock().is_tracked(path)
    }

    /// Number of queued (not in-flight) records.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Backing paths of queued records, in queue order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|r| r.storage_path.clone())
            .collect()
    }
}
