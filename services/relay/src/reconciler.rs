//! Re-derives queue state from the frames left on disk.
//!
//! The capture store is the durable log and the queue a cache over it:
//! reconciliation enqueues every frame file the queue does not track, such as
//! frames whose enqueue was interrupted or frames orphaned by a crash.

use crate::frame::{recovered_timestamp, FrameRecord};
use crate::queue::FrameQueue;
use crate::stats::PipelineStats;
use crate::store::{CaptureStore, StoreError};
use bytes::Bytes;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RecoveryReconciler {
    store: CaptureStore,
    queue: Arc<FrameQueue>,
    stats: Arc<PipelineStats>,
}

impl RecoveryReconciler {
    pub fn new(store: CaptureStore, queue: Arc<FrameQueue>, stats: Arc<PipelineStats>) -> Self {
        Self {
            store,
            queue,
            stats,
        }
    }

    /// Enqueue untracked frame files, oldest first. Returns how many were added.
    pub async fn reconcile(&self) -> Result<usize, StoreError> {
        let mut recovered = Vec::new();

        for path in self.store.list_frames().await? {
            if self.queue.is_tracked(&path) {
                continue;
            }

            match tokio::fs::read(&path).await {
                Ok(data) => {
                    let captured_at = recovered_timestamp(&path);
                    recovered.push(FrameRecord::new(captured_at, path, Some(Bytes::from(data))));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Frame vanished during reconciliation");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable frame file");
                }
            }
        }

        let added = self.queue.enqueue_untracked(recovered);
        if added > 0 {
            info!(recovered = added, store = %self.store.root().display(), "Recovered frames from capture store");
            self.stats.record_recovered(added);
        }

        Ok(added)
    }
}
