//! Detection Queue
//!
//! Uploading a post enqueues a cat-detection job. The caller never waits on
//! it: jobs go through a channel to a worker that records them with the
//! backend, and worker failures are only logged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::Backend;

/// One image waiting for detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionJob {
    pub post_id: i64,
    pub image_url: String,
}

/// Sending side of the detection channel.
#[derive(Debug, Clone)]
pub struct DetectionQueue {
    sender: mpsc::UnboundedSender<DetectionJob>,
}

impl DetectionQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DetectionJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queues a job; a stopped worker only costs a warning.
    pub fn enqueue(&self, job: DetectionJob) {
        debug!("Queueing detection for post {}", job.post_id);
        if let Err(err) = self.sender.send(job) {
            warn!("Detection worker is gone, dropping job for post {}", err.0.post_id);
        }
    }
}

/// Spawns the worker draining `receiver` until every queue handle is dropped.
pub fn spawn_detection_worker(
    backend: Arc<dyn Backend>,
    mut receiver: mpsc::UnboundedReceiver<DetectionJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Detection worker started");
        while let Some(job) = receiver.recv().await {
            match backend.insert_detection(job.post_id, &job.image_url).await {
                Ok(detection) => debug!("Detection {} pending for post {}", detection.id, job.post_id),
                Err(err) => warn!("Error triggering detection for post {}: {}", job.post_id, err),
            }
        }
        info!("Detection worker stopped");
    })
}
