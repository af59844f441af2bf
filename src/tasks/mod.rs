//! Background Tasks Module
//!
//! # Tasks
//! - TTL sweep: removes expired cache entries at configured intervals
//! - Detection worker: records cat-detection jobs queued by post uploads

mod cleanup;
mod detection;

pub use cleanup::spawn_cleanup_task;
pub use detection::{spawn_detection_worker, DetectionJob, DetectionQueue};
