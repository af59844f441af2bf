//! Realtime Module
//!
//! Backend change channels, the listener that resyncs the feed on them and
//! per-post detection updates.

mod channel;
mod detections;
mod listener;

pub use channel::{ChangeEvent, ChangeKind, Channel, ChannelMessage, ChannelStatus, Subscription};
pub use detections::DetectionUpdates;
pub use listener::{ListenerHandle, RealtimeListener};
