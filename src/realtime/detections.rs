//! Detection Updates
//!
//! Watches one post's detection row so a screen can show the result as soon
//! as the detector finishes. Only updates arrive here; the row is created
//! pending by the detection worker.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::models::Detection;
use crate::realtime::listener::resubscribe_after;
use crate::realtime::{Channel, ChannelMessage, ChannelStatus, Subscription};

// == Detection Updates ==
pub struct DetectionUpdates {
    backend: Arc<dyn Backend>,
    subscription: Subscription,
    resubscribe_delay: Duration,
}

impl DetectionUpdates {
    /// Subscribes to the detection channel of `post_id`.
    pub async fn subscribe(
        backend: Arc<dyn Backend>,
        post_id: i64,
        resubscribe_delay: Duration,
    ) -> Result<Self> {
        let subscription = backend.subscribe(&Channel::PostDetections { post_id }).await?;
        Ok(Self {
            backend,
            subscription,
            resubscribe_delay,
        })
    }

    pub fn post_id(&self) -> Option<i64> {
        match self.subscription.channel() {
            Channel::PostDetections { post_id } => Some(*post_id),
            _ => None,
        }
    }

    /// Waits for the next updated detection.
    ///
    /// Returns `None` once the channel closed or its resubscribe attempt failed.
    pub async fn next(&mut self) -> Option<Detection> {
        loop {
            match self.subscription.next().await? {
                ChannelMessage::Change(event) => {
                    match serde_json::from_value::<Detection>(event.record) {
                        Ok(detection) => return Some(detection),
                        Err(err) => warn!("Skipping malformed detection record: {}", err),
                    }
                }
                ChannelMessage::Status(ChannelStatus::Subscribed) => {
                    debug!("Channel {} subscribed", self.subscription.channel().name());
                }
                ChannelMessage::Status(ChannelStatus::ChannelError(reason)) => {
                    error!(
                        "Channel error for {}: {}",
                        self.subscription.channel().name(),
                        reason
                    );
                    let resubscribed = resubscribe_after(
                        self.backend.as_ref(),
                        &mut self.subscription,
                        self.resubscribe_delay,
                    )
                    .await;
                    if !resubscribed {
                        return None;
                    }
                }
                ChannelMessage::Status(ChannelStatus::Closed) => {
                    info!("Channel {} closed", self.subscription.channel().name());
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
