//! Realtime Listener
//!
//! Turns backend change notifications into full feed resyncs. There is no
//! incremental patching: any event on any channel triggers a reset fetch.
//!
//! A channel that reports an error is resubscribed once after a fixed delay.
//! If that resubscribe call fails the channel stays down and only a log line
//! records it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::feed::FeedSynchronizer;
use crate::realtime::{Channel, ChannelMessage, ChannelStatus, Subscription};

// == Listener ==
pub struct RealtimeListener {
    backend: Arc<dyn Backend>,
    feed: FeedSynchronizer,
    resubscribe_delay: Duration,
}

impl RealtimeListener {
    pub fn new(backend: Arc<dyn Backend>, feed: FeedSynchronizer, resubscribe_delay: Duration) -> Self {
        Self {
            backend,
            feed,
            resubscribe_delay,
        }
    }

    /// Subscribes to every channel and spawns one task per subscription.
    ///
    /// Fails if any initial subscribe call fails; channels already started
    /// are stopped again in that case.
    pub async fn listen(&self, channels: Vec<Channel>) -> Result<ListenerHandle> {
        let mut handle = ListenerHandle { tasks: Vec::new() };

        for channel in channels {
            let subscription = match self.backend.subscribe(&channel).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    error!("Error subscribing to {}: {}", channel.name(), err);
                    handle.unsubscribe();
                    return Err(err);
                }
            };
            info!("Subscribed to realtime channel {}", channel.name());
            handle.tasks.push(tokio::spawn(run_channel(
                self.backend.clone(),
                self.feed.clone(),
                subscription,
                self.resubscribe_delay,
            )));
        }

        Ok(handle)
    }
}

/// Drives one channel until it closes or its resubscribe attempt fails.
async fn run_channel(
    backend: Arc<dyn Backend>,
    feed: FeedSynchronizer,
    mut subscription: Subscription,
    resubscribe_delay: Duration,
) {
    let channel = subscription.channel().clone();
    let name = channel.name();

    loop {
        match subscription.next().await {
            Some(ChannelMessage::Change(event)) => {
                debug!("{} change on {}, resyncing feed", event.table, name);
                if let Err(err) = feed.fetch(true).await {
                    warn!("Resync after {} event failed: {}", name, err);
                }
            }
            Some(ChannelMessage::Status(ChannelStatus::Subscribed)) => {
                debug!("Channel {} subscribed", name);
            }
            Some(ChannelMessage::Status(ChannelStatus::ChannelError(reason))) => {
                error!("Channel error for {}: {}", name, reason);
                if !resubscribe_after(backend.as_ref(), &mut subscription, resubscribe_delay).await {
                    return;
                }
            }
            Some(ChannelMessage::Status(ChannelStatus::Closed)) | None => {
                info!("Channel {} closed", name);
                return;
            }
        }
    }
}

/// Waits `delay`, then makes the single resubscribe attempt for a failed channel.
///
/// Returns false when the attempt failed and the channel stays disconnected.
pub(crate) async fn resubscribe_after(
    backend: &dyn Backend,
    subscription: &mut Subscription,
    delay: Duration,
) -> bool {
    let channel = subscription.channel().clone();
    tokio::time::sleep(delay).await;
    match backend.subscribe(&channel).await {
        Ok(fresh) => {
            info!("Resubscribed to {}", channel.name());
            std::mem::replace(subscription, fresh).unsubscribe();
            true
        }
        Err(err) => {
            warn!(
                "Resubscribe to {} failed, channel stays disconnected: {}",
                channel.name(),
                err
            );
            false
        }
    }
}

// == Handle ==
/// Running channel tasks; dropping the handle leaves them running.
#[derive(Debug)]
pub struct ListenerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops every channel task.
    pub fn unsubscribe(self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn channel_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of channel tasks that have stopped on their own.
    pub fn disconnected(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cache::{FeedScope, FreshnessCache, MemoryStore};
    use crate::feed::{FeedSettings, FetchOutcome};

    const DELAY: Duration = Duration::from_millis(50);

    async fn setup(posts: usize) -> (Arc<InMemoryBackend>, FeedSynchronizer, RealtimeListener) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.seed_posts("u1", posts).await;
        let feed = FeedSynchronizer::new(
            backend.clone(),
            FreshnessCache::new(Arc::new(MemoryStore::new())),
            FeedScope::All,
            FeedSettings {
                page_size: 10,
                cache_ttl: 300,
                signed_url_expires_in: 3600,
            },
        );
        let listener = RealtimeListener::new(backend.clone(), feed.clone(), DELAY);
        (backend, feed, listener)
    }

    async fn wait_for<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_new_post_triggers_reset() {
        let (backend, feed, listener) = setup(3).await;
        feed.fetch(true).await.unwrap();
        let handle = listener.listen(vec![Channel::Posts]).await.unwrap();

        let post_id = backend.insert_post("u2", "https://x/a.jpg", None).await.unwrap().id;

        assert!(
            wait_for(|| {
                let feed = feed.clone();
                async move { feed.snapshot().await.items.iter().any(|p| p.id == post_id) }
            })
            .await
        );
        assert_eq!(feed.snapshot().await.items.len(), 4);
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_message_event_triggers_reset() {
        let (backend, feed, listener) = setup(2).await;
        let handle = listener
            .listen(vec![Channel::Messages { receiver_id: "me".to_string() }])
            .await
            .unwrap();
        assert!(feed.snapshot().await.items.is_empty());

        backend.insert_message("you", "me", "meow").await.unwrap();

        assert!(
            wait_for(|| {
                let feed = feed.clone();
                async move { feed.snapshot().await.items.len() == 2 }
            })
            .await
        );
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_event_during_slow_refresh_wins() {
        let (backend, feed, listener) = setup(3).await;
        let handle = listener.listen(vec![Channel::Posts]).await.unwrap();

        backend.push_fetch_delay(Duration::from_millis(200)).await;
        let manual = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.fetch(true).await })
        };
        assert!(
            wait_for(|| {
                let backend = backend.clone();
                async move { backend.fetch_calls().await == 1 }
            })
            .await
        );

        // The new post lands while the manual refresh is still in flight.
        let post_id = backend.insert_post("u2", "https://x/late.jpg", None).await.unwrap().id;
        assert!(
            wait_for(|| {
                let feed = feed.clone();
                async move { feed.snapshot().await.items.iter().any(|p| p.id == post_id) }
            })
            .await
        );

        assert_eq!(manual.await.unwrap().unwrap(), FetchOutcome::Stale);
        let snapshot = feed.snapshot().await;
        assert_eq!(snapshot.items.len(), 4);
        assert_eq!(snapshot.items[0].id, post_id);
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_channel_error_resubscribes_after_delay() {
        let (backend, feed, listener) = setup(1).await;
        let handle = listener.listen(vec![Channel::Posts]).await.unwrap();
        assert_eq!(backend.subscribe_calls().await, 1);

        backend.emit_channel_error("posts").await;
        tokio::time::sleep(DELAY / 2).await;
        assert_eq!(backend.subscribe_calls().await, 1, "resubscribe must wait for the delay");

        assert!(
            wait_for(|| {
                let backend = backend.clone();
                async move { backend.subscribe_calls().await == 2 }
            })
            .await
        );

        // The fresh subscription still drives resyncs.
        backend.insert_post("u2", "https://x/b.jpg", None).await.unwrap();
        assert!(
            wait_for(|| {
                let feed = feed.clone();
                async move { feed.snapshot().await.items.len() == 2 }
            })
            .await
        );
        assert_eq!(handle.disconnected(), 0);
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_failed_resubscribe_stays_disconnected() {
        let (backend, _feed, listener) = setup(1).await;
        let handle = listener.listen(vec![Channel::Posts]).await.unwrap();

        backend.fail_next_subscribes(1).await;
        backend.emit_channel_error("posts").await;

        let handle_ref = &handle;
        assert!(wait_for(move || async move { handle_ref.disconnected() == 1 }).await);
        assert_eq!(backend.subscribe_calls().await, 2);
    }

    #[tokio::test]
    async fn test_initial_subscribe_failure_is_surfaced() {
        let (backend, _feed, listener) = setup(0).await;
        backend.fail_next_subscribes(1).await;

        assert!(listener.listen(vec![Channel::Posts]).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_resyncs() {
        let (backend, _feed, listener) = setup(1).await;
        let handle = listener.listen(vec![Channel::Posts]).await.unwrap();
        assert_eq!(handle.channel_count(), 1);
        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let calls = backend.fetch_calls().await;
        backend.insert_post("u2", "https://x/c.jpg", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.fetch_calls().await, calls);
    }
}
