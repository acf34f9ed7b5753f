//! Process-wide channel registry
//!
//! The connection manager owns every channel and is the entry point for
//! channel lifecycle and broadcast fan-out. It is constructed explicitly
//! and shared as an `Arc`; channels hold a `Weak` back-edge for organic
//! removal.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use super::channel::Channel;
use super::error::RelayError;
use super::subscriber::Subscriber;

/// Default per-subscriber mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 5;

/// Registry of all active channels.
///
/// The manager lock guards only the channel map and is never held across a
/// channel-lock acquisition.
pub struct ConnectionManager {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
    mailbox_capacity: usize,
}

impl ConnectionManager {
    /// Create a manager with the default mailbox capacity.
    pub fn new() -> Arc<Self> {
        Self::with_mailbox_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a manager whose subscribers buffer at most `capacity` frames.
    pub fn with_mailbox_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            mailbox_capacity: capacity,
        })
    }

    /// Create a channel for `code` if absent. Idempotent; returns the
    /// channel either way.
    pub async fn create_channel(self: &Arc<Self>, code: &str) -> Arc<Channel> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(code) {
            return Arc::clone(channel);
        }
        let channel = Channel::new(
            code.to_string(),
            self.mailbox_capacity,
            Arc::downgrade(self),
        );
        channels.insert(code.to_string(), Arc::clone(&channel));
        tracing::info!(channel = %code, "channel created");
        channel
    }

    /// Look up a channel by code.
    pub async fn validate_channel(&self, code: &str) -> Option<Arc<Channel>> {
        self.channels.lock().await.get(code).cloned()
    }

    /// Signal every subscriber's `done` and drop the channel. Media
    /// sessions are owned by the streams and are closed by their own
    /// removal.
    pub async fn remove_channel(&self, code: &str) {
        let channel = self.validate_channel(code).await;
        if let Some(channel) = channel {
            channel.close_all_subscribers().await;
            self.channels.lock().await.remove(code);
            tracing::info!(channel = %code, "channel removed");
        }
    }

    /// Remove `code` only while it still maps to this exact channel, so an
    /// organic-GC task can never reap a recreated channel.
    pub(crate) async fn remove_channel_if_same(&self, code: &str, channel: &Arc<Channel>) {
        let mut channels = self.channels.lock().await;
        if channels
            .get(code)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(code);
            tracing::info!(channel = %code, "channel removed organically");
        }
    }

    /// Whether `code` still maps to this exact channel.
    pub(crate) async fn is_registered(&self, code: &str, channel: &Arc<Channel>) -> bool {
        self.channels
            .lock()
            .await
            .get(code)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
    }

    /// Register a viewer on a channel. See [`Channel::add_subscriber`].
    pub async fn add_subscriber(
        &self,
        code: &str,
        given_id: u32,
    ) -> Result<Arc<Subscriber>, RelayError> {
        let channel = self
            .validate_channel(code)
            .await
            .ok_or_else(|| RelayError::ChannelNotFound(code.to_string()))?;
        channel.add_subscriber(given_id).await
    }

    /// Remove a viewer from a channel.
    pub async fn remove_subscriber(&self, code: &str, id: u32) -> Result<(), RelayError> {
        let channel = self
            .validate_channel(code)
            .await
            .ok_or_else(|| RelayError::ChannelNotFound(code.to_string()))?;
        channel.remove_subscriber(id).await
    }

    /// Snapshot the viewers of a channel.
    pub async fn list_subscribers(&self, code: &str) -> Vec<Arc<Subscriber>> {
        match self.validate_channel(code).await {
            Some(channel) => channel.list_subscribers().await,
            None => Vec::new(),
        }
    }

    /// Record `frame` on the stream and offer it to every viewer of the
    /// channel, dropping per-viewer when a mailbox is full. The canonical
    /// broadcast path: the transcoder targets the channel's active stream.
    pub async fn broadcast_to_active_stream(&self, code: &str, stream_id: u32, frame: Bytes) {
        let Some(channel) = self.validate_channel(code).await else {
            tracing::trace!(channel = %code, "broadcast to unknown channel");
            return;
        };
        if let Err(e) = channel.dispatch_to_stream(stream_id, frame).await {
            tracing::debug!(channel = %code, stream_id, error = %e, "broadcast skipped");
        }
    }

    /// Offer `frame` to every viewer of the channel without touching stream
    /// bookkeeping. Fallback for channel-wide dispatch.
    pub async fn broadcast_to_all_subscribers(&self, code: &str, frame: Bytes) {
        if let Some(channel) = self.validate_channel(code).await {
            channel.dispatch_to_all(frame).await;
        }
    }

    /// Codes of all registered channels.
    pub async fn list_all_channels(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.channels.lock().await.keys().cloned().collect();
        codes.sort_unstable();
        codes
    }

    /// Number of registered channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Let deferred GC tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_create_channel_idempotent() {
        let manager = ConnectionManager::new();

        let first = manager.create_channel("ABC123").await;
        let second = manager.create_channel("ABC123").await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscriber_ids_are_monotonic() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;

        let first = channel.add_subscriber(0).await.unwrap();
        let second = channel.add_subscriber(0).await.unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);

        // Removal must not make an id reusable.
        channel.remove_subscriber(1).await.unwrap();
        let third = channel.add_subscriber(0).await.unwrap();
        assert_eq!(third.id(), 3);
    }

    #[tokio::test]
    async fn test_explicit_subscriber_id() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;

        let explicit = channel.add_subscriber(7).await.unwrap();
        assert_eq!(explicit.id(), 7);

        let duplicate = channel.add_subscriber(7).await;
        assert!(matches!(
            duplicate,
            Err(RelayError::SubscriberExists { id: 7, .. })
        ));

        // Fresh allocations skip past explicit ids.
        let next = channel.add_subscriber(0).await.unwrap();
        assert_eq!(next.id(), 8);
    }

    #[tokio::test]
    async fn test_remove_missing_subscriber() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;

        let result = channel.remove_subscriber(42).await;
        assert!(matches!(
            result,
            Err(RelayError::SubscriberNotFound { id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_channel_signals_done() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let subscriber = channel.add_subscriber(0).await.unwrap();

        manager.remove_channel("ABC123").await;

        assert!(subscriber.done().is_cancelled());
        assert!(manager.validate_channel("ABC123").await.is_none());
    }

    #[tokio::test]
    async fn test_organic_gc_after_last_subscriber() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        channel.add_subscriber(0).await.unwrap();

        manager.remove_subscriber("ABC123", 1).await.unwrap();
        settle().await;

        assert!(manager.list_all_channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_gc_while_stream_remains() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        channel.add_subscriber(0).await.unwrap();
        channel.attach_stream(0).await.unwrap();

        channel.remove_subscriber(1).await.unwrap();
        settle().await;

        assert_eq!(manager.list_all_channels().await, vec!["ABC123".to_string()]);
    }

    #[tokio::test]
    async fn test_active_stream_designation() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        channel.add_subscriber(0).await.unwrap();

        let first = channel.attach_stream(0).await.unwrap();
        let second = channel.attach_stream(0).await.unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(channel.active_stream_id().await, Some(1));

        // Removing the active stream promotes the lowest remaining id.
        channel.remove_stream(1).await.unwrap();
        assert_eq!(channel.active_stream_id().await, Some(2));

        channel.remove_stream(2).await.unwrap();
        assert_eq!(channel.active_stream_id().await, None);
    }

    #[tokio::test]
    async fn test_active_stream_is_always_a_registered_stream() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        channel.add_subscriber(0).await.unwrap();

        for _ in 0..3 {
            channel.attach_stream(0).await.unwrap();
        }
        channel.remove_stream(2).await.unwrap();

        let active = channel.active_stream_id().await.unwrap();
        assert!(channel.list_stream_ids().await.contains(&active));
    }

    #[tokio::test]
    async fn test_start_stop_invalid_state() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let stream = channel.attach_stream(0).await.unwrap();

        channel.start_stream(stream.id()).await.unwrap();
        let result = channel.start_stream(stream.id()).await;
        assert_eq!(result, Err(RelayError::StreamAlreadyRunning(1)));

        let result = channel.start_stream(99).await;
        assert!(matches!(result, Err(RelayError::StreamNotFound { .. })));
    }

    #[tokio::test]
    async fn test_broadcast_sets_last_frame_and_delivers() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let subscriber = channel.add_subscriber(0).await.unwrap();
        let stream = channel.attach_stream(0).await.unwrap();

        let frame = Bytes::from_static(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        manager
            .broadcast_to_active_stream("ABC123", stream.id(), frame.clone())
            .await;

        assert_eq!(stream.last_frame().await, frame);
        assert_eq!(subscriber.mailbox().recv().await, frame);
    }

    #[tokio::test]
    async fn test_broadcast_drops_on_full_mailbox() {
        let manager = ConnectionManager::with_mailbox_capacity(2);
        let channel = manager.create_channel("ABC123").await;
        let subscriber = channel.add_subscriber(0).await.unwrap();
        let stream = channel.attach_stream(0).await.unwrap();

        for i in 0..5u8 {
            manager
                .broadcast_to_active_stream("ABC123", stream.id(), Bytes::from(vec![i]))
                .await;
        }

        // Admitted frames are the oldest two; the rest were dropped.
        assert_eq!(subscriber.mailbox().len(), 2);
        assert_eq!(subscriber.mailbox().recv().await, Bytes::from(vec![0u8]));
        assert_eq!(subscriber.mailbox().recv().await, Bytes::from(vec![1u8]));
    }

    #[tokio::test]
    async fn test_broadcast_to_all_subscribers() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let a = channel.add_subscriber(0).await.unwrap();
        let b = channel.add_subscriber(0).await.unwrap();

        let frame = Bytes::from_static(b"frame");
        manager
            .broadcast_to_all_subscribers("ABC123", frame.clone())
            .await;

        assert_eq!(a.mailbox().recv().await, frame);
        assert_eq!(b.mailbox().recv().await, frame);
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_stream_is_skipped() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let subscriber = channel.add_subscriber(0).await.unwrap();

        manager
            .broadcast_to_active_stream("ABC123", 9, Bytes::from_static(b"frame"))
            .await;

        assert!(subscriber.mailbox().is_empty());
    }

    #[tokio::test]
    async fn test_stop_stream_dispatches_stopped_placeholder() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;
        let subscriber = channel.add_subscriber(0).await.unwrap();
        let stream = channel.attach_stream(0).await.unwrap();

        channel.start_stream(stream.id()).await.unwrap();
        channel.stop_stream(stream.id()).await.unwrap();

        // The record is dropped and the dispatcher replaces any backlog
        // with the stopped frame on its next tick.
        assert!(channel.get_stream(stream.id()).await.is_none());
        tokio::time::sleep(Duration::from_millis(700)).await;

        let frame = subscriber.mailbox().recv().await;
        assert_eq!(frame, crate::placeholder::stopped_frame());
    }

    #[tokio::test]
    async fn test_pipeline_guard() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;

        let (generation, token) = channel.begin_pipeline().await.unwrap();
        assert!(channel.is_pipeline_active().await);
        assert!(channel.begin_pipeline().await.is_none());

        channel.cancel_pipeline().await;
        assert!(token.is_cancelled());
        // The slot stays claimed until the pipeline reports back.
        assert!(channel.is_pipeline_active().await);

        channel.pipeline_finished(generation).await;
        assert!(!channel.is_pipeline_active().await);
        assert!(channel.begin_pipeline().await.is_some());
    }

    #[tokio::test]
    async fn test_stale_pipeline_generation_does_not_clear_successor() {
        let manager = ConnectionManager::new();
        let channel = manager.create_channel("ABC123").await;

        let (old_generation, _) = channel.begin_pipeline().await.unwrap();
        channel.pipeline_finished(old_generation).await;

        let (current, _) = channel.begin_pipeline().await.unwrap();
        channel.pipeline_finished(old_generation).await;
        assert!(channel.is_pipeline_active().await);

        channel.pipeline_finished(current).await;
        assert!(!channel.is_pipeline_active().await);
    }

    #[tokio::test]
    async fn test_gc_does_not_reap_recreated_channel() {
        let manager = ConnectionManager::new();
        let original = manager.create_channel("ABC123").await;
        original.add_subscriber(0).await.unwrap();

        // Emptying the channel schedules a deferred GC task; recreate the
        // code before it gets to run.
        original.remove_subscriber(1).await.unwrap();
        manager.remove_channel("ABC123").await;
        let replacement = manager.create_channel("ABC123").await;
        replacement.add_subscriber(0).await.unwrap();
        settle().await;

        let current = manager.validate_channel("ABC123").await.unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }
}
