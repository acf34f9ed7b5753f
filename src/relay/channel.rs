//! Channel state and lifecycle
//!
//! A channel is the rendezvous point between one publisher and its viewers,
//! keyed by a short code. It owns the subscriber registry, the stream
//! records, the active-stream designation, and the transcoder pipeline
//! guard. A channel that loses its last subscriber and stream removes
//! itself from the manager ("organic" garbage collection).

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::placeholder;

use super::error::RelayError;
use super::manager::ConnectionManager;
use super::stream::StreamRecord;
use super::subscriber::Subscriber;

/// Cadence of the stopped-stream placeholder dispatcher.
const PLACEHOLDER_INTERVAL: Duration = Duration::from_millis(500);

/// Per-subscriber delivery/drop logs are sampled to once per this interval.
const DELIVERY_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct ChannelInner {
    subscribers: HashMap<u32, Arc<Subscriber>>,
    streams: HashMap<u32, Arc<StreamRecord>>,
    /// The stream whose frames currently reach subscribers. Always a key
    /// of `streams` when set.
    active_stream_id: Option<u32>,
    /// Running transcoder pipeline: generation counter + cancellation
    /// handle. Present iff the pipeline is active; the generation lets a
    /// finished pipeline clear only its own entry.
    pipeline: Option<(u64, CancellationToken)>,
    next_subscriber_id: u32,
    next_stream_id: u32,
    next_pipeline_generation: u64,
}

/// One streaming channel: subscribers, streams, and pipeline state.
pub struct Channel {
    code: String,
    mailbox_capacity: usize,
    manager: Weak<ConnectionManager>,
    inner: Mutex<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        code: String,
        mailbox_capacity: usize,
        manager: Weak<ConnectionManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            code,
            mailbox_capacity,
            manager,
            inner: Mutex::new(ChannelInner::default()),
        })
    }

    /// The channel's rendezvous code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Register a viewer. `given_id == 0` allocates a fresh id from the
    /// channel's monotonic counter; an explicit id that is already taken
    /// fails with `SubscriberExists`.
    pub async fn add_subscriber(&self, given_id: u32) -> Result<Arc<Subscriber>, RelayError> {
        let mut inner = self.inner.lock().await;
        let id = if given_id == 0 {
            inner.next_subscriber_id += 1;
            inner.next_subscriber_id
        } else {
            if inner.subscribers.contains_key(&given_id) {
                return Err(RelayError::SubscriberExists {
                    channel: self.code.clone(),
                    id: given_id,
                });
            }
            inner.next_subscriber_id = inner.next_subscriber_id.max(given_id);
            given_id
        };

        let subscriber = Arc::new(Subscriber::new(id, self.mailbox_capacity));
        inner.subscribers.insert(id, Arc::clone(&subscriber));
        tracing::info!(channel = %self.code, client = id, "viewer connected");
        Ok(subscriber)
    }

    /// Signal a viewer's `done` and drop it from the registry.
    pub async fn remove_subscriber(self: &Arc<Self>, id: u32) -> Result<(), RelayError> {
        {
            let mut inner = self.inner.lock().await;
            let subscriber =
                inner
                    .subscribers
                    .remove(&id)
                    .ok_or_else(|| RelayError::SubscriberNotFound {
                        channel: self.code.clone(),
                        id,
                    })?;
            subscriber.close();
        }
        tracing::info!(channel = %self.code, client = id, "viewer disconnected");
        self.schedule_gc();
        Ok(())
    }

    /// Look up a viewer by id.
    pub async fn get_subscriber(&self, id: u32) -> Option<Arc<Subscriber>> {
        self.inner.lock().await.subscribers.get(&id).cloned()
    }

    /// Snapshot of the current viewers.
    pub async fn list_subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.inner.lock().await.subscribers.values().cloned().collect()
    }

    /// Register a publisher stream seeded with the "waiting" placeholder.
    /// `given_id == 0` allocates a fresh id. The first stream becomes the
    /// active one.
    pub async fn attach_stream(&self, given_id: u32) -> Result<Arc<StreamRecord>, RelayError> {
        let mut inner = self.inner.lock().await;
        let id = if given_id == 0 {
            inner.next_stream_id += 1;
            inner.next_stream_id
        } else {
            if inner.streams.contains_key(&given_id) {
                return Err(RelayError::StreamExists {
                    channel: self.code.clone(),
                    id: given_id,
                });
            }
            inner.next_stream_id = inner.next_stream_id.max(given_id);
            given_id
        };

        let stream = Arc::new(StreamRecord::new(id, placeholder::waiting_frame()));
        inner.streams.insert(id, Arc::clone(&stream));
        if inner.active_stream_id.is_none() {
            inner.active_stream_id = Some(id);
        }
        tracing::info!(channel = %self.code, stream_id = id, "stream attached");
        Ok(stream)
    }

    /// Cancel the pipeline, close the stream's media session, and drop the
    /// record. If the removed stream was active, the remaining stream with
    /// the lowest id takes over.
    pub async fn remove_stream(self: &Arc<Self>, id: u32) -> Result<(), RelayError> {
        self.cancel_pipeline().await;

        let stream = {
            let mut inner = self.inner.lock().await;
            let stream = inner
                .streams
                .remove(&id)
                .ok_or_else(|| RelayError::StreamNotFound {
                    channel: self.code.clone(),
                    id,
                })?;
            if inner.active_stream_id == Some(id) {
                inner.active_stream_id = inner.streams.keys().min().copied();
            }
            stream
        };

        stream.detach_media().await;
        tracing::info!(channel = %self.code, stream_id = id, "stream removed");
        self.schedule_gc();
        Ok(())
    }

    /// Look up a stream by id.
    pub async fn get_stream(&self, id: u32) -> Option<Arc<StreamRecord>> {
        self.inner.lock().await.streams.get(&id).cloned()
    }

    /// Ids of the registered streams.
    pub async fn list_stream_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.inner.lock().await.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The stream currently designated to reach subscribers.
    pub async fn active_stream_id(&self) -> Option<u32> {
        self.inner.lock().await.active_stream_id
    }

    /// Mark a stream running and offer its current frame to every mailbox.
    pub async fn start_stream(&self, id: u32) -> Result<(), RelayError> {
        let (stream, subscribers) = {
            let inner = self.inner.lock().await;
            let stream =
                inner
                    .streams
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| RelayError::StreamNotFound {
                        channel: self.code.clone(),
                        id,
                    })?;
            let subscribers: Vec<Arc<Subscriber>> =
                inner.subscribers.values().cloned().collect();
            (stream, subscribers)
        };

        stream.start().await?;

        let frame = stream.last_frame().await;
        for subscriber in subscribers {
            subscriber.offer(frame.clone());
        }
        Ok(())
    }

    /// Stop a stream: flip it off, hand the snapshotted viewers over to the
    /// stopped-placeholder dispatcher, then drop the record.
    pub async fn stop_stream(self: &Arc<Self>, id: u32) -> Result<(), RelayError> {
        let stream = self
            .get_stream(id)
            .await
            .ok_or_else(|| RelayError::StreamNotFound {
                channel: self.code.clone(),
                id,
            })?;

        stream.stop().await?;

        let subscribers = self.list_subscribers().await;
        self.spawn_placeholder_loop(subscribers, placeholder::stopped_frame());

        if let Err(e) = self.remove_stream(id).await {
            tracing::warn!(channel = %self.code, stream_id = id, error = %e, "stream removal after stop failed");
        }
        Ok(())
    }

    /// Claim the pipeline slot. Returns the generation and cancellation
    /// handle for the new pipeline, or `None` when one is already active.
    pub(crate) async fn begin_pipeline(&self) -> Option<(u64, CancellationToken)> {
        let mut inner = self.inner.lock().await;
        if inner.pipeline.is_some() {
            return None;
        }
        inner.next_pipeline_generation += 1;
        let generation = inner.next_pipeline_generation;
        let token = CancellationToken::new();
        inner.pipeline = Some((generation, token.clone()));
        Some((generation, token))
    }

    /// Release the pipeline slot. Only the matching generation clears it,
    /// so a stale pipeline exit cannot release a successor's slot.
    pub(crate) async fn pipeline_finished(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.pipeline, Some((current, _)) if current == generation) {
            inner.pipeline = None;
            tracing::debug!(channel = %self.code, generation, "transcoder pipeline finished");
        }
    }

    /// Request pipeline termination. The slot stays claimed until the
    /// pipeline task observes the cancellation and reports back through
    /// [`Channel::pipeline_finished`].
    pub async fn cancel_pipeline(&self) {
        let inner = self.inner.lock().await;
        if let Some((generation, token)) = inner.pipeline.as_ref() {
            token.cancel();
            tracing::debug!(channel = %self.code, generation, "transcoder pipeline cancelled");
        }
    }

    /// Whether a transcoder pipeline is currently bound to this channel.
    pub async fn is_pipeline_active(&self) -> bool {
        self.inner.lock().await.pipeline.is_some()
    }

    /// Update the stream's last frame and offer it to every mailbox,
    /// dropping for viewers whose mailbox is full.
    pub async fn dispatch_to_stream(&self, stream_id: u32, frame: Bytes) -> Result<(), RelayError> {
        let inner = self.inner.lock().await;
        let stream =
            inner
                .streams
                .get(&stream_id)
                .ok_or_else(|| RelayError::StreamNotFound {
                    channel: self.code.clone(),
                    id: stream_id,
                })?;
        stream.set_last_frame(frame.clone()).await;
        for subscriber in inner.subscribers.values() {
            deliver(&self.code, subscriber, frame.clone());
        }
        Ok(())
    }

    /// Offer a frame to every mailbox regardless of stream bookkeeping.
    pub async fn dispatch_to_all(&self, frame: Bytes) {
        let inner = self.inner.lock().await;
        for subscriber in inner.subscribers.values() {
            deliver(&self.code, subscriber, frame.clone());
        }
    }

    /// Whether the channel holds no subscribers and no streams.
    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.subscribers.is_empty() && inner.streams.is_empty()
    }

    pub(crate) async fn close_all_subscribers(&self) {
        let inner = self.inner.lock().await;
        for subscriber in inner.subscribers.values() {
            subscriber.close();
        }
    }

    /// Queue an organic-GC check. Deferred to a task so the manager lock is
    /// never taken while a channel lock is held.
    fn schedule_gc(self: &Arc<Self>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.remove_if_empty().await;
        });
    }

    async fn remove_if_empty(self: Arc<Self>) {
        if !self.is_empty().await {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_channel_if_same(&self.code, &self).await;
        }
    }

    async fn active_stream_running(&self) -> bool {
        let stream = {
            let inner = self.inner.lock().await;
            inner
                .active_stream_id
                .and_then(|id| inner.streams.get(&id).cloned())
        };
        match stream {
            Some(stream) => stream.is_running().await,
            None => false,
        }
    }

    /// Periodically replace queued frames with the stopped placeholder for
    /// the given viewers, until a stream runs again or the channel is gone.
    fn spawn_placeholder_loop(self: &Arc<Self>, subscribers: Vec<Arc<Subscriber>>, frame: Bytes) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PLACEHOLDER_INTERVAL).await;

                if channel.active_stream_running().await {
                    return;
                }
                let Some(manager) = channel.manager.upgrade() else {
                    return;
                };
                if !manager.is_registered(&channel.code, &channel).await {
                    return;
                }

                for subscriber in &subscribers {
                    if subscriber.done().is_cancelled() {
                        continue;
                    }
                    subscriber.mailbox().drain();
                    subscriber.offer(frame.clone());
                }
            }
        });
    }
}

fn deliver(code: &str, subscriber: &Subscriber, frame: Bytes) {
    if subscriber.offer(frame) {
        if subscriber.should_log(DELIVERY_LOG_INTERVAL) {
            tracing::trace!(channel = %code, client = subscriber.id(), "frame delivered");
        }
    } else if subscriber.should_log(DELIVERY_LOG_INTERVAL) {
        tracing::debug!(channel = %code, client = subscriber.id(), "mailbox full, frame dropped");
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("code", &self.code).finish()
    }
}
