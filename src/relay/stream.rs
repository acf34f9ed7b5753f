//! Publisher-side stream records
//!
//! One record per admitted publisher. Holds the most recent image frame
//! (seeded with the "waiting" placeholder), the running flag, and the
//! bound WebRTC session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use webrtc::peer_connection::RTCPeerConnection;

use super::error::RelayError;

struct StreamInner {
    last_frame: Bytes,
    running: bool,
    media: Option<Arc<RTCPeerConnection>>,
}

/// State for a single publisher within a channel.
pub struct StreamRecord {
    id: u32,
    inner: Mutex<StreamInner>,
}

impl StreamRecord {
    pub(crate) fn new(id: u32, initial_frame: Bytes) -> Self {
        Self {
            id,
            inner: Mutex::new(StreamInner {
                last_frame: initial_frame,
                running: false,
                media: None,
            }),
        }
    }

    /// Channel-local stream id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Mark the stream as running.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return Err(RelayError::StreamAlreadyRunning(self.id));
        }
        inner.running = true;
        tracing::info!(stream_id = self.id, "stream started");
        Ok(())
    }

    /// Mark the stream as stopped.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return Err(RelayError::StreamNotRunning(self.id));
        }
        inner.running = false;
        tracing::info!(stream_id = self.id, "stream stopped");
        Ok(())
    }

    /// Whether the publisher is currently delivering media.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// The most recent frame seen on this stream.
    pub async fn last_frame(&self) -> Bytes {
        self.inner.lock().await.last_frame.clone()
    }

    pub(crate) async fn set_last_frame(&self, frame: Bytes) {
        self.inner.lock().await.last_frame = frame;
    }

    /// Bind the media session backing this stream.
    pub async fn attach_media(&self, session: Arc<RTCPeerConnection>) {
        self.inner.lock().await.media = Some(session);
    }

    /// The bound media session, if any.
    pub async fn media(&self) -> Option<Arc<RTCPeerConnection>> {
        self.inner.lock().await.media.clone()
    }

    /// Close and release the media session. Safe to call repeatedly.
    pub async fn detach_media(&self) {
        let session = self.inner.lock().await.media.take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                tracing::debug!(stream_id = self.id, error = %e, "media session close");
            }
        }
    }
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_stop_transitions() {
        let stream = StreamRecord::new(1, Bytes::from_static(b"frame"));
        assert!(!stream.is_running().await);

        stream.start().await.unwrap();
        assert!(stream.is_running().await);

        let result = stream.start().await;
        assert_eq!(result, Err(RelayError::StreamAlreadyRunning(1)));

        stream.stop().await.unwrap();
        assert!(!stream.is_running().await);

        let result = stream.stop().await;
        assert_eq!(result, Err(RelayError::StreamNotRunning(1)));
    }

    #[tokio::test]
    async fn test_last_frame_updates() {
        let stream = StreamRecord::new(1, Bytes::from_static(b"initial"));
        assert_eq!(stream.last_frame().await, Bytes::from_static(b"initial"));

        stream.set_last_frame(Bytes::from_static(b"next")).await;
        assert_eq!(stream.last_frame().await, Bytes::from_static(b"next"));
    }

    #[tokio::test]
    async fn test_detach_without_media_is_noop() {
        let stream = StreamRecord::new(1, Bytes::new());
        stream.detach_media().await;
        stream.detach_media().await;
        assert!(stream.media().await.is_none());
    }
}
