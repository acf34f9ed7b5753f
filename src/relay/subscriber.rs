//! Subscriber (viewer) records
//!
//! A subscriber is one egress consumer of a channel: a long-lived HTTP
//! response draining its mailbox. Removal is signaled through `done`;
//! after `done` fires nothing is admitted to the mailbox.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::mailbox::Mailbox;

/// A viewer attached to a channel.
pub struct Subscriber {
    id: u32,
    mailbox: Mailbox,
    done: CancellationToken,
    /// Last rate-limited delivery/drop log for this subscriber.
    last_log: Mutex<Option<Instant>>,
}

impl Subscriber {
    pub(crate) fn new(id: u32, mailbox_capacity: usize) -> Self {
        Self {
            id,
            mailbox: Mailbox::new(mailbox_capacity),
            done: CancellationToken::new(),
            last_log: Mutex::new(None),
        }
    }

    /// Channel-local subscriber id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The frame mailbox for this subscriber.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Cancellation signal observed by the egress handler.
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Deposit a frame unless the subscriber is already gone.
    ///
    /// Returns `false` when the frame was dropped (mailbox full) or the
    /// subscriber was cancelled.
    pub fn offer(&self, frame: Bytes) -> bool {
        if self.done.is_cancelled() {
            return false;
        }
        self.mailbox.try_push(frame)
    }

    pub(crate) fn close(&self) {
        self.done.cancel();
    }

    /// Rate limiter for per-subscriber delivery logging.
    ///
    /// Returns `true` at most once per `interval`.
    pub(crate) fn should_log(&self, interval: Duration) -> bool {
        let mut last = self.last_log.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("queued", &self.mailbox.len())
            .field("done", &self.done.is_cancelled())
            .finish()
    }
}
