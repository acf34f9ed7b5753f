//! Bounded per-subscriber frame queue
//!
//! Each subscriber owns one mailbox. The broadcaster deposits frames with a
//! non-blocking push that drops on overflow, so a slow consumer can never
//! stall the producer. The placeholder dispatcher additionally needs to
//! discard a subscriber's backlog, which is why this is a shared queue
//! rather than an `mpsc` pair: the receiving half of an `mpsc` channel
//! cannot be drained by anyone but its single owner.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::Notify;

/// Bounded drop-on-full queue of image frames.
///
/// Admitted frames are delivered in FIFO order. `try_push` never blocks;
/// `recv` suspends until a frame is available.
#[derive(Debug)]
pub struct Mailbox {
    capacity: usize,
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
        }
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Whether the mailbox is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    /// Deposit a frame without blocking.
    ///
    /// Returns `false` when the mailbox is full and the frame was dropped.
    pub fn try_push(&self, frame: Bytes) -> bool {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next frame in admission order.
    pub async fn recv(&self) -> Bytes {
        loop {
            if let Some(frame) = self.queue.lock().unwrap().pop_front() {
                return frame;
            }
            // notify_one stores a permit when no waiter is registered, so a
            // push racing with this await is never lost.
            self.notify.notified().await;
        }
    }

    /// Discard every queued frame, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut queue = self.queue.lock().unwrap();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}
