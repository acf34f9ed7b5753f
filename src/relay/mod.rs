//! Connection manager and relay core
//!
//! Channels bind one publisher ("stream") to many viewers ("subscribers").
//! The transcoder pipeline produces image frames; fan-out deposits each
//! frame into bounded per-subscriber mailboxes, dropping on overflow so
//! the producer never blocks on a slow consumer.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<ConnectionManager>
//!                 ┌────────────────────────────┐
//!                 │ channels: HashMap<code,    │
//!                 │   Arc<Channel> {           │
//!                 │     subscribers, streams,  │
//!                 │     active_stream_id,      │
//!                 │     pipeline guard,        │
//!                 │   }                        │
//!                 │ >                          │
//!                 └─────────────┬──────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   [Transcoder]          [Subscriber]           [Subscriber]
//!   frame callback        mailbox.recv()         mailbox.recv()
//!        │                      │                      │
//!        └─► broadcast_to_active_stream() ─► offer() ─► HTTP multipart
//! ```
//!
//! Lock order is manager → channel → stream, never reversed; the organic
//! GC check runs in a deferred task for that reason. Frames are
//! `bytes::Bytes`, so fanning out to N mailboxes is N reference bumps,
//! not N copies.

pub mod channel;
pub mod error;
pub mod mailbox;
pub mod manager;
pub mod stream;
pub mod subscriber;

pub use channel::Channel;
pub use error::RelayError;
pub use mailbox::Mailbox;
pub use manager::{ConnectionManager, DEFAULT_MAILBOX_CAPACITY};
pub use stream::StreamRecord;
pub use subscriber::Subscriber;
