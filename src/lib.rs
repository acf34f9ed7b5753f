//! # mjpeg-relay
//!
//! A real-time media relay: broadcasters push live audio/video into a
//! logical *channel* over WebRTC, and any number of viewers attached to
//! the same channel receive a continuously updated MJPEG preview inside a
//! long-lived `multipart/x-mixed-replace` HTTP response.
//!
//! The ingress side speaks a NAT-traversing real-time protocol; the
//! egress side is plain HTTP that works through any firewall. In between
//! sits the relay core:
//!
//! - [`relay`] — channels, publisher streams, and subscribers with
//!   bounded drop-on-full mailboxes; one ingress feed fans out to many
//!   viewers without ever blocking the producer.
//! - [`pipeline`] — the external transcoder turning forwarded RTP into a
//!   frame-delimited image stream, supervised and cancellable.
//! - [`signaling`] — publisher admission: offer/answer exchange, track
//!   forwarding, keyframe requests, teardown on terminal session states.
//! - [`server`] — the HTTP surface: `/register`, `/watch`, `/stream`,
//!   and the static UI pages.
//!
//! The relay is ephemeral by design: all state lives in memory and is
//! lost on restart.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod placeholder;
pub mod relay;
pub mod server;
pub mod signaling;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use relay::{Channel, ConnectionManager, Mailbox, RelayError, StreamRecord, Subscriber};
pub use signaling::SdpMessage;
