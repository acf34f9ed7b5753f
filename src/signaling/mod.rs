//! WebRTC ingress signaling
//!
//! Admits publishers into channels. A publisher is accepted only when the
//! channel exists and has at least one viewer; the resulting session
//! forwards its media packets to the local datagram sinks the transcoder
//! reads from.

pub mod forward;
pub mod sdp;
pub mod session;

pub use forward::{RtpSink, SinkSet, TrackKind};
pub use sdp::SdpMessage;
pub use session::accept_offer;
