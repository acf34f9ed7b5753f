//! RTP forwarding into the transcoder feed
//!
//! Incoming media packets are re-marshaled with a fixed payload type and
//! pushed into a connected datagram socket per track kind; the transcoder
//! reads the other end through its session description. Refused sends are
//! tolerated while the transcoder is not yet listening.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Marshal;

use crate::config::RelayConfig;
use crate::error::Result;

/// The two media kinds carried by a publisher session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Map the engine's codec type onto a track kind.
    pub fn from_codec(codec: RTPCodecType) -> Option<Self> {
        match codec {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A connected datagram sink for one track kind.
#[derive(Debug)]
pub struct RtpSink {
    socket: UdpSocket,
    payload_type: u8,
    kind: TrackKind,
}

impl RtpSink {
    async fn connect(config: &RelayConfig, kind: TrackKind) -> Result<Self> {
        let (port, payload_type) = match kind {
            TrackKind::Audio => (config.audio_port, config.audio_payload_type),
            TrackKind::Video => (config.video_port, config.video_payload_type),
        };
        let socket = UdpSocket::bind((config.udp_bind_ip, 0)).await?;
        socket.connect((config.udp_bind_ip, port)).await?;
        Ok(Self {
            socket,
            payload_type,
            kind,
        })
    }
}

/// The datagram sinks of one publisher session plus their shutdown signal.
#[derive(Debug)]
pub struct SinkSet {
    audio: Arc<RtpSink>,
    video: Arc<RtpSink>,
    cancel: CancellationToken,
}

impl SinkSet {
    /// Open both sinks on the configured bind IP.
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        Ok(Self {
            audio: Arc::new(RtpSink::connect(config, TrackKind::Audio).await?),
            video: Arc::new(RtpSink::connect(config, TrackKind::Video).await?),
            cancel: CancellationToken::new(),
        })
    }

    /// The sink matching a track kind.
    pub fn for_kind(&self, kind: TrackKind) -> Arc<RtpSink> {
        match kind {
            TrackKind::Audio => Arc::clone(&self.audio),
            TrackKind::Video => Arc::clone(&self.video),
        }
    }

    /// Token cancelled when the session reaches a terminal state.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every forwarding task bound to this set.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Pump one remote track into its sink until the track ends or the set is
/// shut down.
pub async fn forward_track(track: Arc<TrackRemote>, sink: Arc<RtpSink>, cancel: CancellationToken) {
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(kind = sink.kind.as_str(), "track forwarding stopped");
                return;
            }
            read = track.read(&mut buf) => {
                let (mut packet, _) = match read {
                    Ok(read) => read,
                    Err(e) => {
                        tracing::debug!(kind = sink.kind.as_str(), error = %e, "track ended");
                        return;
                    }
                };

                packet.header.payload_type = sink.payload_type;
                let n = match packet.marshal_to(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(kind = sink.kind.as_str(), error = %e, "RTP marshal failed");
                        return;
                    }
                };

                match sink.socket.send(&buf[..n]).await {
                    Ok(_) => {}
                    // The transcoder may not be listening yet.
                    Err(e) if e.kind() == ErrorKind::ConnectionRefused => continue,
                    Err(e) => {
                        tracing::debug!(kind = sink.kind.as_str(), error = %e, "datagram send failed");
                        return;
                    }
                }
            }
        }
    }
}
