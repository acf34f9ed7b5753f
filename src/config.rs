//! Relay configuration

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::relay::DEFAULT_MAILBOX_CAPACITY;

/// Environment variable selecting the datagram bind IP for the transcoder
/// feed.
pub const UDP_BIND_IP_ENV: &str = "UDP_BIND_IP";

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP port to listen on
    pub http_port: u16,

    /// Bind IP for the local RTP forwarding sockets
    pub udp_bind_ip: IpAddr,

    /// Datagram port the audio feed is forwarded to
    pub audio_port: u16,

    /// Datagram port the video feed is forwarded to
    pub video_port: u16,

    /// RTP payload type stamped onto forwarded audio packets
    pub audio_payload_type: u8,

    /// RTP payload type stamped onto forwarded video packets
    pub video_payload_type: u8,

    /// Frames buffered per subscriber before dropping
    pub mailbox_capacity: usize,

    /// STUN server used for ICE candidate gathering
    pub stun_server: String,

    /// Path of the session description handed to the transcoder
    pub session_file: PathBuf,

    /// Transcoder executable
    pub ffmpeg_path: String,

    /// Transcoder JPEG quality (`-q:v`), lower is better
    pub jpeg_quality: u8,

    /// Forward the transcoder's own log output to tracing
    pub log_transcoder_output: bool,

    /// Egress emits a keep-alive frame after this much mailbox silence
    pub keepalive_timeout: Duration,

    /// Directory served under `/static` and holding the UI pages
    pub static_dir: PathBuf,

    /// Process log file
    pub log_file: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            udp_bind_ip: IpAddr::from([127, 0, 0, 1]),
            audio_port: 4000,
            video_port: 4002,
            audio_payload_type: 111,
            video_payload_type: 96,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            stun_server: "stun:stun.l.google.com:19302".to_string(),
            session_file: PathBuf::from("rtp-forwarder.sdp"),
            ffmpeg_path: "ffmpeg".to_string(),
            jpeg_quality: 8,
            log_transcoder_output: false,
            keepalive_timeout: Duration::from_secs(5),
            static_dir: PathBuf::from("static"),
            log_file: PathBuf::from("relay_server.log"),
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(UDP_BIND_IP_ENV) {
            if !raw.is_empty() {
                match raw.parse() {
                    Ok(ip) => config.udp_bind_ip = ip,
                    Err(_) => {
                        tracing::warn!(value = %raw, "ignoring unparsable {UDP_BIND_IP_ENV}");
                    }
                }
            }
        }
        config
    }

    /// Set the HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Set the datagram bind IP
    pub fn udp_bind_ip(mut self, ip: IpAddr) -> Self {
        self.udp_bind_ip = ip;
        self
    }

    /// Set the per-subscriber mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the transcoder executable
    pub fn ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    /// Set the transcoder JPEG quality
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Forward transcoder log output to tracing
    pub fn log_transcoder_output(mut self, enabled: bool) -> Self {
        self.log_transcoder_output = enabled;
        self
    }

    /// Set the keep-alive timeout for idle egress connections
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }
}
