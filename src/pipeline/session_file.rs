//! Session description for the transcoder input
//!
//! The transcoder does not speak WebRTC; it reads plain RTP from two local
//! datagram ports described by an SDP file. The signaling side forwards
//! re-marshaled RTP to the same ports, so the file is the entire contract
//! between the two halves.

use std::path::PathBuf;

use crate::config::RelayConfig;

/// Render the session description for the configured ports.
pub fn session_description(config: &RelayConfig) -> String {
    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 {ip}\r\n\
         s=mjpeg-relay\r\n\
         c=IN IP4 {ip}\r\n\
         t=0 0\r\n\
         m=audio {audio_port} RTP/AVP {audio_pt}\r\n\
         a=rtpmap:{audio_pt} OPUS/48000/2\r\n\
         m=video {video_port} RTP/AVP {video_pt}\r\n\
         a=rtpmap:{video_pt} VP8/90000\r\n",
        ip = config.udp_bind_ip,
        audio_port = config.audio_port,
        audio_pt = config.audio_payload_type,
        video_port = config.video_port,
        video_pt = config.video_payload_type,
    )
}

/// Write the session description to the configured path.
pub fn write_session_description(config: &RelayConfig) -> std::io::Result<PathBuf> {
    std::fs::write(&config.session_file, session_description(config))?;
    Ok(config.session_file.clone())
}
