//! Publisher admission and session wiring
//!
//! The signaling gate accepts a publisher's offer for a channel, spins up
//! the WebRTC session, and wires delivered media into the relay: tracks
//! are forwarded to the local datagram sinks, the first video track starts
//! the transcoder pipeline, and terminal session states tear the stream
//! down again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::pipeline::{self, TranscoderConfig};
use crate::relay::{Channel, ConnectionManager, RelayError};

use super::forward::{self, SinkSet, TrackKind};
use super::sdp::SdpMessage;

/// Keyframe requests sent right after a video track appears.
const PLI_ATTEMPTS: usize = 5;
/// Delay before the second request; doubled after every attempt.
const PLI_INITIAL_INTERVAL: Duration = Duration::from_millis(300);

/// Frames in flight between the transcoder and the broadcast dispatcher.
const FRAME_QUEUE_CAPACITY: usize = 16;

/// Accept a publisher offer for `code` and return the answer.
///
/// Fails with `ChannelNotFound` when the channel does not exist and with
/// `NoSubscribers` — removing the channel — when nobody is watching.
pub async fn accept_offer(
    manager: &Arc<ConnectionManager>,
    config: &Arc<RelayConfig>,
    code: &str,
    offer: SdpMessage,
) -> Result<SdpMessage> {
    let channel = manager
        .validate_channel(code)
        .await
        .ok_or_else(|| RelayError::ChannelNotFound(code.to_string()))?;

    if channel.list_subscribers().await.is_empty() {
        tracing::warn!(channel = %code, "publisher offer with no viewers");
        manager.remove_channel(code).await;
        return Err(RelayError::NoSubscribers(code.to_string()).into());
    }

    let stream = channel.attach_stream(0).await?;
    let stream_id = stream.id();

    let admitted: Result<SdpMessage> = async {
        let (session, answer) =
            create_session(manager, config, &channel, code, stream_id, offer).await?;
        stream.attach_media(session).await;
        channel.start_stream(stream_id).await?;
        Ok(answer)
    }
    .await;

    match admitted {
        Ok(answer) => {
            tracing::info!(channel = %code, stream_id, "publisher admitted");
            Ok(answer)
        }
        Err(e) => {
            if let Err(remove_err) = channel.remove_stream(stream_id).await {
                tracing::debug!(channel = %code, stream_id, error = %remove_err, "cleanup after failed admission");
            }
            Err(e)
        }
    }
}

/// Build the peer connection for one publisher and complete the
/// offer/answer exchange. Candidate gathering finishes before the answer
/// is returned so it carries every candidate.
async fn create_session(
    manager: &Arc<ConnectionManager>,
    config: &Arc<RelayConfig>,
    channel: &Arc<Channel>,
    code: &str,
    stream_id: u32,
    offer: SdpMessage,
) -> Result<(Arc<RTCPeerConnection>, SdpMessage)> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: config.video_payload_type,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: config.audio_payload_type,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![config.stun_server.clone()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let session = Arc::new(api.new_peer_connection(rtc_config).await?);
    session
        .add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await?;
    session
        .add_transceiver_from_kind(RTPCodecType::Video, None)
        .await?;

    let sinks = Arc::new(SinkSet::bind(config).await?);

    session_on_track(
        Arc::clone(manager),
        Arc::clone(channel),
        Arc::clone(config),
        Arc::clone(&sinks),
        &session,
        code.to_string(),
    );

    {
        let channel = Arc::clone(channel);
        let sinks = Arc::clone(&sinks);
        let code = code.to_string();
        session.on_peer_connection_state_change(Box::new(move |state| {
            let channel = Arc::clone(&channel);
            let sinks = Arc::clone(&sinks);
            let code = code.clone();
            Box::pin(async move {
                tracing::debug!(channel = %code, %state, "peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    sinks.shutdown();
                    // stop_stream closes the session in turn; run it from
                    // its own task so this handler never blocks on it.
                    tokio::spawn(async move {
                        if let Err(e) = channel.stop_stream(stream_id).await {
                            tracing::debug!(channel = %code, stream_id, error = %e, "stop after terminal state");
                        }
                    });
                }
            })
        }));
    }

    let remote = RTCSessionDescription::offer(offer.sdp)
        .map_err(|e| Error::InvalidOffer(e.to_string()))?;
    session
        .set_remote_description(remote)
        .await
        .map_err(|e| Error::InvalidOffer(e.to_string()))?;

    let answer = session.create_answer(None).await?;
    let mut gather_complete = session.gathering_complete_promise().await;
    session.set_local_description(answer).await?;
    let _ = gather_complete.recv().await;

    let local = session
        .local_description()
        .await
        .ok_or_else(|| Error::Internal("local description missing after gathering".to_string()))?;

    Ok((session, SdpMessage::answer(local.sdp)))
}

// The closure needs its own copies per invocation; keeping the
// registration in a helper keeps the clone bookkeeping in one place.
fn session_on_track(
    manager: Arc<ConnectionManager>,
    channel: Arc<Channel>,
    config: Arc<RelayConfig>,
    sinks: Arc<SinkSet>,
    session: &Arc<RTCPeerConnection>,
    code: String,
) {
    let weak = Arc::downgrade(session);
    session.on_track(Box::new(move |track, _receiver, _transceiver| {
        let manager = Arc::clone(&manager);
        let channel = Arc::clone(&channel);
        let config = Arc::clone(&config);
        let sinks = Arc::clone(&sinks);
        let session = weak.clone();
        let code = code.clone();
        Box::pin(async move {
            let Some(kind) = TrackKind::from_codec(track.kind()) else {
                return;
            };
            tracing::info!(channel = %code, kind = kind.as_str(), ssrc = track.ssrc(), "track received");

            if kind == TrackKind::Video {
                start_pipeline_once(&manager, &channel, &config, &code).await;
                if let Some(session) = session.upgrade() {
                    tokio::spawn(send_initial_plis(session, track.ssrc()));
                }
            }

            let sink = sinks.for_kind(kind);
            let cancel = sinks.cancel_token();
            tokio::spawn(forward::forward_track(track, sink, cancel));
        })
    }));
}

/// Claim the channel's pipeline slot and launch the transcoder plus the
/// broadcast dispatcher. A no-op while a pipeline is already bound.
async fn start_pipeline_once(
    manager: &Arc<ConnectionManager>,
    channel: &Arc<Channel>,
    config: &Arc<RelayConfig>,
    code: &str,
) {
    let Some((generation, cancel)) = channel.begin_pipeline().await else {
        return;
    };
    tracing::info!(channel = %code, generation, "starting transcoder pipeline");

    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(FRAME_QUEUE_CAPACITY);

    {
        let manager = Arc::clone(manager);
        let channel = Arc::clone(channel);
        let code = code.to_string();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                // Target whichever stream is active when the frame lands.
                if let Some(active) = channel.active_stream_id().await {
                    manager
                        .broadcast_to_active_stream(&code, active, frame)
                        .await;
                }
            }
        });
    }

    let transcoder_config = TranscoderConfig::from(config.as_ref());
    let channel = Arc::clone(channel);
    let code = code.to_string();
    tokio::spawn(async move {
        if let Err(e) = pipeline::run(transcoder_config, cancel, frame_tx).await {
            tracing::error!(channel = %code, error = %e, "transcoder pipeline failed");
        }
        channel.pipeline_finished(generation).await;
    });
}

/// Ask the publisher for a keyframe a few times with exponential backoff,
/// so viewers see a decodable picture quickly.
async fn send_initial_plis(session: Arc<RTCPeerConnection>, media_ssrc: u32) {
    let mut interval = PLI_INITIAL_INTERVAL;
    for attempt in 1..=PLI_ATTEMPTS {
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        match session.write_rtcp(&[Box::new(pli)]).await {
            Ok(_) => tracing::trace!(attempt, ssrc = media_ssrc, "keyframe request sent"),
            Err(e) => {
                tracing::debug!(attempt, ssrc = media_ssrc, error = %e, "keyframe request failed")
            }
        }
        tokio::time::sleep(interval).await;
        interval *= 2;
    }
}
