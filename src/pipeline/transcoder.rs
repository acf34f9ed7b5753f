//! Transcoder subprocess supervision
//!
//! Runs the external transcoder (ffmpeg) that turns the forwarded RTP feed
//! into an MJPEG byte stream, cuts the stream into frames, and hands each
//! frame to the broadcast side through a channel. The subprocess is bound
//! to a cancellation token and is killed as soon as the token fires or the
//! frame consumer goes away.

use std::process::Stdio;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::{Error, Result};

use super::extractor::FrameExtractor;

/// Stdout is read in chunks of this size.
const READ_CHUNK: usize = 32 * 1024;

/// Transcoder invocation parameters.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Executable to spawn.
    pub ffmpeg_path: String,
    /// Session description file naming the RTP input ports.
    pub session_file: std::path::PathBuf,
    /// JPEG quality knob (`-q:v`), 2..=31, lower is better.
    pub jpeg_quality: u8,
    /// Whether the transcoder's own log output is forwarded to tracing.
    pub log_output: bool,
}

impl From<&RelayConfig> for TranscoderConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            session_file: config.session_file.clone(),
            jpeg_quality: config.jpeg_quality,
            log_output: config.log_transcoder_output,
        }
    }
}

fn build_args(config: &TranscoderConfig) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-protocol_whitelist".to_string(),
        "file,udp,rtp".to_string(),
        "-i".to_string(),
        config.session_file.display().to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        "scale=-1:-1".to_string(),
        "-c:v".to_string(),
        "mjpeg".to_string(),
        "-q:v".to_string(),
        config.jpeg_quality.to_string(),
        "-f".to_string(),
        "mjpeg".to_string(),
        "pipe:1".to_string(),
    ]
}

/// Run the transcoder until it exits, the token is cancelled, or the frame
/// receiver is dropped. Every complete frame found on stdout is sent into
/// `frames` before the next chunk is read.
pub async fn run(
    config: TranscoderConfig,
    cancel: CancellationToken,
    frames: mpsc::Sender<Bytes>,
) -> Result<()> {
    let mut child = Command::new(&config.ffmpeg_path)
        .args(build_args(&config))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::Io)?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("transcoder stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("transcoder stderr not captured".to_string()))?;

    tracing::info!(path = %config.ffmpeg_path, session = %config.session_file.display(), "transcoder spawned");

    tokio::spawn(drain_stderr(stderr, config.log_output));

    let mut extractor = FrameExtractor::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    'read: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("transcoder cancelled, killing subprocess");
                let _ = child.kill().await;
                break 'read;
            }
            read = stdout.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => break 'read,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(error = %e, "transcoder stdout read failed");
                        break 'read;
                    }
                };
                for frame in extractor.push(&chunk[..n]) {
                    if frames.send(frame).await.is_err() {
                        tracing::debug!("frame consumer gone, killing transcoder");
                        let _ = child.kill().await;
                        break 'read;
                    }
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) => tracing::debug!(%status, "transcoder exited"),
        Err(e) => tracing::warn!(error = %e, "transcoder wait failed"),
    }
    Ok(())
}

async fn drain_stderr(stderr: ChildStderr, log_output: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if log_output {
            tracing::debug!(target: "transcoder", "{line}");
        }
    }
}
