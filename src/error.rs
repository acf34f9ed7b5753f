//! Crate-level error types

use crate::relay::RelayError;

/// Convenience result alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Relay state error (channels, subscribers, streams)
    Relay(RelayError),
    /// WebRTC engine error
    WebRtc(webrtc::Error),
    /// I/O error (sockets, subprocess, session file)
    Io(std::io::Error),
    /// The publisher's session description could not be applied
    InvalidOffer(String),
    /// Internal failure with no more specific classification
    Internal(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Relay(e) => write!(f, "Relay error: {}", e),
            Error::WebRtc(e) => write!(f, "WebRTC error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidOffer(reason) => write!(f, "Invalid offer: {}", reason),
            Error::Internal(reason) => write!(f, "Internal error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Relay(e) => Some(e),
            Error::WebRtc(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::InvalidOffer(_) | Error::Internal(_) => None,
        }
    }
}

impl From<RelayError> for Error {
    fn from(e: RelayError) -> Self {
        Error::Relay(e)
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
