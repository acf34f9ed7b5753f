//! Relay error types
//!
//! Error types for channel, subscriber, and stream operations.

/// Error type for relay operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Channel not found
    ChannelNotFound(String),
    /// Subscriber not found in the channel
    SubscriberNotFound { channel: String, id: u32 },
    /// Subscriber id already taken in the channel
    SubscriberExists { channel: String, id: u32 },
    /// Stream not found in the channel
    StreamNotFound { channel: String, id: u32 },
    /// Stream id already taken in the channel
    StreamExists { channel: String, id: u32 },
    /// Stream is already running
    StreamAlreadyRunning(u32),
    /// Stream is not running
    StreamNotRunning(u32),
    /// Channel has no viewers attached
    NoSubscribers(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::ChannelNotFound(code) => write!(f, "Channel not found: {}", code),
            RelayError::SubscriberNotFound { channel, id } => {
                write!(f, "Subscriber {} not found in channel {}", id, channel)
            }
            RelayError::SubscriberExists { channel, id } => {
                write!(f, "Subscriber {} already exists in channel {}", id, channel)
            }
            RelayError::StreamNotFound { channel, id } => {
                write!(f, "Stream {} not found in channel {}", id, channel)
            }
            RelayError::StreamExists { channel, id } => {
                write!(f, "Stream {} already exists in channel {}", id, channel)
            }
            RelayError::StreamAlreadyRunning(id) => {
                write!(f, "Stream {} is already running", id)
            }
            RelayError::StreamNotRunning(id) => write!(f, "Stream {} is not running", id),
            RelayError::NoSubscribers(code) => {
                write!(f, "No subscribers on channel: {}", code)
            }
        }
    }
}

impl std::error::Error for RelayError {}
