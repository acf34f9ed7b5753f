//! Session description exchange format
//!
//! The publisher page posts its offer as `{"type": "offer", "sdp": "..."}`
//! and receives the answer in the same shape.

use serde::{Deserialize, Serialize};

/// JSON session-description message exchanged with the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpMessage {
    /// "offer" or "answer"
    #[serde(rename = "type")]
    pub kind: String,
    /// The raw session description
    pub sdp: String,
}

impl SdpMessage {
    /// Build an answer message.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}
