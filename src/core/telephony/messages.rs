//! Media-stream WebSocket message types.
//!
//! The telephony provider sends JSON text frames discriminated by `event`:
//! `connected`, `start`, `media`, `mark` and `stop`. The bridge answers with
//! `media` and `clear` frames addressed by stream SID, plus an idle
//! `heartbeat` frame.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::audio::AudioFrame;

// =============================================================================
// Incoming Messages (provider -> bridge)
// =============================================================================

/// Events received on the media-stream socket.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Socket accepted by the provider
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },

    /// Stream metadata, sent once before any media
    Start {
        start: StartPayload,
    },

    /// One chunk of caller audio
    Media {
        media: MediaPayload,
    },

    /// A previously sent mark finished playing
    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },

    /// The stream ended
    Stop {
        #[serde(default)]
        stop: Option<StopPayload>,
    },

    /// Events the bridge does not act on (`dtmf`, ...)
    #[serde(other)]
    Unknown,
}

impl TelephonyEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    /// Missing on some providers' first `start`; outbound audio waits for it
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Audio directions carried by the stream (`inbound`, `outbound`)
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub custom_parameters: CustomParameters,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StartPayload {
    pub fn has_track(&self, track: &str) -> bool {
        self.tracks.iter().any(|t| t == track)
    }
}

/// Key-value parameters attached to the stream by the call webhook.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomParameters {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaPayload {
    /// Base64 μ-law audio
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MediaPayload {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(&self.payload)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub call_sid: Option<String>,
}

// =============================================================================
// Outgoing Messages (bridge -> provider)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutgoingMessage {
    /// One 160-byte frame of μ-law audio for the caller
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutgoingMedia,
    },

    /// Flush audio the provider has buffered but not yet played
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },

    /// Idle keepalive
    Heartbeat {
        /// Seconds since the UNIX epoch
        timestamp: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMedia {
    pub payload: String,
}

impl OutgoingMessage {
    pub fn media(stream_sid: &str, frame: &AudioFrame) -> Self {
        OutgoingMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: OutgoingMedia {
                payload: BASE64_STANDARD.encode(frame.as_bytes()),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        OutgoingMessage::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn heartbeat() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        OutgoingMessage::Heartbeat { timestamp }
    }
}

/// Routing for the socket writer task.
#[derive(Debug)]
pub enum TelephonyRoute {
    Outgoing(OutgoingMessage),
    /// Send a close frame and stop writing
    Close,
}
