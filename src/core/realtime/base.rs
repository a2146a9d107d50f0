//! Shared types for the speech-session client.
//!
//! Audio exchanged with the speech API is PCM 16-bit signed little-endian at
//! 24 kHz, mono.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeModel};

/// Minimum buffered audio the API accepts for a commit.
pub const MIN_COMMIT_MS: f64 = 100.0;

/// Instructions used when no template is configured.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly voice assistant speaking with a caller over the phone. \
Keep answers short and conversational, and ask one question at a time.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while establishing or running a speech session.
///
/// These never escape the public client API; they are logged and mapped to
/// the outcome enums below.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The API rejected the session handshake
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for one speech session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// API key. An empty key makes `connect` fail without dialing out.
    pub api_key: String,

    /// WebSocket endpoint, without the model query parameter
    pub url: String,

    pub model: String,

    pub voice: String,

    /// Instructions template. `{user_name}` and `{user_contact}` are
    /// substituted from the caller context.
    pub instructions: String,

    pub temperature: f32,

    /// Maximum response tokens (-1 for infinite)
    pub max_response_output_tokens: i32,

    /// Transcription model for caller audio, `None` disables transcription
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    pub turn_detection: TurnDetectionConfig,

    /// Bound on the WebSocket handshake plus the wait for `session.created`
    pub connect_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: OPENAI_REALTIME_URL.to_string(),
            model: OpenAIRealtimeModel::default().as_str().to_string(),
            voice: "echo".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: 0.8,
            max_response_output_tokens: 4096,
            input_audio_transcription: Some(InputTranscriptionConfig::default()),
            turn_detection: TurnDetectionConfig::default(),
            connect_timeout_ms: 10_000,
        }
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    pub model: String,
}

impl Default for InputTranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
        }
    }
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        threshold: f32,
        /// Audio included before detected speech (ms)
        prefix_padding_ms: u32,
        /// Silence that ends a turn (ms)
        silence_duration_ms: u32,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 800,
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Handshake failed; the session stays unusable for this call
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of handing an event to the session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No transport, or the transport has already shut down
    NotSent,
}

impl SendOutcome {
    #[inline]
    pub fn is_sent(self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Not enough audio buffered; nothing was sent and the counter is untouched
    Skipped,
    NotSent,
}

/// Result of a response request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Sent,
    /// A response is in flight; one follow-up will be issued when it finishes
    Queued,
    NotSent,
}

// =============================================================================
// Events
// =============================================================================

/// Typed events produced by a speech session.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// Assistant audio, PCM16 at 24 kHz
    Audio(Bytes),
    /// Assistant transcript fragment
    Transcript(String),
    SpeechStarted,
    SpeechStopped,
    /// The in-flight response finished
    Done,
    /// The API reported an error; the session keeps running
    Error(String),
}

/// Duration in milliseconds of a PCM16 buffer at the speech API rate.
#[inline]
pub fn pcm16_duration_ms(byte_len: usize) -> f64 {
    let samples = (byte_len / 2) as f64;
    samples * 1000.0 / OPENAI_REALTIME_SAMPLE_RATE as f64
}
