//! Speech-session client for the conversational speech API.
//!
//! - [`base`] holds the provider-neutral configuration, outcomes and events
//! - [`openai`] implements the session against the OpenAI Realtime API

mod base;
pub mod openai;

pub use base::{
    CommitOutcome, ConnectionState, DEFAULT_INSTRUCTIONS, InputTranscriptionConfig,
    MIN_COMMIT_MS, RealtimeConfig, RealtimeError, RealtimeResult, ResponseOutcome, SendOutcome,
    SpeechEvent, TurnDetectionConfig, pcm16_duration_ms,
};
pub use openai::{OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime};

/// The speech session used by the call bridge.
pub type SpeechSession = OpenAIRealtime;
