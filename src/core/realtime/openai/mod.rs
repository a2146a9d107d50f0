//! OpenAI Realtime API speech session.
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz. The
//! session negotiates `server_vad` turn detection and is driven by explicit
//! commits and response requests from the call bridge.

mod client;
mod config;
pub mod messages;

pub use client::{OpenAIRealtime, render_instructions};
pub use config::{
    Modality, OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeModel, OpenAIRealtimeVoice, RESPONSE_INSTRUCTIONS,
};
