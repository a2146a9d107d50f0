//! Telephony audio primitives.
//!
//! - [`codec`]: μ-law ⇄ PCM16 transcoding with naive 8 kHz ⇄ 24 kHz conversion
//! - [`frame`]: 160-byte framing of the μ-law byte stream
//! - [`tone`]: diagnostic sine tone for connectivity checks

pub mod codec;
pub mod frame;
pub mod tone;

pub use codec::{
    SPEECH_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE, decode_mulaw_to_pcm16, encode_pcm16_to_mulaw,
    linear16_to_mulaw, mulaw_to_linear16,
};
pub use frame::{
    AudioFrame, FRAME_DURATION_MS, FRAME_SIZE, FrameBuffer, FrameDrain, MULAW_SILENCE,
    padded_frames,
};
pub use tone::generate as generate_tone;
