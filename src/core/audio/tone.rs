//! Sine test tone rendered through the egress encode path.

use super::codec::{SPEECH_SAMPLE_RATE, encode_pcm16_to_mulaw};

/// Peak amplitude of the test tone (about half of full scale).
pub const TONE_AMPLITUDE: f32 = 16000.0;

/// Synthesize a sine wave at the speech API rate and return it as μ-law.
///
/// The PCM is produced at 24 kHz and goes through the same decimating encoder
/// as model audio, so a caller hearing the tone confirms the whole egress
/// path works.
pub fn generate(duration_ms: u32, frequency_hz: f32) -> Vec<u8> {
    let samples = (SPEECH_SAMPLE_RATE as u64 * duration_ms as u64 / 1000) as usize;
    let step = 2.0 * std::f32::consts::PI * frequency_hz / SPEECH_SAMPLE_RATE as f32;

    let mut pcm = Vec::with_capacity(samples * 2);
    for n in 0..samples {
        let value = (TONE_AMPLITUDE * (step * n as f32).sin()) as i16;
        pcm.extend_from_slice(&value.to_le_bytes());
    }

    encode_pcm16_to_mulaw(&pcm)
}
