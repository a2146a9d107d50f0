//! μ-law ⇄ PCM16 transcoding between the telephony leg and the speech API.
//!
//! The telephony side carries 8 kHz, 8-bit G.711 μ-law. The speech API expects
//! 24 kHz, 16-bit signed little-endian PCM. Rate conversion is a plain 3×
//! zero-order hold on the way in and 3:1 decimation on the way out. Neither
//! direction is filtered, so some aliasing is expected on the telephony leg.

/// Telephony sample rate (Hz).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

/// Speech API sample rate (Hz).
pub const SPEECH_SAMPLE_RATE: u32 = 24000;

/// Ratio between the speech API rate and the telephony rate.
pub const RESAMPLE_FACTOR: usize = (SPEECH_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Expand one μ-law byte to a 16-bit linear sample.
#[inline]
pub fn mulaw_to_linear16(byte: u8) -> i16 {
    let mu = !byte;
    let negative = (mu & 0x80) != 0;
    let exponent = (mu & 0x70) >> 4;
    let mantissa = (mu & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if negative {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Compress one 16-bit linear sample to a μ-law byte.
///
/// Magnitudes above 32635 are clipped so the biased value stays inside the
/// top segment.
#[inline]
pub fn linear16_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > MULAW_CLIP {
        pcm = MULAW_CLIP;
    }
    pcm += MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Decode 8 kHz μ-law into 24 kHz PCM16 (little-endian).
///
/// Every input byte produces three identical output samples, so the result
/// is always `mulaw.len() * 6` bytes long.
pub fn decode_mulaw_to_pcm16(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2 * RESAMPLE_FACTOR);
    for &byte in mulaw {
        let sample = mulaw_to_linear16(byte).to_le_bytes();
        for _ in 0..RESAMPLE_FACTOR {
            pcm.extend_from_slice(&sample);
        }
    }
    pcm
}

/// Encode 24 kHz PCM16 (little-endian) into 8 kHz μ-law.
///
/// Keeps the first of every three samples. A trailing odd byte is ignored.
pub fn encode_pcm16_to_mulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .step_by(RESAMPLE_FACTOR)
        .map(|pair| linear16_to_mulaw(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}
