//! Fixed-size μ-law framing for the telephony leg.

use bytes::{Buf, BytesMut};

/// Bytes per telephony frame (20 ms of 8 kHz μ-law).
pub const FRAME_SIZE: usize = 160;

/// Duration of one frame in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// μ-law encoding of digital silence.
pub const MULAW_SILENCE: u8 = 0xFF;

/// One 20 ms unit of μ-law audio.
///
/// Anything handed to the transcoder or to telephony egress goes through this
/// type, so a short tail is always padded with silence and never truncated.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AudioFrame([u8; FRAME_SIZE]);

impl AudioFrame {
    /// Build a frame from up to [`FRAME_SIZE`] bytes, padding with silence.
    pub fn padded(chunk: &[u8]) -> Self {
        let len = chunk.len().min(FRAME_SIZE);
        let mut frame = [MULAW_SILENCE; FRAME_SIZE];
        frame[..len].copy_from_slice(&chunk[..len]);
        Self(frame)
    }

    /// A frame of pure silence.
    pub fn silence() -> Self {
        Self([MULAW_SILENCE; FRAME_SIZE])
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for AudioFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let silent = self.0.iter().filter(|b| **b == MULAW_SILENCE).count();
        f.debug_struct("AudioFrame")
            .field("silent_bytes", &silent)
            .finish()
    }
}

/// Split an arbitrary μ-law payload into frames, padding the last one.
pub fn padded_frames(mulaw: &[u8]) -> impl Iterator<Item = AudioFrame> + '_ {
    mulaw.chunks(FRAME_SIZE).map(AudioFrame::padded)
}

/// Accumulates inbound μ-law bytes and releases them in whole frames.
///
/// Between drains the buffer holds at most `FRAME_SIZE - 1` bytes, as long as
/// every [`FrameDrain`] is run to completion.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to the end of the buffer.
    pub fn append(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Lazily remove whole frames from the front of the buffer.
    pub fn drain_frames(&mut self) -> FrameDrain<'_> {
        FrameDrain {
            pending: &mut self.pending,
        }
    }

    /// Number of bytes waiting for a full frame.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop any buffered remainder.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Iterator returned by [`FrameBuffer::drain_frames`].
pub struct FrameDrain<'a> {
    pending: &'a mut BytesMut,
}

impl Iterator for FrameDrain<'_> {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        if self.pending.len() < FRAME_SIZE {
            return None;
        }
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&self.pending[..FRAME_SIZE]);
        self.pending.advance(FRAME_SIZE);
        Some(AudioFrame(frame))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.pending.len() / FRAME_SIZE;
        (n, Some(n))
    }
}
