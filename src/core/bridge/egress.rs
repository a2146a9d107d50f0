//! Paced writes toward the telephony socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::{BridgeError, BridgeResult};
use super::state::CallBridge;
use crate::core::audio::padded_frames;
use crate::core::telephony::{OutgoingMessage, TelephonyRoute};

/// Handle for writing to one call's telephony socket.
///
/// Cheap to clone; every clone feeds the same socket writer task. Audio and
/// `clear` frames need a stream SID, so they are dropped until the `start`
/// event has been seen.
#[derive(Clone)]
pub struct TelephonyEgress {
    bridge: Arc<CallBridge>,
    outgoing: mpsc::Sender<TelephonyRoute>,
    pacing: Duration,
}

impl TelephonyEgress {
    pub fn new(
        bridge: Arc<CallBridge>,
        outgoing: mpsc::Sender<TelephonyRoute>,
        pacing: Duration,
    ) -> Self {
        Self {
            bridge,
            outgoing,
            pacing,
        }
    }

    async fn send(&self, message: OutgoingMessage) -> BridgeResult<()> {
        self.outgoing
            .send(TelephonyRoute::Outgoing(message))
            .await
            .map_err(|_| BridgeError::TransportClosed)
    }

    /// Write μ-law audio as padded 160-byte frames, sleeping `pacing` after each.
    ///
    /// Returns the number of frames written. Writes nothing without a stream SID.
    pub async fn send_audio(&self, mulaw: &[u8]) -> BridgeResult<usize> {
        let Some(stream_sid) = self.bridge.stream_sid() else {
            warn!(
                call_id = %self.bridge.call_id(),
                bytes = mulaw.len(),
                "No stream SID yet, dropping outbound audio"
            );
            return Ok(0);
        };

        let mut written = 0;
        for frame in padded_frames(mulaw) {
            self.send(OutgoingMessage::media(&stream_sid, &frame)).await?;
            written += 1;
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        Ok(written)
    }

    /// Ask the provider to drop audio it has queued for playback.
    pub async fn clear(&self) -> BridgeResult<()> {
        match self.bridge.stream_sid() {
            Some(stream_sid) => self.send(OutgoingMessage::clear(&stream_sid)).await,
            None => {
                debug!("No stream SID yet, skipping clear");
                Ok(())
            }
        }
    }

    pub async fn heartbeat(&self) -> BridgeResult<()> {
        self.send(OutgoingMessage::heartbeat()).await
    }

    /// Ask the writer to close the socket. A writer that is already gone is fine.
    pub async fn close(&self) {
        if self.outgoing.send(TelephonyRoute::Close).await.is_err() {
            debug!("Telephony writer already closed");
        }
    }
}
