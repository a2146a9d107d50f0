use thiserror::Error;

/// Faults on the telephony side of a bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The media-stream socket failed mid-call
    #[error("Telephony transport error: {0}")]
    Transport(String),

    /// The socket writer is gone
    #[error("Telephony transport closed")]
    TransportClosed,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
