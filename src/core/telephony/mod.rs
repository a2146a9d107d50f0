//! Telephony media-stream protocol.

pub mod messages;

pub use messages::{
    CustomParameters, MediaPayload, OutgoingMessage, StartPayload, TelephonyEvent,
    TelephonyRoute,
};
