//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and active call listing
//! - `bridge` - Telephony media-stream WebSocket

pub mod api;
pub mod bridge;

pub use bridge::media_stream_handler;
