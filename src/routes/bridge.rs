//! Telephony media-stream route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::bridge::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream WebSocket router
///
/// # Endpoints
///
/// - `GET /ws/realtime-bridge` - WebSocket upgrade for one call's media stream
/// - `GET /ws/media-stream` - alias of the above
///
/// Both accept an optional `callSid` query parameter that names the call until
/// the stream's `start` event supplies one.
pub fn create_bridge_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/realtime-bridge", get(media_stream_handler))
        .route("/ws/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
