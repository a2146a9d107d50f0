pub mod api;
pub mod bridge;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// Every route the server exposes, with state attached.
pub fn create_router(state: Arc<AppState>) -> Router {
    api::create_api_router()
        .merge(bridge::create_bridge_router())
        .with_state(state)
}
