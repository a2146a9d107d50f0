//! Telephony media-stream WebSocket handler
//!
//! The telephony provider opens this socket once per call and streams JSON
//! text frames (`connected`, `start`, `media`, `mark`, `stop`). Each socket is
//! handed to a [`BridgeOrchestrator`] which connects the call to the speech API.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::bridge::{BridgeError, BridgeOrchestrator, CallBridge};
use crate::core::telephony::TelephonyRoute;
use crate::state::AppState;

/// Outbound frames queued for the socket writer
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long to wait for the writer to flush the close frame
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub struct MediaStreamQuery {
    /// Call identifier supplied by the webhook that opened the stream
    #[serde(rename = "callSid")]
    pub call_sid: Option<String>,
}

/// Upgrade a telephony media-stream connection.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<MediaStreamQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(call_sid = ?query.call_sid, "Media stream upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_stream(socket, state, query.call_sid))
}

async fn handle_media_stream(socket: WebSocket, state: Arc<AppState>, call_sid: Option<String>) {
    let bridge = Arc::new(CallBridge::new(call_sid));
    let _registration = state.calls.register(bridge.clone());

    info!(
        connection_id = %bridge.connection_id(),
        call_id = %bridge.call_id(),
        active_calls = state.calls.len(),
        "Media stream connected"
    );

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<TelephonyRoute>(CHANNEL_BUFFER_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                TelephonyRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                TelephonyRoute::Close => {
                    debug!("Closing media stream socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Failed to write to media stream socket: {}", e);
                break;
            }
        }
    });

    let inbound = Box::pin(async_stream::stream! {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => yield Ok(text.as_str().to_owned()),
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring binary frame: {} bytes", data.len());
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    yield Err(BridgeError::Transport(e.to_string()));
                    break;
                }
            }
        }
    });

    let orchestrator = BridgeOrchestrator::new(
        bridge,
        state.config.bridge.clone(),
        state.config.realtime.clone(),
        route_tx,
    )
    .with_parent_token(&state.shutdown);
    let report = orchestrator.run(inbound).await;

    match tokio::time::timeout(WRITER_SHUTDOWN_GRACE, writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Media stream writer failed: {}", e),
        Err(_) => warn!("Media stream writer did not finish in time"),
    }

    info!(
        connection_id = %report.connection_id,
        call_id = %report.call_id,
        media_messages = report.media_messages,
        frames_ingested = report.frames_ingested,
        frames_not_sent = report.frames_not_sent,
        commits = report.commits,
        commits_skipped = report.commits_skipped,
        responses_requested = report.responses_requested,
        frames_relayed = report.frames_relayed,
        duration_ms = report.duration_ms,
        "Media stream terminated"
    );
}
