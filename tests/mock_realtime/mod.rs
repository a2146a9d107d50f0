//! Mock speech API server
//!
//! Speaks just enough of the Realtime protocol for bridge tests: it announces a
//! session, records every client event, and answers `response.create` with a
//! short audio reply.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// How the mock treats each connection after `session.created`.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Answer every `response.create` with `pcm` as one audio delta
    Reply { pcm: Vec<u8> },
    /// Close the socket right after announcing the session
    DropAfterSession,
}

pub struct MockRealtime {
    pub url: String,
    events: mpsc::UnboundedReceiver<Value>,
    seen: Vec<Value>,
    /// `Authorization` header of the most recent handshake
    pub authorization: Arc<Mutex<Option<String>>>,
}

impl MockRealtime {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        let authorization = Arc::new(Mutex::new(None));

        let auth = authorization.clone();
        tokio::spawn(async move {
            let mut connection = 0u32;
            while let Ok((stream, _)) = listener.accept().await {
                connection += 1;
                tokio::spawn(handle_connection(
                    stream,
                    connection,
                    behavior.clone(),
                    events_tx.clone(),
                    auth.clone(),
                ));
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            events,
            seen: Vec::new(),
            authorization,
        }
    }

    /// Every client event received so far, in order.
    pub fn received(&mut self) -> Vec<Value> {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
        self.seen.clone()
    }

    /// Wait until `count` events of type `kind` have arrived, then return
    /// everything received so far.
    pub async fn wait_for(&mut self, kind: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let seen = self.received();
            if types(&seen).iter().filter(|k| **k == kind).count() >= count {
                return seen;
            }
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.seen.push(event),
                _ => panic!("timed out waiting for {count} {kind} events"),
            }
        }
    }
}

/// Event types in the order they were received.
pub fn types(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| event["type"].as_str())
        .collect()
}

async fn handle_connection(
    stream: TcpStream,
    connection: u32,
    behavior: MockBehavior,
    events_tx: mpsc::UnboundedSender<Value>,
    authorization: Arc<Mutex<Option<String>>>,
) {
    let callback = |request: &Request,
                    response: Response|
     -> Result<Response, ErrorResponse> {
        *authorization.lock() = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(response)
    };
    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let created = json!({
        "type": "session.created",
        "session": {"id": format!("sess_mock_{connection}"), "voice": "echo"}
    });
    if write
        .send(Message::Text(created.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let pcm = match behavior {
        MockBehavior::Reply { pcm } => pcm,
        MockBehavior::DropAfterSession => {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };

    let mut responses = 0u32;
    while let Some(Ok(message)) = read.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(event) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let is_response_create = event["type"] == "response.create";
        let _ = events_tx.send(event);

        if is_response_create {
            responses += 1;
            let response_id = format!("resp_{responses}");
            let replies = [
                json!({"type": "response.created", "response": {"id": response_id}}),
                json!({
                    "type": "response.audio.delta",
                    "response_id": response_id,
                    "delta": BASE64_STANDARD.encode(&pcm),
                }),
                json!({
                    "type": "response.audio_transcript.delta",
                    "response_id": response_id,
                    "delta": "Hello Alex",
                }),
                json!({
                    "type": "response.done",
                    "response": {"id": response_id, "status": "completed"}
                }),
            ];
            for reply in replies {
                if write
                    .send(Message::Text(reply.to_string().into()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}
