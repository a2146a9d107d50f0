//! OpenAI Realtime API client.
//!
//! One [`OpenAIRealtime`] is one speech session for one call. Every method
//! takes `&self`, so the session can sit behind an `Arc` shared by the
//! telephony ingress task (ingest, commit, response requests) and the egress
//! task (event stream).
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Failure semantics
//!
//! Transport absence and remote rejection never surface as errors. Each
//! operation returns an outcome ([`SendOutcome`], [`CommitOutcome`],
//! [`ResponseOutcome`]) and the caller decides whether to log and continue.
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge_gateway::core::realtime::{OpenAIRealtime, RealtimeConfig, SpeechEvent};
//! use futures::StreamExt;
//!
//! let session = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! });
//! if session.connect().await {
//!     session.configure(Some("Alex"), None).await;
//!     session.ingest(&pcm).await;
//!     let events = session.events().unwrap();
//!     futures::pin_mut!(events);
//!     while let Some(event) = events.next().await { /* ... */ }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::config::{
    Modality, OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice,
    RESPONSE_INSTRUCTIONS,
};
use super::messages::{
    ClientEvent, InputAudioTranscription, ResponseConfig, ServerEvent, Session, SessionConfig,
    TurnDetection,
};
use crate::core::realtime::base::{
    CommitOutcome, ConnectionState, MIN_COMMIT_MS, RealtimeConfig, RealtimeError, RealtimeResult,
    ResponseOutcome, SendOutcome, SpeechEvent, TurnDetectionConfig, pcm16_duration_ms,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for the connection task to flush its close frame.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Per-session turn bookkeeping.
#[derive(Debug, Default)]
struct TurnState {
    ms_buffered_since_commit: f64,
    response_in_progress: bool,
    response_pending: bool,
}

/// A speech session against the OpenAI Realtime API.
pub struct OpenAIRealtime {
    config: RealtimeConfig,
    model: OpenAIRealtimeModel,
    voice: OpenAIRealtimeVoice,
    audio_format: OpenAIRealtimeAudioFormat,
    /// Shared with the connection task, which marks it disconnected on exit
    state: Arc<RwLock<ConnectionState>>,
    session_id: RwLock<Option<String>>,
    ws_sender: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    /// Taken by the first call to `events`
    server_events: Mutex<Option<mpsc::UnboundedReceiver<ServerEvent>>>,
    turn: Mutex<TurnState>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl OpenAIRealtime {
    pub fn new(config: RealtimeConfig) -> Self {
        let model = OpenAIRealtimeModel::from_str_or_default(&config.model);
        let voice = OpenAIRealtimeVoice::from_str_or_default(&config.voice);

        Self {
            config,
            model,
            voice,
            audio_format: OpenAIRealtimeAudioFormat::Pcm16,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            session_id: RwLock::new(None),
            ws_sender: Mutex::new(None),
            server_events: Mutex::new(None),
            turn: Mutex::new(TurnState::default()),
            connection_handle: Mutex::new(None),
        }
    }

    pub fn model(&self) -> OpenAIRealtimeModel {
        self.model
    }

    pub fn voice(&self) -> OpenAIRealtimeVoice {
        self.voice
    }

    /// Session ID assigned by the server, if connected.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether events can currently be handed to the transport.
    pub fn is_ready(&self) -> bool {
        self.sender().is_some()
    }

    /// Milliseconds of audio ingested since the last successful commit.
    pub fn buffered_ms(&self) -> f64 {
        self.turn.lock().ms_buffered_since_commit
    }

    pub fn response_in_progress(&self) -> bool {
        self.turn.lock().response_in_progress
    }

    /// Build the WebSocket URL with model parameter.
    fn build_ws_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("realtime url: {e}")))?;
        url.query_pairs_mut().append_pair("model", self.model.as_str());
        Ok(url)
    }

    fn build_session_config(
        &self,
        display_name: Option<&str>,
        contact: Option<&str>,
    ) -> SessionConfig {
        SessionConfig {
            modalities: Some(Modality::list(&[Modality::Text, Modality::Audio])),
            instructions: Some(render_instructions(
                &self.config.instructions,
                display_name,
                contact,
            )),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some(self.audio_format.as_str().to_string()),
            output_audio_format: Some(self.audio_format.as_str().to_string()),
            input_audio_transcription: self.config.input_audio_transcription.as_ref().map(|t| {
                InputAudioTranscription {
                    model: t.model.clone(),
                }
            }),
            turn_detection: Some(match &self.config.turn_detection {
                TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                } => TurnDetection::ServerVad {
                    threshold: Some(*threshold),
                    prefix_padding_ms: Some(*prefix_padding_ms),
                    silence_duration_ms: Some(*silence_duration_ms),
                },
                TurnDetectionConfig::None => TurnDetection::None {},
            }),
            tool_choice: Some("none".to_string()),
            temperature: Some(self.config.temperature),
            max_response_output_tokens: Some(self.config.max_response_output_tokens.into()),
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open the transport and wait for `session.created`.
    ///
    /// Returns `false` on any handshake failure. Callers should carry on
    /// without the speech side rather than abort the call.
    pub async fn connect(&self) -> bool {
        match self.open().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to connect to OpenAI Realtime API: {}", e);
                *self.state.write() = ConnectionState::Failed;
                false
            }
        }
    }

    async fn open(&self) -> RealtimeResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        if self.config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        *self.state.write() = ConnectionState::Connecting;

        let url = self.build_ws_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("api key: {e}")))?;
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, bearer);
        request.headers_mut().insert(
            HeaderName::from_static("openai-beta"),
            HeaderValue::from_static("realtime=v1"),
        );

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (mut ws_stream, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| RealtimeError::Timeout("WebSocket handshake".to_string()))?
                .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!("Connected to OpenAI Realtime API at {}", self.config.url);

        let session = tokio::time::timeout(timeout, Self::await_session_created(&mut ws_stream))
            .await
            .map_err(|_| RealtimeError::Timeout("waiting for session.created".to_string()))??;

        tracing::info!("OpenAI Realtime session created: {}", session.id);
        *self.session_id.write() = Some(session.id);

        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ServerEvent>();
        *self.ws_sender.lock() = Some(tx);
        *self.server_events.lock() = Some(events_rx);
        *self.state.write() = ConnectionState::Connected;

        let handle = tokio::spawn(Self::run_connection(
            ws_stream,
            rx,
            events_tx,
            self.state.clone(),
        ));
        *self.connection_handle.lock() = Some(handle);

        Ok(())
    }

    async fn await_session_created(ws_stream: &mut WsStream) -> RealtimeResult<Session> {
        while let Some(message) = ws_stream.next().await {
            match message.map_err(|e| RealtimeError::WebSocketError(e.to_string()))? {
                Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(ServerEvent::SessionCreated { session }) => return Ok(session),
                    Ok(ServerEvent::Error { error }) => {
                        return Err(RealtimeError::ProviderError(error.to_string()));
                    }
                    Ok(_) => tracing::debug!("Ignoring event received before session.created"),
                    Err(e) => tracing::warn!("Failed to parse server event: {} - {}", e, text),
                },
                Message::Close(frame) => {
                    return Err(RealtimeError::ConnectionFailed(format!(
                        "closed before session.created: {frame:?}"
                    )));
                }
                _ => {}
            }
        }
        Err(RealtimeError::ConnectionFailed(
            "connection ended before session.created".to_string(),
        ))
    }

    /// Pump outgoing client events and incoming server events until either
    /// side goes away. Dropping every sender closes the socket cleanly.
    async fn run_connection(
        ws_stream: WsStream,
        mut rx: mpsc::Receiver<ClientEvent>,
        events_tx: mpsc::UnboundedSender<ServerEvent>,
        state: Arc<RwLock<ConnectionState>>,
    ) {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        loop {
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(event) = outgoing else {
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            tracing::debug!("Failed to send close frame: {}", e);
                        }
                        break;
                    };
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize {}: {}", event.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }

                incoming = ws_stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    // Nobody listening is fine; the events are informational.
                                    let _ = events_tx.send(event);
                                }
                                Err(e) => {
                                    tracing::warn!("Failed to parse server event: {} - {}", e, text);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("WebSocket closed by server");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                tracing::error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        *state.write() = ConnectionState::Disconnected;
        tracing::info!("OpenAI Realtime connection task ended");
    }

    /// Close the transport and forget the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let sender = self.ws_sender.lock().take();
        let handle = self.connection_handle.lock().take();
        let was_connected = sender.is_some();
        drop(sender);

        if let Some(mut handle) = handle {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("OpenAI Realtime connection task failed: {}", e),
                Err(_) => {
                    tracing::warn!("OpenAI Realtime connection task did not stop, aborting");
                    handle.abort();
                }
            }
        }

        self.server_events.lock().take();
        *self.session_id.write() = None;
        *self.state.write() = ConnectionState::Disconnected;

        if was_connected {
            tracing::info!("Disconnected from OpenAI Realtime API");
        }
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    fn sender(&self) -> Option<mpsc::Sender<ClientEvent>> {
        self.ws_sender
            .lock()
            .as_ref()
            .filter(|tx| !tx.is_closed())
            .cloned()
    }

    async fn send_event(&self, event: ClientEvent) -> SendOutcome {
        let kind = event.kind();
        let Some(sender) = self.sender() else {
            tracing::debug!("No OpenAI Realtime transport, {} not sent", kind);
            return SendOutcome::NotSent;
        };
        match sender.send(event).await {
            Ok(()) => SendOutcome::Sent,
            Err(_) => {
                tracing::warn!("OpenAI Realtime transport closed, {} not sent", kind);
                SendOutcome::NotSent
            }
        }
    }

    /// Send voice, turn detection and instructions for this call.
    pub async fn configure(
        &self,
        display_name: Option<&str>,
        contact: Option<&str>,
    ) -> SendOutcome {
        let session = self.build_session_config(display_name, contact);
        let outcome = self.send_event(ClientEvent::SessionUpdate { session }).await;
        if outcome.is_sent() {
            tracing::info!(voice = %self.voice, "Sent session configuration");
        }
        outcome
    }

    /// Append PCM16 audio to the remote input buffer.
    pub async fn ingest(&self, pcm: &[u8]) -> SendOutcome {
        let outcome = self.send_event(ClientEvent::audio_append(pcm)).await;
        if outcome.is_sent() {
            self.turn.lock().ms_buffered_since_commit += pcm16_duration_ms(pcm.len());
        }
        outcome
    }

    /// Commit the remote input buffer once at least 100 ms has been ingested.
    pub async fn commit(&self) -> CommitOutcome {
        if !self.is_ready() {
            return CommitOutcome::NotSent;
        }

        let buffered = self.buffered_ms();
        if buffered < MIN_COMMIT_MS {
            tracing::warn!(
                "Only {:.1}ms buffered, need {}ms before commit",
                buffered,
                MIN_COMMIT_MS
            );
            return CommitOutcome::Skipped;
        }

        match self.send_event(ClientEvent::InputAudioBufferCommit).await {
            SendOutcome::Sent => {
                tracing::debug!("Committed {:.1}ms of audio", buffered);
                self.turn.lock().ms_buffered_since_commit = 0.0;
                CommitOutcome::Committed
            }
            SendOutcome::NotSent => CommitOutcome::NotSent,
        }
    }

    /// Ask the model to respond, or queue a single follow-up if one is in flight.
    pub async fn request_response(&self) -> ResponseOutcome {
        if !self.is_ready() {
            return ResponseOutcome::NotSent;
        }

        {
            let mut turn = self.turn.lock();
            if turn.response_in_progress {
                if turn.response_pending {
                    tracing::debug!("Response already queued, collapsing request");
                } else {
                    tracing::debug!("Response in progress, queueing one follow-up");
                }
                turn.response_pending = true;
                return ResponseOutcome::Queued;
            }
            turn.response_in_progress = true;
        }

        let event = ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                modalities: Some(Modality::list(&[Modality::Audio, Modality::Text])),
                instructions: Some(RESPONSE_INSTRUCTIONS.to_string()),
            }),
        };
        match self.send_event(event).await {
            SendOutcome::Sent => {
                tracing::info!("Requested response");
                ResponseOutcome::Sent
            }
            SendOutcome::NotSent => {
                self.turn.lock().response_in_progress = false;
                ResponseOutcome::NotSent
            }
        }
    }

    /// Clear the in-flight flag and issue the queued request, if any.
    async fn finish_response(&self) {
        let follow_up = {
            let mut turn = self.turn.lock();
            turn.response_in_progress = false;
            std::mem::take(&mut turn.response_pending)
        };
        if follow_up {
            let outcome = self.request_response().await;
            tracing::debug!("Issued queued response request: {:?}", outcome);
        }
    }

    /// Typed event stream for this session.
    ///
    /// Returns `None` if the session never connected or the stream was already
    /// taken. The stream ends when the connection does.
    pub fn events(&self) -> Option<impl Stream<Item = SpeechEvent> + Send + '_> {
        let mut server_events = self.server_events.lock().take()?;
        Some(async_stream::stream! {
            while let Some(event) = server_events.recv().await {
                if let Some(speech_event) = self.handle_server_event(event).await {
                    yield speech_event;
                }
            }
        })
    }

    async fn handle_server_event(&self, event: ServerEvent) -> Option<SpeechEvent> {
        match event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
                *self.session_id.write() = Some(session.id);
                None
            }

            ServerEvent::SessionUpdated { session } => {
                tracing::debug!("OpenAI Realtime session updated: {}", session.id);
                None
            }

            ServerEvent::Error { error } => {
                tracing::error!("OpenAI Realtime error: {}", error);
                Some(SpeechEvent::Error(error.to_string()))
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms);
                Some(SpeechEvent::SpeechStarted)
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                tracing::debug!("Speech stopped at {}ms", audio_end_ms);
                Some(SpeechEvent::SpeechStopped)
            }

            ServerEvent::InputAudioBufferCommitted { item_id } => {
                tracing::debug!("Input audio committed: {:?}", item_id);
                None
            }

            ServerEvent::ResponseCreated { response } => {
                tracing::debug!("Response created: {}", response.id);
                self.turn.lock().response_in_progress = true;
                None
            }

            ServerEvent::AudioDelta { delta, .. } => match ServerEvent::decode_audio_delta(&delta) {
                Ok(pcm) => {
                    let mut turn = self.turn.lock();
                    if !turn.response_in_progress {
                        tracing::debug!("Audio arrived for a server-initiated response");
                        turn.response_in_progress = true;
                    }
                    Some(SpeechEvent::Audio(Bytes::from(pcm)))
                }
                Err(e) => {
                    tracing::error!("Failed to decode audio delta: {}", e);
                    None
                }
            },

            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                Some(SpeechEvent::Transcript(delta))
            }

            ServerEvent::AudioTranscriptDone { transcript } => {
                tracing::debug!("Assistant transcript: {}", transcript);
                None
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!(
                    "Response done: {} ({})",
                    response.id,
                    response.status.as_deref().unwrap_or("unknown")
                );
                self.finish_response().await;
                Some(SpeechEvent::Done)
            }

            ServerEvent::AudioDone { .. } | ServerEvent::Unknown => {
                tracing::trace!("Unhandled server event");
                None
            }
        }
    }

    /// Wire a session to in-memory channels instead of a socket.
    #[cfg(test)]
    fn attached(
        config: RealtimeConfig,
    ) -> (
        Self,
        mpsc::Receiver<ClientEvent>,
        mpsc::UnboundedSender<ServerEvent>,
    ) {
        let session = Self::new(config);
        let (tx, rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *session.ws_sender.lock() = Some(tx);
        *session.server_events.lock() = Some(events_rx);
        *session.state.write() = ConnectionState::Connected;
        (session, rx, events_tx)
    }
}

/// Fill the instructions template with the caller context.
///
/// Known details are also appended as a sentence so the assistant does not
/// ask for them again.
pub fn render_instructions(
    template: &str,
    display_name: Option<&str>,
    contact: Option<&str>,
) -> String {
    let display_name = display_name.map(str::trim).filter(|s| !s.is_empty());
    let contact = contact.map(str::trim).filter(|s| !s.is_empty());

    let mut text = template
        .replace("{user_name}", display_name.unwrap_or("the caller"))
        .replace("{user_contact}", contact.unwrap_or("unknown"));

    let mut known = Vec::new();
    if let Some(name) = display_name {
        known.push(format!("The caller's name is {name}."));
    }
    if let Some(contact) = contact {
        known.push(format!("Their contact address is {contact}."));
    }
    if !known.is_empty() {
        text.push_str("\n\n");
        text.push_str(&known.join(" "));
        text.push_str(" Do not ask for these details again.");
    }
    text
}
