//! Call bridge orchestration.
//!
//! One [`BridgeOrchestrator`] owns one call from socket accept to teardown.
//! It runs three tasks:
//!
//! - **ingress**: parses telephony events, frames caller audio, transcodes it
//!   and feeds the speech session, committing on a fixed frame cadence
//! - **relay**: transcodes speech-session audio back to μ-law and writes it to
//!   the caller in paced frames
//! - **keepalive**: sends an idle heartbeat on the telephony socket
//!
//! All three share one [`CancellationToken`]. Whichever task ends first cancels
//! it, which moves the bridge to `Closing` and makes the others exit at their
//! next suspension point.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::BridgeConfig;
use super::egress::TelephonyEgress;
use super::error::BridgeError;
use super::state::{BridgeReport, BridgeState, CallBridge, CallerContext};
use crate::core::audio::{
    FrameBuffer, decode_mulaw_to_pcm16, encode_pcm16_to_mulaw, generate_tone,
};
use crate::core::realtime::{
    CommitOutcome, RealtimeConfig, ResponseOutcome, SendOutcome, SpeechEvent, SpeechSession,
};
use crate::core::telephony::{MediaPayload, StartPayload, TelephonyEvent, TelephonyRoute};

/// How long teardown waits for each task before aborting it.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Drives one call between the telephony socket and a speech session.
pub struct BridgeOrchestrator {
    bridge: Arc<CallBridge>,
    config: BridgeConfig,
    speech: Arc<SpeechSession>,
    egress: TelephonyEgress,
    cancel: CancellationToken,
}

impl BridgeOrchestrator {
    /// `outgoing` feeds the telephony socket writer.
    pub fn new(
        bridge: Arc<CallBridge>,
        config: BridgeConfig,
        realtime: RealtimeConfig,
        outgoing: mpsc::Sender<TelephonyRoute>,
    ) -> Self {
        let egress = TelephonyEgress::new(bridge.clone(), outgoing, config.egress_pacing());
        Self {
            bridge,
            config,
            speech: Arc::new(SpeechSession::new(realtime)),
            egress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn bridge(&self) -> &Arc<CallBridge> {
        &self.bridge
    }

    /// End the call when `parent` is cancelled.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Token that ends the call when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the call to completion and return its final report.
    ///
    /// `inbound` yields the telephony socket's text frames. The call ends when
    /// it yields an error or runs dry, on a `stop` event, when the speech event
    /// stream ends, or when a heartbeat cannot be written.
    pub async fn run<S>(self, inbound: S) -> BridgeReport
    where
        S: Stream<Item = Result<String, BridgeError>> + Send + Unpin + 'static,
    {
        let Self {
            bridge,
            config,
            speech,
            egress,
            cancel,
        } = self;

        info!(
            connection_id = %bridge.connection_id(),
            call_id = %bridge.call_id(),
            "Call bridge started"
        );

        let (started_tx, started_rx) = oneshot::channel();
        let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::with_capacity(3);

        let ingress = Ingress {
            bridge: bridge.clone(),
            speech: speech.clone(),
            egress: egress.clone(),
            config: config.clone(),
            buffer: FrameBuffer::new(),
            frames_since_commit: 0,
            started: Some(started_tx),
        };
        tasks.push(("ingress", tokio::spawn(ingress.run(inbound, cancel.clone()))));

        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::time::timeout(config.start_timeout(), started_rx) => {
                if result.is_err() {
                    warn!(
                        call_id = %bridge.call_id(),
                        timeout_ms = config.start_timeout_ms,
                        "No start event received, streaming without a stream SID"
                    );
                }
            }
        }

        if !cancel.is_cancelled() {
            bridge.advance(BridgeState::Streaming);
            tasks.push((
                "keepalive",
                tokio::spawn(keepalive(
                    bridge.clone(),
                    egress.clone(),
                    config.heartbeat_interval(),
                    cancel.clone(),
                )),
            ));

            let connected = tokio::select! {
                _ = cancel.cancelled() => false,
                connected = speech.connect() => connected,
            };

            if connected {
                let caller = bridge.caller().cloned().unwrap_or_default();
                if !speech
                    .configure(caller.display_name.as_deref(), caller.contact.as_deref())
                    .await
                    .is_sent()
                {
                    warn!(call_id = %bridge.call_id(), "Session configuration was not sent");
                }
                bridge.set_speech_connected(true);
                tasks.push((
                    "relay",
                    tokio::spawn(relay(
                        bridge.clone(),
                        speech.clone(),
                        egress.clone(),
                        cancel.clone(),
                    )),
                ));
            } else if !cancel.is_cancelled() {
                warn!(
                    call_id = %bridge.call_id(),
                    "Speech session unavailable, continuing telephony-only"
                );
            }
        }

        cancel.cancelled().await;
        bridge.advance(BridgeState::Closing);

        for (name, mut handle) in tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(call_id = %bridge.call_id(), task = name, "Task failed: {}", e);
                }
                Err(_) => {
                    warn!(call_id = %bridge.call_id(), task = name, "Task did not stop, aborting");
                    handle.abort();
                }
            }
        }

        speech.disconnect().await;
        egress.close().await;
        bridge.advance(BridgeState::Closed);

        let report = bridge.report();
        info!(
            call_id = %report.call_id,
            frames_ingested = report.frames_ingested,
            commits = report.commits,
            frames_relayed = report.frames_relayed,
            duration_ms = report.duration_ms,
            "Call bridge closed"
        );
        report
    }
}

/// Ingress task state. The frame buffer and commit cadence counter live
/// here, owned by the only task that touches them.
struct Ingress {
    bridge: Arc<CallBridge>,
    speech: Arc<SpeechSession>,
    egress: TelephonyEgress,
    config: BridgeConfig,
    buffer: FrameBuffer,
    frames_since_commit: u32,
    started: Option<oneshot::Sender<()>>,
}

impl Ingress {
    async fn run<S>(mut self, mut inbound: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<String, BridgeError>> + Unpin,
    {
        let _guard = cancel.clone().drop_guard();

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = inbound.next() => message,
            };

            let text = match message {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!(call_id = %self.bridge.call_id(), "Telephony socket error: {}", e);
                    break;
                }
                None => {
                    info!(call_id = %self.bridge.call_id(), "Telephony socket closed");
                    break;
                }
            };

            let event = match TelephonyEvent::parse(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Ignoring malformed telephony message: {}", e);
                    continue;
                }
            };

            match event {
                TelephonyEvent::Connected { protocol, version } => {
                    info!(?protocol, ?version, "Telephony stream connected");
                }
                TelephonyEvent::Start { start } => self.on_start(start).await,
                TelephonyEvent::Media { media } => self.on_media(media).await,
                TelephonyEvent::Mark { mark } => {
                    debug!(name = ?mark.map(|m| m.name), "Mark played");
                }
                TelephonyEvent::Stop { .. } => {
                    info!(
                        call_id = %self.bridge.call_id(),
                        stream_sid = ?self.bridge.stream_sid(),
                        "Telephony stream stopped"
                    );
                    break;
                }
                TelephonyEvent::Unknown => debug!("Ignoring unhandled telephony event"),
            }
        }
    }

    async fn on_start(&mut self, start: StartPayload) {
        let bridge = &self.bridge;

        if let Some(call_id) = start
            .custom_parameters
            .call_sid
            .clone()
            .or_else(|| start.call_sid.clone())
            .filter(|id| !id.is_empty())
        {
            bridge.set_call_id(call_id);
        }
        match start.stream_sid.clone().filter(|sid| !sid.is_empty()) {
            Some(stream_sid) => bridge.set_stream_sid(stream_sid),
            None => warn!(
                call_id = %bridge.call_id(),
                "No streamSid in start event, outbound audio is dropped until one is set"
            ),
        }

        let inbound = start.has_track("inbound");
        let outbound = start.has_track("outbound");
        bridge.set_tracks(inbound, outbound);
        if !outbound {
            warn!(
                call_id = %bridge.call_id(),
                tracks = ?start.tracks,
                "Outbound track not enabled, the caller will not hear audio"
            );
        }
        if !inbound {
            warn!(
                call_id = %bridge.call_id(),
                tracks = ?start.tracks,
                "Inbound track not enabled, no caller audio expected"
            );
        }

        let params = start.custom_parameters;
        if !bridge.set_caller(CallerContext::new(params.user_name, params.user_email)) {
            debug!("Caller context already set, keeping the first one");
        }

        info!(
            call_id = %bridge.call_id(),
            stream_sid = ?bridge.stream_sid(),
            caller = ?bridge.caller().and_then(|c| c.display_name.as_deref()),
            "Media stream started"
        );

        if let Some(started) = self.started.take() {
            let _ = started.send(());
        }

        if let Err(e) = self.egress.clear().await {
            warn!("Failed to clear provider playback buffer: {}", e);
        }

        let tone = &self.config.test_tone;
        if tone.enabled {
            let audio = generate_tone(tone.duration_ms, tone.frequency_hz);
            match self.egress.send_audio(&audio).await {
                Ok(frames) => {
                    bridge.stats().add_tone_frames(frames);
                    debug!(frames, "Sent test tone");
                }
                Err(e) => warn!("Failed to send test tone: {}", e),
            }
        }
    }

    async fn on_media(&mut self, media: MediaPayload) {
        let Self {
            bridge,
            speech,
            config,
            buffer,
            frames_since_commit,
            ..
        } = self;

        bridge.stats().record_media_message();
        let mulaw = match media.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Ignoring media with invalid base64 payload: {}", e);
                return;
            }
        };
        buffer.append(&mulaw);

        for frame in buffer.drain_frames() {
            // Until the session is configured, audio would reach it ahead of session.update.
            if !bridge.speech_connected() {
                bridge.stats().record_frame_not_sent();
                continue;
            }
            let pcm = decode_mulaw_to_pcm16(frame.as_bytes());
            match speech.ingest(&pcm).await {
                SendOutcome::Sent => {
                    bridge.stats().record_frame_ingested();
                    *frames_since_commit += 1;
                }
                SendOutcome::NotSent => {
                    bridge.stats().record_frame_not_sent();
                    trace!("Frame not sent to speech session");
                    continue;
                }
            }

            if *frames_since_commit < config.commit_every_frames {
                continue;
            }

            match speech.commit().await {
                CommitOutcome::Committed => {
                    *frames_since_commit = 0;
                    bridge.stats().record_commit();
                    match speech.request_response().await {
                        ResponseOutcome::Sent => bridge.stats().record_response_requested(),
                        ResponseOutcome::Queued => debug!("Response request queued"),
                        ResponseOutcome::NotSent => warn!("Response request was not sent"),
                    }
                }
                CommitOutcome::Skipped => {
                    bridge.stats().record_commit_skipped();
                }
                CommitOutcome::NotSent => {
                    warn!(
                        frames = *frames_since_commit,
                        "Commit not sent, keeping frames for the next attempt"
                    );
                }
            }
        }
    }
}

/// Relay speech-session audio to the caller until the event stream ends.
async fn relay(
    bridge: Arc<CallBridge>,
    speech: Arc<SpeechSession>,
    egress: TelephonyEgress,
    cancel: CancellationToken,
) {
    let _guard = cancel.clone().drop_guard();

    let Some(events) = speech.events() else {
        warn!("Speech event stream unavailable");
        return;
    };
    futures::pin_mut!(events);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.next() => event,
        };

        match event {
            Some(SpeechEvent::Audio(pcm)) => {
                let mulaw = encode_pcm16_to_mulaw(&pcm);
                match egress.send_audio(&mulaw).await {
                    Ok(frames) => {
                        bridge.stats().add_frames_relayed(frames);
                        trace!(pcm_bytes = pcm.len(), frames, "Relayed assistant audio");
                    }
                    Err(e) => {
                        warn!(call_id = %bridge.call_id(), "Relay stopped: {}", e);
                        break;
                    }
                }
            }
            Some(SpeechEvent::Transcript(text)) => debug!(transcript = %text, "Assistant"),
            Some(SpeechEvent::SpeechStarted) => debug!("Caller started speaking"),
            Some(SpeechEvent::SpeechStopped) => debug!("Caller stopped speaking"),
            Some(SpeechEvent::Done) => debug!("Response finished"),
            Some(SpeechEvent::Error(detail)) => {
                warn!(call_id = %bridge.call_id(), "Speech session error: {}", detail);
            }
            None => {
                info!(call_id = %bridge.call_id(), "Speech session ended");
                break;
            }
        }
    }
}

/// Write a heartbeat every `period` until cancelled or the socket is gone.
async fn keepalive(
    bridge: Arc<CallBridge>,
    egress: TelephonyEgress,
    period: Duration,
    cancel: CancellationToken,
) {
    let _guard = cancel.clone().drop_guard();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = egress.heartbeat().await {
                    warn!(call_id = %bridge.call_id(), "Heartbeat failed: {}", e);
                    break;
                }
                bridge.stats().record_heartbeat();
                debug!("Sent heartbeat");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::ToneConfig;
    use crate::core::telephony::OutgoingMessage;
    use base64::prelude::*;
    use futures::channel::mpsc as fmpsc;

    fn quiet_config() -> BridgeConfig {
        BridgeConfig {
            start_timeout_ms: 200,
            egress_pacing_ms: 0,
            test_tone: ToneConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn orchestrator(
        config: BridgeConfig,
    ) -> (BridgeOrchestrator, mpsc::Receiver<TelephonyRoute>) {
        let (tx, rx) = mpsc::channel(256);
        let bridge = Arc::new(CallBridge::new(None));
        (
            BridgeOrchestrator::new(bridge, config, RealtimeConfig::default(), tx),
            rx,
        )
    }

    fn start_event(stream_sid: &str) -> String {
        serde_json::json!({
            "event": "start",
            "start": {
                "streamSid": stream_sid,
                "callSid": "CA1",
                "tracks": ["inbound", "outbound"],
                "customParameters": {"userName": "Alex"}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_stop_before_media() {
        let (orchestrator, _rx) = orchestrator(quiet_config());
        let (tx, rx) = fmpsc::unbounded();
        tx.unbounded_send(Ok(start_event("MZ1"))).expect("send");
        tx.unbounded_send(Ok(r#"{"event":"stop"}"#.to_string()))
            .expect("send");

        let report = orchestrator.run(rx).await;
        assert_eq!(report.state, BridgeState::Closed);
        assert_eq!(report.call_id, "CA1");
        assert_eq!(report.frames_ingested, 0);
        assert_eq!(report.commits, 0);
        assert!(!report.speech_connected);
    }

    #[tokio::test]
    async fn test_start_without_stream_sid_keeps_metadata() {
        let (orchestrator, mut out) = orchestrator(BridgeConfig {
            test_tone: ToneConfig::default(),
            ..quiet_config()
        });
        let bridge = orchestrator.bridge().clone();
        let (tx, rx) = fmpsc::unbounded();
        let start = serde_json::json!({
            "event": "start",
            "start": {
                "callSid": "CA9",
                "tracks": ["inbound", "outbound"],
                "customParameters": {"userName": "Alex", "callSid": "CA9"}
            }
        });
        tx.unbounded_send(Ok(start.to_string())).expect("send");
        tx.unbounded_send(Ok(r#"{"event":"stop"}"#.to_string()))
            .expect("send");

        let report = orchestrator.run(rx).await;
        assert_eq!(report.call_id, "CA9");
        assert!(report.stream_sid.is_none());
        assert!(report.inbound_enabled);
        assert!(report.outbound_enabled);
        assert_eq!(report.tone_frames, 0);

        let caller = bridge.caller().expect("caller context");
        assert_eq!(caller.display_name.as_deref(), Some("Alex"));

        // No clear or audio without a stream SID, only the close
        assert!(matches!(out.recv().await, Some(TelephonyRoute::Close)));
    }

    #[tokio::test]
    async fn test_socket_error_ends_call() {
        let (orchestrator, _rx) = orchestrator(quiet_config());
        let (tx, rx) = fmpsc::unbounded();
        tx.unbounded_send(Err(BridgeError::Transport("reset".to_string())))
            .expect("send");

        let report = orchestrator.run(rx).await;
        assert_eq!(report.state, BridgeState::Closed);
        assert!(report.stream_sid.is_none());
    }

    #[tokio::test]
    async fn test_media_without_speech_session_is_not_counted() {
        let (orchestrator, mut out) = orchestrator(BridgeConfig {
            test_tone: ToneConfig::default(),
            ..quiet_config()
        });
        let (tx, rx) = fmpsc::unbounded();
        tx.unbounded_send(Ok("garbage".to_string())).expect("send");
        tx.unbounded_send(Ok(start_event("MZ2"))).expect("send");

        let media = serde_json::json!({
            "event": "media",
            "media": {"payload": BASE64_STANDARD.encode([0x10u8; 400])}
        });
        tx.unbounded_send(Ok(media.to_string())).expect("send");
        tx.unbounded_send(Ok(r#"{"event":"stop"}"#.to_string()))
            .expect("send");

        let report = orchestrator.run(rx).await;
        assert_eq!(report.media_messages, 1);
        assert_eq!(report.frames_ingested, 0);
        assert_eq!(report.frames_not_sent, 2);
        assert_eq!(report.tone_frames, 15);

        assert!(matches!(
            out.recv().await,
            Some(TelephonyRoute::Outgoing(OutgoingMessage::Clear { .. }))
        ));
        let mut media_frames = 0;
        while let Some(route) = out.recv().await {
            match route {
                TelephonyRoute::Outgoing(OutgoingMessage::Media { .. }) => media_frames += 1,
                TelephonyRoute::Close => break,
                _ => {}
            }
        }
        assert_eq!(media_frames, 15);
    }

    #[tokio::test]
    async fn test_start_timeout_is_not_fatal() {
        let (orchestrator, mut out) = orchestrator(quiet_config());
        let bridge = orchestrator.bridge().clone();
        let (tx, rx) = fmpsc::unbounded::<Result<String, BridgeError>>();

        let handle = tokio::spawn(orchestrator.run(rx));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(bridge.state(), BridgeState::Streaming);

        drop(tx);
        let report = handle.await.expect("join");
        assert_eq!(report.state, BridgeState::Closed);
        assert!(matches!(out.recv().await, Some(TelephonyRoute::Close)));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let (orchestrator, _out) = orchestrator(quiet_config());
        let cancel = orchestrator.cancellation_token();
        let (_tx, rx) = fmpsc::unbounded::<Result<String, BridgeError>>();

        let handle = tokio::spawn(orchestrator.run(rx));
        cancel.cancel();
        let report = handle.await.expect("join");
        assert_eq!(report.state, BridgeState::Closed);
    }

    #[tokio::test]
    async fn test_parent_cancellation_ends_call() {
        let parent = CancellationToken::new();
        let (orchestrator, mut out) = orchestrator(quiet_config());
        let orchestrator = orchestrator.with_parent_token(&parent);
        let (tx, rx) = fmpsc::unbounded();
        tx.unbounded_send(Ok(start_event("MZ3"))).expect("send");

        let handle = tokio::spawn(orchestrator.run(rx));
        parent.cancel();
        let report = handle.await.expect("join");
        assert_eq!(report.state, BridgeState::Closed);

        let mut closed = false;
        while let Some(route) = out.recv().await {
            closed |= matches!(route, TelephonyRoute::Close);
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_call_end_leaves_parent_running() {
        let parent = CancellationToken::new();
        let (orchestrator, _out) = orchestrator(quiet_config());
        let orchestrator = orchestrator.with_parent_token(&parent);
        let (tx, rx) = fmpsc::unbounded();
        tx.unbounded_send(Ok(r#"{"event":"stop"}"#.to_string()))
            .expect("send");

        orchestrator.run(rx).await;
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_sends_heartbeats() {
        let bridge = Arc::new(CallBridge::new(None));
        let (tx, mut rx) = mpsc::channel(8);
        let egress = TelephonyEgress::new(bridge.clone(), tx, Duration::ZERO);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(keepalive(
            bridge.clone(),
            egress,
            Duration::from_secs(30),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        cancel.cancel();
        task.await.expect("join");

        assert_eq!(bridge.stats().heartbeats_sent(), 2);
        assert!(matches!(
            rx.try_recv(),
            Ok(TelephonyRoute::Outgoing(OutgoingMessage::Heartbeat { .. }))
        ));
    }

    #[tokio::test]
    async fn test_failed_heartbeat_cancels_call() {
        let bridge = Arc::new(CallBridge::new(None));
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let egress = TelephonyEgress::new(bridge.clone(), tx, Duration::ZERO);
        let cancel = CancellationToken::new();

        keepalive(bridge.clone(), egress, Duration::from_millis(5), cancel.clone()).await;
        assert!(cancel.is_cancelled());
        assert_eq!(bridge.stats().heartbeats_sent(), 0);
    }
}
