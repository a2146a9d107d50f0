//! End-to-end call scenarios
//!
//! Each test drives a [`BridgeOrchestrator`] with scripted telephony events and
//! a local mock of the speech API, then checks what reached the caller.

mod mock_realtime;

use std::sync::Arc;
use std::time::Duration;

use base64::prelude::*;
use futures::channel::mpsc as fmpsc;
use serde_json::json;
use tokio::sync::mpsc;

use callbridge_gateway::core::audio::{FRAME_SIZE, MULAW_SILENCE};
use callbridge_gateway::core::bridge::{
    BridgeConfig, BridgeError, BridgeOrchestrator, BridgeState, CallBridge, ToneConfig,
};
use callbridge_gateway::core::realtime::RealtimeConfig;
use callbridge_gateway::core::telephony::{OutgoingMessage, TelephonyRoute};

use mock_realtime::{MockBehavior, MockRealtime, types};

type Inbound = fmpsc::UnboundedSender<Result<String, BridgeError>>;

fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        start_timeout_ms: 1000,
        egress_pacing_ms: 0,
        ..Default::default()
    }
}

fn realtime_config(url: &str) -> RealtimeConfig {
    RealtimeConfig {
        api_key: "sk-test".to_string(),
        url: url.to_string(),
        connect_timeout_ms: 2000,
        ..Default::default()
    }
}

fn orchestrator(
    bridge: BridgeConfig,
    realtime: RealtimeConfig,
) -> (BridgeOrchestrator, Arc<CallBridge>, mpsc::Receiver<TelephonyRoute>) {
    let (tx, rx) = mpsc::channel(1024);
    let call = Arc::new(CallBridge::new(None));
    (
        BridgeOrchestrator::new(call.clone(), bridge, realtime, tx),
        call,
        rx,
    )
}

fn send(inbound: &Inbound, event: serde_json::Value) {
    inbound.unbounded_send(Ok(event.to_string())).unwrap();
}

fn start(inbound: &Inbound) {
    send(
        inbound,
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": "MZ100",
                "callSid": "CA100",
                "tracks": ["inbound", "outbound"],
                "customParameters": {"userName": "Alex", "userEmail": "alex@example.com"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ100"
        }),
    );
}

fn media(inbound: &Inbound, mulaw: &[u8]) {
    send(
        inbound,
        json!({
            "event": "media",
            "streamSid": "MZ100",
            "media": {"track": "inbound", "payload": BASE64_STANDARD.encode(mulaw)}
        }),
    );
}

fn stop(inbound: &Inbound) {
    send(inbound, json!({"event": "stop", "stop": {"callSid": "CA100"}}));
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Everything written to the caller, up to and including the close request.
async fn collect_outgoing(
    rx: &mut mpsc::Receiver<TelephonyRoute>,
) -> (Vec<OutgoingMessage>, bool) {
    let mut messages = Vec::new();
    while let Ok(Some(route)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        match route {
            TelephonyRoute::Outgoing(message) => messages.push(message),
            TelephonyRoute::Close => return (messages, true),
        }
    }
    (messages, false)
}

fn media_frames(messages: &[OutgoingMessage]) -> Vec<Vec<u8>> {
    messages
        .iter()
        .filter_map(|message| match message {
            OutgoingMessage::Media { stream_sid, media } => {
                assert_eq!(stream_sid, "MZ100");
                Some(BASE64_STANDARD.decode(&media.payload).unwrap())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_happy_path_relays_assistant_audio() {
    // 1440 samples at 24 kHz decimate to 480 μ-law bytes, i.e. three frames
    let reply: Vec<u8> = std::iter::repeat_n(1000i16.to_le_bytes(), 1440)
        .flatten()
        .collect();
    let mut mock = MockRealtime::start(MockBehavior::Reply { pcm: reply }).await;

    let (orchestrator, call, mut out) = orchestrator(bridge_config(), realtime_config(&mock.url));
    let (inbound, rx) = fmpsc::unbounded();
    let run = tokio::spawn(orchestrator.run(rx));

    start(&inbound);
    wait_until("speech session", || call.speech_connected()).await;

    for _ in 0..10 {
        media(&inbound, &[0x10; FRAME_SIZE]);
    }
    wait_until("relayed audio", || call.stats().frames_relayed() >= 3).await;
    stop(&inbound);

    let report = run.await.unwrap();
    assert_eq!(report.state, BridgeState::Closed);
    assert_eq!(report.call_id, "CA100");
    assert_eq!(report.stream_sid.as_deref(), Some("MZ100"));
    assert!(report.speech_connected);
    assert_eq!(report.media_messages, 10);
    assert_eq!(report.frames_ingested, 10);
    assert_eq!(report.frames_not_sent, 0);
    assert_eq!(report.commits, 1);
    assert_eq!(report.responses_requested, 1);
    assert_eq!(report.tone_frames, 15);
    assert_eq!(report.frames_relayed, 3);

    let (messages, closed) = collect_outgoing(&mut out).await;
    assert!(closed);
    assert!(matches!(
        &messages[0],
        OutgoingMessage::Clear { stream_sid } if stream_sid == "MZ100"
    ));
    let frames = media_frames(&messages);
    assert_eq!(frames.len(), 18);
    assert!(frames.iter().all(|frame| frame.len() == FRAME_SIZE));
    assert!(frames[15..].iter().flatten().all(|b| *b != MULAW_SILENCE));

    assert_eq!(mock.authorization.lock().as_deref(), Some("Bearer sk-test"));
    let events = mock.wait_for("response.create", 1).await;
    let kinds = types(&events);
    assert_eq!(kinds[0], "session.update");
    assert_eq!(
        kinds.iter().filter(|k| **k == "input_audio_buffer.append").count(),
        10
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == "input_audio_buffer.commit").count(),
        1
    );
    assert_eq!(kinds.iter().filter(|k| **k == "response.create").count(), 1);

    let session = &events[0]["session"];
    assert_eq!(session["voice"], "echo");
    assert_eq!(session["input_audio_format"], "pcm16");
    assert_eq!(session["turn_detection"]["type"], "server_vad");
    let instructions = session["instructions"].as_str().unwrap();
    assert!(instructions.contains("Alex"));
    assert!(instructions.contains("alex@example.com"));

    let response = events
        .iter()
        .find(|event| event["type"] == "response.create")
        .unwrap();
    assert_eq!(response["response"]["modalities"], json!(["audio", "text"]));
}

#[tokio::test]
async fn test_early_hangup_closes_cleanly() {
    let (orchestrator, _call, mut out) =
        orchestrator(bridge_config(), RealtimeConfig::default());
    let (inbound, rx) = fmpsc::unbounded();

    send(&inbound, json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}));
    start(&inbound);
    stop(&inbound);

    let report = orchestrator.run(rx).await;
    assert_eq!(report.state, BridgeState::Closed);
    assert_eq!(report.media_messages, 0);
    assert_eq!(report.frames_ingested, 0);
    assert_eq!(report.commits, 0);
    assert_eq!(report.responses_requested, 0);

    let (_, closed) = collect_outgoing(&mut out).await;
    assert!(closed);
}

#[tokio::test]
async fn test_unreachable_speech_api_keeps_telephony_path() {
    let (orchestrator, call, mut out) =
        orchestrator(bridge_config(), realtime_config("ws://127.0.0.1:1"));
    let (inbound, rx) = fmpsc::unbounded();
    let run = tokio::spawn(orchestrator.run(rx));

    start(&inbound);
    wait_until("streaming", || call.state() == BridgeState::Streaming).await;
    for _ in 0..12 {
        media(&inbound, &[0x22; FRAME_SIZE]);
    }
    stop(&inbound);

    let report = run.await.unwrap();
    assert_eq!(report.state, BridgeState::Closed);
    assert!(!report.speech_connected);
    assert_eq!(report.frames_ingested, 0);
    assert_eq!(report.frames_not_sent, 12);
    assert_eq!(report.commits, 0);
    assert_eq!(report.frames_relayed, 0);

    let (messages, closed) = collect_outgoing(&mut out).await;
    assert!(closed);
    let frames = media_frames(&messages);
    assert_eq!(frames.len(), 15);
    assert_eq!(report.tone_frames, 15);
}

#[tokio::test]
async fn test_speech_session_drop_ends_call() {
    let mock = MockRealtime::start(MockBehavior::DropAfterSession).await;
    let config = BridgeConfig {
        test_tone: ToneConfig {
            enabled: false,
            ..Default::default()
        },
        ..bridge_config()
    };
    let (orchestrator, _call, mut out) = orchestrator(config, realtime_config(&mock.url));
    let (inbound, rx) = fmpsc::unbounded();

    start(&inbound);
    let report = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(rx))
        .await
        .expect("call should end when the speech session drops");

    assert_eq!(report.state, BridgeState::Closed);
    assert!(report.speech_connected);
    let (_, closed) = collect_outgoing(&mut out).await;
    assert!(closed);
    drop(inbound);
}

#[tokio::test]
async fn test_partial_frames_carry_across_messages() {
    let mut mock = MockRealtime::start(MockBehavior::Reply { pcm: Vec::new() }).await;
    let config = BridgeConfig {
        commit_every_frames: 100,
        test_tone: ToneConfig {
            enabled: false,
            ..Default::default()
        },
        ..bridge_config()
    };
    let (orchestrator, call, _out) = orchestrator(config, realtime_config(&mock.url));
    let (inbound, rx) = fmpsc::unbounded();
    let run = tokio::spawn(orchestrator.run(rx));

    start(&inbound);
    wait_until("speech session", || call.speech_connected()).await;

    // 100 + 100 + 130 bytes: two whole frames, 10 bytes left over
    media(&inbound, &[0x30; 100]);
    media(&inbound, &[0x30; 100]);
    media(&inbound, &[0x30; 130]);
    wait_until("two frames", || call.stats().frames_ingested() == 2).await;
    stop(&inbound);

    let report = run.await.unwrap();
    assert_eq!(report.media_messages, 3);
    assert_eq!(report.frames_ingested, 2);
    assert_eq!(report.commits, 0);

    let events = mock.wait_for("input_audio_buffer.append", 2).await;
    let appended: Vec<_> = events
        .iter()
        .filter(|event| event["type"] == "input_audio_buffer.append")
        .map(|event| BASE64_STANDARD.decode(event["audio"].as_str().unwrap()).unwrap())
        .collect();
    assert_eq!(appended.len(), 2);
    // 160 μ-law bytes upsample to 480 PCM16 samples
    assert!(appended.iter().all(|pcm| pcm.len() == 960));
}
