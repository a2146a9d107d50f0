//! Shared per-call state.
//!
//! Each field has a single writer. The ingress task sets identifiers, track
//! flags and caller context. The orchestrator drives the lifecycle state.
//! Counters are atomics so any task can bump its own without a lock.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a call bridge. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    AwaitingStart,
    Streaming,
    Closing,
    Closed,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::AwaitingStart => write!(f, "awaiting_start"),
            BridgeState::Streaming => write!(f, "streaming"),
            BridgeState::Closing => write!(f, "closing"),
            BridgeState::Closed => write!(f, "closed"),
        }
    }
}

/// Optional caller details supplied by the call webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallerContext {
    pub display_name: Option<String>,
    pub contact: Option<String>,
}

impl CallerContext {
    pub fn new(display_name: Option<String>, contact: Option<String>) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            display_name: clean(display_name),
            contact: clean(contact),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.contact.is_none()
    }
}

#[derive(Debug, Default)]
pub struct BridgeStats {
    media_messages: AtomicU64,
    frames_ingested: AtomicU64,
    frames_not_sent: AtomicU64,
    commits: AtomicU64,
    commits_skipped: AtomicU64,
    responses_requested: AtomicU64,
    frames_relayed: AtomicU64,
    tone_frames: AtomicU64,
    heartbeats_sent: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $get:ident) => {
        #[inline]
        pub fn $record(&self) {
            self.$get.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        pub fn $get(&self) -> u64 {
            self.$get.load(Ordering::Relaxed)
        }
    };
}

impl BridgeStats {
    counter!(record_media_message, media_messages);
    counter!(record_frame_ingested, frames_ingested);
    counter!(record_frame_not_sent, frames_not_sent);
    counter!(record_commit, commits);
    counter!(record_commit_skipped, commits_skipped);
    counter!(record_response_requested, responses_requested);
    counter!(record_heartbeat, heartbeats_sent);

    pub fn add_frames_relayed(&self, n: usize) {
        self.frames_relayed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    pub fn add_tone_frames(&self, n: usize) {
        self.tone_frames.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn tone_frames(&self) -> u64 {
        self.tone_frames.load(Ordering::Relaxed)
    }
}

/// One active call between the telephony socket and a speech session.
#[derive(Debug)]
pub struct CallBridge {
    connection_id: Uuid,
    call_id: RwLock<String>,
    stream_sid: RwLock<Option<String>>,
    caller: OnceLock<CallerContext>,
    inbound_enabled: AtomicBool,
    outbound_enabled: AtomicBool,
    speech_connected: AtomicBool,
    state: RwLock<BridgeState>,
    stats: BridgeStats,
    created_at: Instant,
}

impl CallBridge {
    /// Create a bridge for a freshly accepted connection.
    ///
    /// Without a call id from the connection URL, the connection id stands
    /// in until the `start` event supplies one.
    pub fn new(call_id: Option<String>) -> Self {
        let connection_id = Uuid::new_v4();
        let call_id = call_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| connection_id.to_string());

        Self {
            connection_id,
            call_id: RwLock::new(call_id),
            stream_sid: RwLock::new(None),
            caller: OnceLock::new(),
            inbound_enabled: AtomicBool::new(false),
            outbound_enabled: AtomicBool::new(false),
            speech_connected: AtomicBool::new(false),
            state: RwLock::new(BridgeState::AwaitingStart),
            stats: BridgeStats::default(),
            created_at: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn call_id(&self) -> String {
        self.call_id.read().clone()
    }

    pub fn set_call_id(&self, call_id: String) {
        *self.call_id.write() = call_id;
    }

    /// Stream SID, once the `start` event has been seen.
    pub fn stream_sid(&self) -> Option<String> {
        self.stream_sid.read().clone()
    }

    pub fn set_stream_sid(&self, stream_sid: String) {
        *self.stream_sid.write() = Some(stream_sid);
    }

    /// Caller context, if a `start` event supplied one.
    pub fn caller(&self) -> Option<&CallerContext> {
        self.caller.get()
    }

    /// Record the caller context. Later calls are ignored.
    pub fn set_caller(&self, caller: CallerContext) -> bool {
        self.caller.set(caller).is_ok()
    }

    pub fn set_tracks(&self, inbound: bool, outbound: bool) {
        self.inbound_enabled.store(inbound, Ordering::Release);
        self.outbound_enabled.store(outbound, Ordering::Release);
    }

    pub fn inbound_enabled(&self) -> bool {
        self.inbound_enabled.load(Ordering::Acquire)
    }

    pub fn outbound_enabled(&self) -> bool {
        self.outbound_enabled.load(Ordering::Acquire)
    }

    pub fn set_speech_connected(&self, connected: bool) {
        self.speech_connected.store(connected, Ordering::Release);
    }

    pub fn speech_connected(&self) -> bool {
        self.speech_connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// Move to `next` if it is ahead of the current state.
    pub fn advance(&self, next: BridgeState) -> bool {
        let mut state = self.state.write();
        let current = *state;
        if next <= current {
            return false;
        }
        tracing::debug!(
            connection_id = %self.connection_id,
            from = %current,
            to = %next,
            "Bridge state change"
        );
        *state = next;
        true
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn report(&self) -> BridgeReport {
        BridgeReport {
            connection_id: self.connection_id,
            call_id: self.call_id(),
            stream_sid: self.stream_sid(),
            state: self.state(),
            speech_connected: self.speech_connected(),
            inbound_enabled: self.inbound_enabled(),
            outbound_enabled: self.outbound_enabled(),
            media_messages: self.stats.media_messages(),
            frames_ingested: self.stats.frames_ingested(),
            frames_not_sent: self.stats.frames_not_sent(),
            commits: self.stats.commits(),
            commits_skipped: self.stats.commits_skipped(),
            responses_requested: self.stats.responses_requested(),
            frames_relayed: self.stats.frames_relayed(),
            tone_frames: self.stats.tone_frames(),
            heartbeats_sent: self.stats.heartbeats_sent(),
            duration_ms: self.created_at.elapsed().as_millis() as u64,
        }
    }
}

/// Point-in-time view of a bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeReport {
    pub connection_id: Uuid,
    pub call_id: String,
    pub stream_sid: Option<String>,
    pub state: BridgeState,
    pub speech_connected: bool,
    pub inbound_enabled: bool,
    pub outbound_enabled: bool,
    pub media_messages: u64,
    pub frames_ingested: u64,
    pub frames_not_sent: u64,
    pub commits: u64,
    pub commits_skipped: u64,
    pub responses_requested: u64,
    pub frames_relayed: u64,
    pub tone_frames: u64,
    pub heartbeats_sent: u64,
    pub duration_ms: u64,
}
