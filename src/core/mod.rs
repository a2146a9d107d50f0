pub mod audio;
pub mod bridge;
pub mod realtime;
pub mod telephony;

pub use bridge::{BridgeConfig, BridgeOrchestrator, CallBridge, CallRegistry};
pub use realtime::{RealtimeConfig, SpeechEvent, SpeechSession};
