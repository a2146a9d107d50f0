//! Per-call bridge settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and pacing knobs for one call bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long to wait for the `start` event before streaming anyway
    pub start_timeout_ms: u64,
    /// Interval between idle heartbeats on the telephony socket
    pub heartbeat_interval_secs: u64,
    /// Successfully ingested frames between commit attempts
    pub commit_every_frames: u32,
    /// Delay after each 160-byte frame written to the telephony socket
    pub egress_pacing_ms: u64,
    pub test_tone: ToneConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5000,
            heartbeat_interval_secs: 30,
            commit_every_frames: 10,
            egress_pacing_ms: 1,
            test_tone: ToneConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn egress_pacing(&self) -> Duration {
        Duration::from_millis(self.egress_pacing_ms)
    }
}

/// Diagnostic tone played when the stream starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub enabled: bool,
    pub duration_ms: u32,
    pub frequency_hz: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ms: 300,
            frequency_hz: 440.0,
        }
    }
}
