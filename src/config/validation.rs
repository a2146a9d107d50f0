//! Configuration validation.

use url::Url;

use super::ServerConfig;
use crate::core::audio::TELEPHONY_SAMPLE_RATE;
use crate::core::realtime::TurnDetectionConfig;

/// Check the merged configuration before the server starts.
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.port == 0 {
        return Err("PORT must be non-zero".into());
    }

    validate_realtime_url(&config.realtime.url)?;

    if let TurnDetectionConfig::ServerVad { threshold, .. } = config.realtime.turn_detection
        && !(0.0..=1.0).contains(&threshold)
    {
        return Err(format!("VAD threshold must be within [0, 1], got {threshold}").into());
    }

    let bridge = &config.bridge;
    if bridge.start_timeout_ms == 0 {
        return Err("Bridge start timeout must be greater than zero".into());
    }
    if bridge.heartbeat_interval_secs == 0 {
        return Err("Bridge heartbeat interval must be greater than zero".into());
    }
    if bridge.commit_every_frames == 0 {
        return Err("Bridge commit cadence must be at least one frame".into());
    }

    let nyquist = (TELEPHONY_SAMPLE_RATE / 2) as f32;
    let frequency = bridge.test_tone.frequency_hz;
    if !(frequency > 0.0 && frequency < nyquist) {
        return Err(format!(
            "Test tone frequency must be between 0 and {nyquist} Hz, got {frequency}"
        )
        .into());
    }

    Ok(())
}

fn validate_realtime_url(raw: &str) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(raw).map_err(|e| format!("Invalid realtime URL '{raw}': {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(format!("Realtime URL must use ws or wss, got '{scheme}'").into()),
    }
}
