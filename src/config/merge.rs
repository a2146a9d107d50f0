//! Merging configuration sources.
//!
//! Defaults are overlaid first by environment variables, then by the YAML file.

use super::ServerConfig;
use super::env;
use super::yaml::{BridgeYaml, RealtimeYaml, ServerYaml, YamlConfig};
use crate::core::bridge::BridgeConfig;
use crate::core::realtime::{InputTranscriptionConfig, RealtimeConfig, TurnDetectionConfig};

/// Build the final configuration: defaults < environment < YAML.
pub(super) fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();
    apply(&mut config, env::load()?);
    if let Some(yaml) = yaml_config {
        apply(&mut config, yaml);
    }
    Ok(config)
}

fn apply(config: &mut ServerConfig, overrides: YamlConfig) {
    if let Some(server) = overrides.server {
        apply_server(config, server);
    }
    if let Some(realtime) = overrides.realtime {
        apply_realtime(&mut config.realtime, realtime);
    }
    if let Some(bridge) = overrides.bridge {
        apply_bridge(&mut config.bridge, bridge);
    }
}

fn apply_server(config: &mut ServerConfig, server: ServerYaml) {
    if let Some(host) = server.host {
        config.host = host;
    }
    if let Some(port) = server.port {
        config.port = port;
    }
}

fn apply_realtime(config: &mut RealtimeConfig, realtime: RealtimeYaml) {
    if let Some(api_key) = realtime.api_key {
        config.api_key = api_key;
    }
    if let Some(url) = realtime.url {
        config.url = url;
    }
    if let Some(model) = realtime.model {
        config.model = model;
    }
    if let Some(voice) = realtime.voice {
        config.voice = voice;
    }
    if let Some(instructions) = realtime.instructions {
        config.instructions = instructions;
    }
    if let Some(temperature) = realtime.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = realtime.max_response_output_tokens {
        config.max_response_output_tokens = max_tokens;
    }
    if let Some(model) = realtime.transcription_model {
        let model = model.trim();
        config.input_audio_transcription =
            if model.is_empty() || model.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(InputTranscriptionConfig {
                    model: model.to_string(),
                })
            };
    }
    if let Some(timeout) = realtime.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }

    if realtime.vad_threshold.is_some()
        || realtime.vad_prefix_padding_ms.is_some()
        || realtime.vad_silence_duration_ms.is_some()
    {
        if config.turn_detection == TurnDetectionConfig::None {
            config.turn_detection = TurnDetectionConfig::default();
        }
        if let TurnDetectionConfig::ServerVad {
            threshold,
            prefix_padding_ms,
            silence_duration_ms,
        } = &mut config.turn_detection
        {
            if let Some(value) = realtime.vad_threshold {
                *threshold = value;
            }
            if let Some(value) = realtime.vad_prefix_padding_ms {
                *prefix_padding_ms = value;
            }
            if let Some(value) = realtime.vad_silence_duration_ms {
                *silence_duration_ms = value;
            }
        }
    }
}

fn apply_bridge(config: &mut BridgeConfig, bridge: BridgeYaml) {
    if let Some(timeout) = bridge.start_timeout_ms {
        config.start_timeout_ms = timeout;
    }
    if let Some(interval) = bridge.heartbeat_interval_secs {
        config.heartbeat_interval_secs = interval;
    }
    if let Some(frames) = bridge.commit_every_frames {
        config.commit_every_frames = frames;
    }
    if let Some(pacing) = bridge.egress_pacing_ms {
        config.egress_pacing_ms = pacing;
    }
    if let Some(enabled) = bridge.test_tone_enabled {
        config.test_tone.enabled = enabled;
    }
    if let Some(duration) = bridge.test_tone_duration_ms {
        config.test_tone.duration_ms = duration;
    }
    if let Some(frequency) = bridge.test_tone_frequency_hz {
        config.test_tone.frequency_hz = frequency;
    }
}
