//! Environment variable loading.
//!
//! Variables are read into the same override shape as the YAML file so both
//! sources merge the same way.

use std::env;
use std::str::FromStr;

use super::yaml::{BridgeYaml, RealtimeYaml, ServerYaml, YamlConfig};

type EnvResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read a variable, treating unset and empty values as absent.
fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable.
fn parse<T>(name: &str) -> EnvResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} ('{raw}'): {e}").into()),
        None => Ok(None),
    }
}

fn parse_bool(name: &str) -> EnvResult<Option<bool>> {
    match var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid boolean for {name}: '{raw}'").into()),
        },
        None => Ok(None),
    }
}

/// Collect every recognised variable from the process environment.
pub(super) fn load() -> EnvResult<YamlConfig> {
    Ok(YamlConfig {
        server: Some(ServerYaml {
            host: var("HOST"),
            port: parse("PORT")?,
        }),
        realtime: Some(RealtimeYaml {
            api_key: var("OPENAI_API_KEY"),
            url: var("OPENAI_REALTIME_URL"),
            model: var("OPENAI_REALTIME_MODEL"),
            voice: var("OPENAI_REALTIME_VOICE"),
            instructions: var("REALTIME_INSTRUCTIONS"),
            temperature: parse("REALTIME_TEMPERATURE")?,
            max_response_output_tokens: parse("REALTIME_MAX_RESPONSE_TOKENS")?,
            transcription_model: var("REALTIME_TRANSCRIPTION_MODEL"),
            vad_threshold: parse("REALTIME_VAD_THRESHOLD")?,
            vad_prefix_padding_ms: parse("REALTIME_VAD_PREFIX_PADDING_MS")?,
            vad_silence_duration_ms: parse("REALTIME_VAD_SILENCE_DURATION_MS")?,
            connect_timeout_ms: parse("REALTIME_CONNECT_TIMEOUT_MS")?,
        }),
        bridge: Some(BridgeYaml {
            start_timeout_ms: parse("BRIDGE_START_TIMEOUT_MS")?,
            heartbeat_interval_secs: parse("BRIDGE_HEARTBEAT_INTERVAL_SECS")?,
            commit_every_frames: parse("BRIDGE_COMMIT_EVERY_FRAMES")?,
            egress_pacing_ms: parse("BRIDGE_EGRESS_PACING_MS")?,
            test_tone_enabled: parse_bool("BRIDGE_TEST_TONE_ENABLED")?,
            test_tone_duration_ms: parse("BRIDGE_TEST_TONE_DURATION_MS")?,
            test_tone_frequency_hz: parse("BRIDGE_TEST_TONE_FREQUENCY_HZ")?,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup() {
        unsafe {
            for name in [
                "PORT",
                "OPENAI_API_KEY",
                "REALTIME_TEMPERATURE",
                "BRIDGE_TEST_TONE_ENABLED",
                "BRIDGE_COMMIT_EVERY_FRAMES",
            ] {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_reads_variables() {
        cleanup();
        unsafe {
            env::set_var("PORT", "8081");
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("REALTIME_TEMPERATURE", "0.7");
            env::set_var("BRIDGE_TEST_TONE_ENABLED", "off");
        }

        let config = load().unwrap();
        assert_eq!(config.server.unwrap().port, Some(8081));
        let realtime = config.realtime.unwrap();
        assert_eq!(realtime.api_key.as_deref(), Some("sk-env"));
        assert_eq!(realtime.temperature, Some(0.7));
        assert_eq!(config.bridge.unwrap().test_tone_enabled, Some(false));

        cleanup();
    }

    #[test]
    #[serial]
    fn test_empty_values_are_absent() {
        cleanup();
        unsafe {
            env::set_var("OPENAI_API_KEY", "  ");
        }
        assert!(load().unwrap().realtime.unwrap().api_key.is_none());
        cleanup();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fail() {
        cleanup();
        unsafe {
            env::set_var("BRIDGE_COMMIT_EVERY_FRAMES", "ten");
        }
        let err = load().unwrap_err();
        assert!(err.to_string().contains("BRIDGE_COMMIT_EVERY_FRAMES"));

        cleanup();
        unsafe {
            env::set_var("BRIDGE_TEST_TONE_ENABLED", "maybe");
        }
        assert!(load().is_err());
        cleanup();
    }
}
