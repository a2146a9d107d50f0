use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// realtime:
///   api_key: "sk-..."
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "echo"
///   instructions: "You are speaking with {user_name} ({user_contact})."
///   temperature: 0.8
///   max_response_output_tokens: 4096
///   transcription_model: "whisper-1"
///   vad_threshold: 0.5
///   vad_prefix_padding_ms: 300
///   vad_silence_duration_ms: 800
///   connect_timeout_ms: 10000
///
/// bridge:
///   start_timeout_ms: 5000
///   heartbeat_interval_secs: 30
///   commit_every_frames: 10
///   egress_pacing_ms: 1
///   test_tone_enabled: true
///   test_tone_duration_ms: 300
///   test_tone_frequency_hz: 440
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub bridge: Option<BridgeYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Speech API configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub max_response_output_tokens: Option<i32>,
    /// Empty or `none` disables caller transcription
    pub transcription_model: Option<String>,
    pub vad_threshold: Option<f32>,
    pub vad_prefix_padding_ms: Option<u32>,
    pub vad_silence_duration_ms: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
}

/// Call bridge configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeYaml {
    pub start_timeout_ms: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub commit_every_frames: Option<u32>,
    pub egress_pacing_ms: Option<u64>,
    pub test_tone_enabled: Option<bool>,
    pub test_tone_duration_ms: Option<u32>,
    pub test_tone_frequency_hz: Option<f32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
