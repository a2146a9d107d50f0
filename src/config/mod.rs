//! Configuration module for the call bridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from a YAML file; keys it leaves out come from the environment
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::{BridgeYaml, RealtimeYaml, ServerYaml, YamlConfig};

use crate::core::bridge::BridgeConfig;
use crate::core::realtime::RealtimeConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Speech API settings shared by every call
    pub realtime: RealtimeConfig,

    /// Per-call bridge timing
    pub bridge: BridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            realtime: RealtimeConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Clear the API key from memory when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.realtime.api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Expects `.env` to have been loaded already (see `main.rs`). Unset
    /// variables fall back to defaults.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether calls can reach the speech API at all
    pub fn has_realtime_credentials(&self) -> bool {
        !self.realtime.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::TurnDetectionConfig;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const VARS: &[&str] = &[
        "HOST",
        "PORT",
        "OPENAI_API_KEY",
        "OPENAI_REALTIME_URL",
        "OPENAI_REALTIME_VOICE",
        "REALTIME_VAD_THRESHOLD",
        "BRIDGE_COMMIT_EVERY_FRAMES",
        "BRIDGE_HEARTBEAT_INTERVAL_SECS",
    ];

    fn cleanup_env() {
        unsafe {
            for name in VARS {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert!(!config.has_realtime_credentials());
        assert_eq!(config.realtime.voice, "echo");
        assert_eq!(config.bridge, BridgeConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env();
        unsafe {
            std::env::set_var("PORT", "9000");
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("REALTIME_VAD_THRESHOLD", "0.3");
            std::env::set_var("BRIDGE_COMMIT_EVERY_FRAMES", "20");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.has_realtime_credentials());
        assert_eq!(config.bridge.commit_every_frames, 20);
        assert!(matches!(
            config.realtime.turn_detection,
            TurnDetectionConfig::ServerVad { threshold, .. } if threshold == 0.3
        ));

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_from_env_validation_failure() {
        cleanup_env();
        unsafe {
            std::env::set_var("OPENAI_REALTIME_URL", "https://api.openai.com/v1/realtime");
        }
        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        cleanup_env();
        unsafe {
            std::env::set_var("PORT", "9000");
            std::env::set_var("OPENAI_REALTIME_VOICE", "alloy");
            std::env::set_var("BRIDGE_HEARTBEAT_INTERVAL_SECS", "20");
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "server:\n  port: 7000\nrealtime:\n  voice: shimmer\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.realtime.voice, "shimmer");
        assert_eq!(config.bridge.heartbeat_interval_secs, 20);

        cleanup_env();
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_values() {
        cleanup_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "bridge:\n  test_tone_frequency_hz: 5000\n").unwrap();

        assert!(ServerConfig::from_file(&path).is_err());
    }
}
