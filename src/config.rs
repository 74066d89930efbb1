//! Configuration management for the SysEx bridge
//!
//! YAML file with defaults for every field, plus a few environment overrides
//! for the values that differ between machines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::feedback::DEFAULT_UNSOLICITED_CAPACITY;
use crate::protocol::{Codec, DEFAULT_MAX_ENCODED_PAYLOAD, DEFAULT_VENDOR_HEADER};
use crate::transport::ListenerSettings;

pub const ENV_OUTPUT_PORT: &str = "SYSEX_BRIDGE_OUTPUT_PORT";
pub const ENV_INPUT_PORT: &str = "SYSEX_BRIDGE_INPUT_PORT";
pub const ENV_TIMEOUT_MS: &str = "SYSEX_BRIDGE_TIMEOUT_MS";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
}

/// MIDI port configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MidiConfig {
    /// Substring of the port the bridge sends commands on
    #[serde(default = "default_output_port")]
    pub output_port: String,
    /// Substring of the port the host answers on
    #[serde(default = "default_input_port")]
    pub input_port: String,
    /// Virtual cable family used as a fallback when a port is missing
    #[serde(default = "default_family_marker")]
    pub family_marker: String,
    /// Let both directions fall back onto the same port
    #[serde(default)]
    pub allow_alias: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProtocolConfig {
    #[serde(default = "default_vendor_header")]
    pub vendor_header: Vec<u8>,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_max_encoded_payload")]
    pub max_encoded_payload: usize,
    #[serde(default = "default_unsolicited_capacity")]
    pub unsolicited_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ListenerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_reopen_attempts")]
    pub reopen_attempts: u32,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

// Default value functions
fn default_output_port() -> String {
    "IAC Driver MCP Bridge".to_string()
}

fn default_input_port() -> String {
    "IAC Driver Bus 1".to_string()
}

fn default_family_marker() -> String {
    "IAC".to_string()
}

fn default_vendor_header() -> Vec<u8> {
    DEFAULT_VENDOR_HEADER.to_vec()
}

fn default_response_timeout_ms() -> u64 {
    7000
}

fn default_max_encoded_payload() -> usize {
    DEFAULT_MAX_ENCODED_PAYLOAD
}

fn default_unsolicited_capacity() -> usize {
    DEFAULT_UNSOLICITED_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_open_retries() -> u32 {
    5
}

fn default_reopen_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_retry_max_delay_ms() -> u64 {
    4000
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: default_output_port(),
            input_port: default_input_port(),
            family_marker: default_family_marker(),
            allow_alias: false,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            vendor_header: default_vendor_header(),
            response_timeout_ms: default_response_timeout_ms(),
            max_encoded_payload: default_max_encoded_payload(),
            unsolicited_capacity: default_unsolicited_capacity(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            open_retries: default_open_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            reopen_attempts: default_reopen_attempts(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, apply env overrides and validate
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Like `load`, but a missing file means built-in defaults
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            return Self::load(path).await;
        }

        info!("No config file at {}, using defaults", path.display());
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Override port names and timeout from the environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var(ENV_OUTPUT_PORT) {
            debug!("{} overrides output port: {}", ENV_OUTPUT_PORT, port);
            self.midi.output_port = port;
        }
        if let Ok(port) = std::env::var(ENV_INPUT_PORT) {
            debug!("{} overrides input port: {}", ENV_INPUT_PORT, port);
            self.midi.input_port = port;
        }
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_MS) {
            self.protocol.response_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds, got '{}'", ENV_TIMEOUT_MS, raw))?;
        }
        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.output_port.trim().is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }
        if self.midi.input_port.trim().is_empty() {
            anyhow::bail!("MIDI input_port cannot be empty");
        }

        let header = &self.protocol.vendor_header;
        if header.is_empty() {
            anyhow::bail!("protocol.vendor_header cannot be empty");
        }
        if let Some(b) = header.iter().find(|&&b| b > 0x7F) {
            anyhow::bail!("protocol.vendor_header byte 0x{:02X} is not a 7-bit data byte", b);
        }
        if self.protocol.response_timeout_ms == 0 {
            anyhow::bail!("protocol.response_timeout_ms must be greater than 0");
        }
        let max = self.protocol.max_encoded_payload;
        if max == 0 || max % 8 != 0 {
            anyhow::bail!("protocol.max_encoded_payload must be a positive multiple of 8, got {}", max);
        }
        if self.protocol.unsolicited_capacity == 0 {
            anyhow::bail!("protocol.unsolicited_capacity must be greater than 0");
        }

        if !(1..=1000).contains(&self.listener.poll_interval_ms) {
            anyhow::bail!(
                "listener.poll_interval_ms must be between 1 and 1000, got {}",
                self.listener.poll_interval_ms
            );
        }
        if self.listener.open_retries == 0 || self.listener.reopen_attempts == 0 {
            anyhow::bail!("listener retry counts must be at least 1");
        }
        if self.listener.retry_max_delay_ms < self.listener.retry_base_delay_ms {
            anyhow::bail!("listener.retry_max_delay_ms must not be below retry_base_delay_ms");
        }

        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol.response_timeout_ms)
    }

    pub fn codec(&self) -> Codec {
        Codec::new(&self.protocol.vendor_header)
            .with_max_encoded_payload(self.protocol.max_encoded_payload)
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings::from(&self.listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var(ENV_OUTPUT_PORT);
        std::env::remove_var(ENV_INPUT_PORT);
        std::env::remove_var(ENV_TIMEOUT_MS);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.midi.output_port, "IAC Driver MCP Bridge");
        assert_eq!(config.midi.input_port, "IAC Driver Bus 1");
        assert_eq!(config.protocol.vendor_header, vec![0x7D, 0x01]);
        assert_eq!(config.response_timeout(), Duration::from_millis(7000));
        assert_eq!(config.listener_settings().poll_interval, Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
midi:
  output_port: "loopMIDI Bridge"
protocol:
  response_timeout_ms: 2500
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.midi.output_port, "loopMIDI Bridge");
        assert_eq!(config.midi.input_port, "IAC Driver Bus 1");
        assert_eq!(config.protocol.response_timeout_ms, 2500);
        assert_eq!(config.protocol.max_encoded_payload, 240);
        assert_eq!(config.listener.open_retries, 5);
    }

    #[test]
    fn test_open_retries_and_reopen_attempts_are_independent() {
        let config = AppConfig::from_yaml("listener:\n  open_retries: 2\n").unwrap();
        assert_eq!(config.listener.open_retries, 2);
        assert_eq!(config.listener.reopen_attempts, 5);

        let config = AppConfig::from_yaml("listener:\n  reopen_attempts: 9\n").unwrap();
        assert_eq!(config.listener.open_retries, 5);
        assert_eq!(config.listener.reopen_attempts, 9);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(AppConfig::from_yaml("  \n").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.midi.input_port = " ".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.protocol.vendor_header = vec![0x7D, 0x81];
        assert!(config.validate().unwrap_err().to_string().contains("0x81"));

        let mut config = AppConfig::default();
        config.protocol.max_encoded_payload = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.listener.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.protocol.response_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_codec_from_config() {
        let mut config = AppConfig::default();
        config.protocol.vendor_header = vec![0x00, 0x21, 0x09];
        config.protocol.max_encoded_payload = 64;
        let codec = config.codec();
        assert_eq!(codec.prefix(), &[0xF0, 0x00, 0x21, 0x09]);
        assert_eq!(codec.max_encoded_payload(), 64);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_from_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "midi:\n  input_port: \"Bus 2\"\nprotocol:\n  vendor_header: [125, 2]\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.midi.input_port, "Bus 2");
        assert_eq!(config.protocol.vendor_header, vec![0x7D, 0x02]);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_rejects_invalid_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "listener:\n  open_retries: 0\n").unwrap();
        assert!(AppConfig::load(&path).await.is_err());

        std::fs::write(&path, "midi: [not, a, map]\n").unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_file_uses_defaults_and_save_round_trips() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());

        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap(), config);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_OUTPUT_PORT, "loopMIDI Out");
        std::env::set_var(ENV_TIMEOUT_MS, "1500");

        let mut config = AppConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.midi.output_port, "loopMIDI Out");
        assert_eq!(config.midi.input_port, "IAC Driver Bus 1");
        assert_eq!(config.protocol.response_timeout_ms, 1500);

        std::env::set_var(ENV_TIMEOUT_MS, "soon");
        assert!(config.apply_env_overrides().is_err());
        clear_env();
    }
}
