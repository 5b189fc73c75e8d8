//! Application configuration
//!
//! Loaded from a TOML file; every field has a default matching the
//! deployed two-box setup, so a missing file or a partial one still
//! yields a runnable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::UDP_PORT;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub pins: PinConfig,
}

/// The two fixed machine names and the well-known port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hostname of the first communicator box
    pub communicator_one: String,
    /// Hostname of the second communicator box
    pub communicator_two: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            communicator_one: "CommunicatorOne".to_string(),
            communicator_two: "CommunicatorTwo".to_string(),
            port: UDP_PORT,
        }
    }
}

/// Buffer window and audible prompt files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Seconds of audio per buffer window; also the role-switch
    /// check granularity
    pub buffer_seconds: u32,
    /// Played once at startup when the link is up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_prompt: Option<PathBuf>,
    /// Played when entering record mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_prompt: Option<PathBuf>,
    /// Played when entering listen mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_prompt: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 1,
            ready_prompt: None,
            record_prompt: None,
            waiting_prompt: None,
        }
    }
}

/// Board pin assignments
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// DAC chip select (output)
    pub dac_cs: u8,
    /// Transmit/receive role button (input)
    pub control_button: u8,
    /// Ready LED (output)
    pub ready_led: u8,
    /// Microphone feed (analog input)
    pub mic_input: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            dac_cs: 2,
            control_button: 3,
            ready_led: 4,
            mic_input: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}
