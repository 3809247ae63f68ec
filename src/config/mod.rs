//! Configuration management for Beacon realtime sessions

pub mod file;

use std::path::Path;

use crate::audio::{CaptureSettings, DEFAULT_FRAME_SIZE, DEFAULT_VAD_THRESHOLD};
use crate::session::SessionSettings;
use crate::transport::SessionSetup;
use crate::{Error, Result};

use file::RealtimeConfigFile;

/// Default realtime endpoint (a local model server)
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8765/v1/realtime";

/// Default voice identity
pub const DEFAULT_VOICE: &str = "alloy";

/// Beacon realtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Channel configuration
    pub transport: TransportConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Capture framing and voice activity detection
    pub capture: CaptureSettings,
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint of the realtime model
    pub url: String,
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Voice identity for synthesized speech
    pub voice: String,

    /// Optional persona/behavior instruction
    pub system_instruction: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig {
                url: DEFAULT_URL.to_string(),
            },
            voice: VoiceConfig {
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: None,
            },
            capture: CaptureSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// Precedence: environment > config file > defaults
    ///
    /// Reads from:
    /// - `BEACON_REALTIME_URL`: WebSocket endpoint
    /// - `BEACON_REALTIME_VOICE`: voice identity
    /// - `BEACON_REALTIME_INSTRUCTION`: system instruction
    /// - `BEACON_REALTIME_VAD_THRESHOLD`: voice activity threshold
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn from_sources(
        fc: RealtimeConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let vad_threshold = match env("BEACON_REALTIME_VAD_THRESHOLD") {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("invalid BEACON_REALTIME_VAD_THRESHOLD: {raw}"))
            })?,
            None => fc.capture.vad_threshold.unwrap_or(DEFAULT_VAD_THRESHOLD),
        };

        let config = Self {
            transport: TransportConfig {
                url: env("BEACON_REALTIME_URL")
                    .or(fc.transport.url)
                    .unwrap_or(defaults.transport.url),
            },
            voice: VoiceConfig {
                voice: env("BEACON_REALTIME_VOICE")
                    .or(fc.voice.voice)
                    .unwrap_or(defaults.voice.voice),
                system_instruction: env("BEACON_REALTIME_INSTRUCTION")
                    .or(fc.voice.system_instruction)
                    .filter(|s| !s.trim().is_empty()),
            },
            capture: CaptureSettings {
                frame_size: fc.capture.frame_size.unwrap_or(DEFAULT_FRAME_SIZE),
                vad_threshold,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the session cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.transport.url.trim().is_empty() {
            return Err(Error::Config("transport url is empty".to_string()));
        }
        let url = url::Url::parse(&self.transport.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "transport url must be ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        if self.voice.voice.trim().is_empty() {
            return Err(Error::Config("voice is empty".to_string()));
        }
        if self.capture.frame_size == 0 {
            return Err(Error::Config("capture frame size must be positive".to_string()));
        }
        if !(self.capture.vad_threshold > 0.0 && self.capture.vad_threshold < 1.0) {
            return Err(Error::Config(format!(
                "vad threshold must be between 0 and 1, got {}",
                self.capture.vad_threshold
            )));
        }
        Ok(())
    }

    /// Per-session parameters for the controller
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            setup: SessionSetup {
                voice: self.voice.voice.clone(),
                system_instruction: self.voice.system_instruction.clone(),
            },
            capture: self.capture,
        }
    }
}
