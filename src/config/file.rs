//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon/realtime.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeConfigFile {
    /// Realtime model channel
    #[serde(default)]
    pub transport: TransportFileConfig,

    /// Voice identity and persona
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Microphone capture tuning
    #[serde(default)]
    pub capture: CaptureFileConfig,
}

/// Channel configuration
#[derive(Debug, Default, Deserialize)]
pub struct TransportFileConfig {
    /// WebSocket endpoint (e.g. "wss://realtime.example.com/v1/live")
    pub url: Option<String>,
}

/// Voice configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Voice identifier (e.g. "alloy")
    pub voice: Option<String>,

    /// Free-text persona/behavior instruction
    pub system_instruction: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Samples per outbound frame
    pub frame_size: Option<usize>,

    /// RMS voice activity threshold
    pub vad_threshold: Option<f32>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist and parse. Without one, the standard path is tried and
/// a missing or unreadable file falls back to defaults
///
/// # Errors
///
/// Returns error if an explicitly requested file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<RealtimeConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(RealtimeConfigFile::default());
    };

    if !path.exists() {
        return Ok(RealtimeConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RealtimeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RealtimeConfigFile::default()
        }
    };
    Ok(config)
}

/// Return the config file path: `~/.config/omni/beacon/realtime.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon")
            .join("realtime.toml")
    })
}
