//! Error types for Beacon realtime sessions

use thiserror::Error;

use crate::audio::CodecError;

/// Result type alias for Beacon realtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a realtime voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access refused or no input device present
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Remote model signalled a transient condition (busy, overloaded)
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Any other transport failure
    #[error("channel error: {0}")]
    Channel(String),

    /// Malformed audio packet
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// User-visible failure category for a session-level error
    ///
    /// Returns `None` for errors that are absorbed locally and never end a session
    #[must_use]
    pub fn failure(&self) -> Option<SessionFailure> {
        match self {
            Self::PermissionDenied(_) => Some(SessionFailure::PermissionDenied),
            Self::ChannelUnavailable(_) => Some(SessionFailure::ChannelUnavailable),
            Self::Codec(_) => None,
            other => Some(SessionFailure::ChannelError(other.to_string())),
        }
    }
}

/// Why a session ended in failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// Microphone access refused; the user must reconnect manually
    PermissionDenied,
    /// Transient remote condition; suggest trying again shortly
    ChannelUnavailable,
    /// Generic open or runtime failure
    ChannelError(String),
}

impl SessionFailure {
    /// Message suitable for showing to the user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Microphone access was denied. Allow access and connect again.".to_string()
            }
            Self::ChannelUnavailable => {
                "The voice service is busy right now. Try again shortly.".to_string()
            }
            Self::ChannelError(detail) => format!("Connection error: {detail}"),
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::ChannelUnavailable => f.write_str("channel unavailable"),
            Self::ChannelError(detail) => write!(f, "channel error: {detail}"),
        }
    }
}

/// Classify a free-text error detail from the remote model
///
/// Transient-looking signals map to [`Error::ChannelUnavailable`] so the caller can
/// suggest a retry; everything else is a generic [`Error::Channel`]
#[must_use]
pub fn classify_channel_error(detail: &str) -> Error {
    const TRANSIENT_MARKERS: [&str; 7] = [
        "unavailable",
        "busy",
        "overloaded",
        "resource exhausted",
        "resource_exhausted",
        "try again",
        "503",
    ];

    let lowered = detail.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        Error::ChannelUnavailable(detail.to_string())
    } else {
        Error::Channel(detail.to_string())
    }
}
