//! Beacon Realtime - duplex voice sessions for AI assistants
//!
//! This library provides the realtime voice engine used by Beacon:
//! - PCM packet encoding for the wire
//! - Microphone capture with voice activity detection
//! - Gapless, interruptible playback of streamed speech
//! - Session lifecycle and mode state machine over a duplex channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   frames    ┌────────────────────┐  realtime_input  ┌──────────────┐
//! │  Microphone  │────────────▶│                    │─────────────────▶│              │
//! └──────────────┘             │ SessionController  │                  │   Realtime   │
//! ┌──────────────┐  schedule   │  (mode machine,    │    model_turn    │    model     │
//! │   Speakers   │◀────────────│   single dispatch) │◀─────────────────│              │
//! └──────────────┘             └────────────────────┘   interrupted    └──────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioOutput, AudioPacket, CaptureEncoder, CpalBackend, DecodedBuffer,
    MuteFlag, PlaybackScheduler,
};
pub use config::Config;
pub use error::{Error, Result, SessionFailure};
pub use session::{SessionController, SessionMode, SessionSettings, SessionStatus};
pub use transport::{Transport, TransportEvent, TransportLink, WebSocketTransport};
