//! Wire messages exchanged with the realtime speech model

use serde::{Deserialize, Serialize};

use crate::audio::AudioPacket;

/// Modality the model should answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseModality {
    /// Synthetic speech
    Audio,
}

/// Parameters sent once when the channel opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Voice identity for synthesized speech
    pub voice: String,
    /// Optional persona/behavior instruction
    pub system_instruction: Option<String>,
}

/// Outgoing message to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Session configuration, always the first message
    Setup {
        voice: String,
        response_modality: ResponseModality,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_instruction: Option<String>,
    },
    /// One captured audio frame; fire-and-forget
    RealtimeInput { media: MediaChunk },
}

impl ClientMessage {
    /// Wrap a captured packet for sending
    #[must_use]
    pub fn realtime_input(packet: &AudioPacket) -> Self {
        Self::RealtimeInput {
            media: MediaChunk {
                mime_type: packet.mime_type(),
                data: packet.data().to_string(),
            },
        }
    }
}

impl From<&SessionSetup> for ClientMessage {
    fn from(setup: &SessionSetup) -> Self {
        Self::Setup {
            voice: setup.voice.clone(),
            response_modality: ResponseModality::Audio,
            system_instruction: setup.system_instruction.clone(),
        }
    }
}

/// Tagged base64 audio payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// Incoming message from the model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Setup accepted; the channel is live
    SetupComplete,
    /// A chunk of the model's spoken turn
    ModelTurn { audio: InboundAudio },
    /// The user's speech preempted the model
    Interrupted,
    /// Graceful close
    Closed,
    /// Remote failure
    Error { detail: String },
}

/// Base64 PCM at the playback rate
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundAudio {
    pub data: String,
}

/// Event delivered by a transport to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel-open acknowledgment
    Opened,
    /// Inbound speech
    Audio(AudioPacket),
    /// Model-side barge-in
    Interrupted,
    /// Channel closed
    Closed,
    /// Channel failed
    Error(String),
}

impl From<ServerMessage> for TransportEvent {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::SetupComplete => Self::Opened,
            ServerMessage::ModelTurn { audio } => Self::Audio(AudioPacket::inbound(audio.data)),
            ServerMessage::Interrupted => Self::Interrupted,
            ServerMessage::Closed => Self::Closed,
            ServerMessage::Error { detail } => Self::Error(detail),
        }
    }
}

/// Parse one text or binary frame from the model
///
/// # Errors
///
/// Returns error if the frame is not a known JSON message
pub fn parse_server_frame(frame: &[u8]) -> crate::Result<TransportEvent> {
    let message: ServerMessage = serde_json::from_slice(frame)?;
    Ok(message.into())
}
