//! Session mode state machine

use std::fmt;

/// What the session is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Connected (or not yet connected) and quiet
    #[default]
    Idle,
    /// The user is talking
    Listening,
    /// Acquiring devices and negotiating the channel
    Processing,
    /// Model speech is playing
    Speaking,
    /// Terminal: the session was torn down; only `connect()` leaves this
    Disconnected,
}

/// Inputs that drive [`SessionMode`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// `connect()` started
    ConnectStarted,
    /// Channel-open acknowledgment received
    ChannelOpened,
    /// A captured frame exceeded the activation threshold
    VoiceActivity,
    /// An inbound packet was scheduled for playback
    PlaybackStarted,
    /// The last live buffer finished
    PlaybackDrained,
    /// The model signalled barge-in
    Interrupted,
    /// Mute was switched on
    Muted,
    /// Explicit disconnect, channel close or channel error
    Disconnected,
}

impl SessionMode {
    /// Next mode after `event`
    ///
    /// Events that do not apply in the current mode leave it unchanged
    #[must_use]
    pub const fn apply(self, event: ModeEvent) -> Self {
        use ModeEvent as E;

        match (self, event) {
            (_, E::Disconnected) => Self::Disconnected,
            (Self::Idle | Self::Disconnected, E::ConnectStarted) => Self::Processing,
            (Self::Disconnected, _) => Self::Disconnected,

            (Self::Processing, E::ChannelOpened) => Self::Listening,
            (Self::Idle | Self::Listening, E::VoiceActivity) => Self::Listening,
            (Self::Idle | Self::Listening, E::PlaybackStarted) => Self::Speaking,
            (Self::Speaking, E::PlaybackDrained) => Self::Idle,
            (_, E::Interrupted | E::Muted) => Self::Idle,

            (mode, _) => mode,
        }
    }

    /// Whether the mode is the terminal `Disconnected`
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
