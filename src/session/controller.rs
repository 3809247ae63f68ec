//! Session lifecycle and event dispatch
//!
//! The controller is the only owner of session state. Device callbacks and the transport
//! task never touch it directly: they post [`SessionEvent`]s tagged with the session
//! generation that produced them, and [`SessionController::dispatch`] applies them one at
//! a time. Events from a session that has already been torn down are dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::mode::{ModeEvent, SessionMode};
use crate::audio::{
    AudioBackend, CaptureEncoder, CaptureSettings, EndNotifier, Enqueued, FrameSink, MuteFlag,
    PlaybackId, PlaybackScheduler,
};
use crate::error::{SessionFailure, classify_channel_error};
use crate::transport::{
    ClientMessage, EventSink, SessionSetup, Transport, TransportEvent, TransportLink,
};
use crate::{Error, Result};

/// User-visible connection status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Never connected
    #[default]
    Idle,
    /// `connect()` in progress or waiting for the channel-open acknowledgment
    Connecting,
    /// Channel acknowledged
    Connected,
    /// Ended normally
    Disconnected,
    /// Ended by a failure
    Failed(SessionFailure),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed(failure) => write!(f, "failed ({failure})"),
        }
    }
}

/// Static parameters for every session a controller opens
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Sent to the model when the channel opens
    pub setup: SessionSetup,
    /// Capture framing and voice activity threshold
    pub capture: CaptureSettings,
}

/// Something that happened on a device thread or the transport task
#[derive(Debug)]
pub struct SessionEvent {
    generation: u64,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Samples(Vec<f32>),
    PlaybackEnded(PlaybackId),
    Transport(TransportEvent),
}

/// The live session: one capture graph, one playback graph, one channel
struct ActiveSession {
    id: Uuid,
    generation: u64,
    capture: CaptureEncoder,
    playback: PlaybackScheduler,
    link: TransportLink,
}

impl ActiveSession {
    /// Release everything in a fixed order; each step tolerates having already run
    fn teardown(&mut self) {
        self.playback.interrupt();
        self.capture.detach();
        self.capture.release();
        self.playback.close();
        self.link.close();
    }
}

/// Owns the duplex voice session and its mode state machine
pub struct SessionController {
    backend: Box<dyn AudioBackend>,
    transport: Box<dyn Transport>,
    settings: SessionSettings,
    mode: SessionMode,
    status: SessionStatus,
    mute: MuteFlag,
    active: Option<ActiveSession>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionController {
    /// Create a controller; nothing is opened until [`connect`](Self::connect)
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            transport,
            settings,
            mode: SessionMode::Idle,
            status: SessionStatus::Idle,
            mute: MuteFlag::new(),
            active: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    /// Acquire the microphone and speakers and open the channel
    ///
    /// A no-op while a session is live
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if the microphone is unavailable,
    /// [`Error::ChannelUnavailable`] or [`Error::Channel`] if the channel cannot be opened.
    /// On error nothing stays open and the mode is `Disconnected`
    pub async fn connect(&mut self) -> Result<()> {
        if self.active.is_some() {
            tracing::debug!("session already active, ignoring connect");
            return Ok(());
        }

        self.generation += 1;
        let generation = self.generation;
        self.status = SessionStatus::Connecting;
        self.apply(ModeEvent::ConnectStarted);

        let samples_tx = self.events_tx.clone();
        let sink: FrameSink = Arc::new(move |samples: &[f32]| {
            let _ = samples_tx.send(SessionEvent {
                generation,
                kind: EventKind::Samples(samples.to_vec()),
            });
        });

        let mut capture =
            match CaptureEncoder::start(self.backend.as_ref(), self.settings.capture, sink) {
                Ok(capture) => capture,
                Err(e) => return Err(self.fail_connect(e)),
            };

        let ended_tx = self.events_tx.clone();
        let on_ended: EndNotifier = Arc::new(move |id| {
            let _ = ended_tx.send(SessionEvent {
                generation,
                kind: EventKind::PlaybackEnded(id),
            });
        });

        let output = match self.backend.open_output(on_ended) {
            Ok(output) => output,
            Err(e) => {
                capture.detach();
                capture.release();
                return Err(self.fail_connect(e));
            }
        };
        let mut playback = PlaybackScheduler::new(output, self.mute.clone());

        let transport_tx = self.events_tx.clone();
        let events: EventSink = Arc::new(move |event| {
            let _ = transport_tx.send(SessionEvent {
                generation,
                kind: EventKind::Transport(event),
            });
        });

        let link = match self.transport.open(&self.settings.setup, events).await {
            Ok(link) => link,
            Err(e) => {
                capture.detach();
                capture.release();
                playback.close();
                return Err(self.fail_connect(e));
            }
        };

        let id = Uuid::new_v4();
        tracing::info!(session_id = %id, "session connected, awaiting channel acknowledgment");
        self.active = Some(ActiveSession {
            id,
            generation,
            capture,
            playback,
            link,
        });
        Ok(())
    }

    /// Tear the session down
    ///
    /// Stops playback, detaches and releases the microphone, closes both audio graphs,
    /// then closes the channel. Calling it again, or after the channel already closed,
    /// changes nothing
    pub fn disconnect(&mut self) {
        self.end_session(SessionStatus::Disconnected);
    }

    /// Switch mute on or off
    ///
    /// Turning mute on stops any playing speech and returns to `Idle`; packets arriving
    /// while muted are discarded, not buffered
    pub fn set_muted(&mut self, muted: bool) {
        let was_muted = self.mute.set(muted);
        if muted && !was_muted {
            if let Some(active) = self.active.as_mut() {
                active.playback.interrupt();
            }
            self.apply(ModeEvent::Muted);
            tracing::info!("muted");
        } else if !muted && was_muted {
            tracing::info!("unmuted");
        }
    }

    /// Wait for the next event from the devices or the channel
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Dispatch every event already queued, returning how many were handled
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Apply one event to the session
    pub fn dispatch(&mut self, event: SessionEvent) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(event.generation) {
            tracing::trace!(
                generation = event.generation,
                "event from a closed session, ignoring"
            );
            return;
        }

        match event.kind {
            EventKind::Samples(samples) => self.on_samples(&samples),
            EventKind::PlaybackEnded(id) => self.on_playback_ended(id),
            EventKind::Transport(event) => self.on_transport_event(event),
        }
    }

    /// Current mode
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Whether a session is live
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the live session
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Whether mute is on
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// Shared handle to the mute flag
    #[must_use]
    pub fn mute_flag(&self) -> MuteFlag {
        self.mute.clone()
    }

    /// Number of buffers scheduled and not yet finished
    #[must_use]
    pub fn live_playback_count(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |a| a.playback.live_count())
    }

    fn apply(&mut self, event: ModeEvent) {
        let next = self.mode.apply(event);
        if next != self.mode {
            tracing::debug!(from = %self.mode, to = %next, ?event, "mode changed");
            self.mode = next;
        }
    }

    fn on_samples(&mut self, samples: &[f32]) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let mut voice_active = false;
        for frame in active.capture.process(samples) {
            voice_active |= frame.voice_active;
            if !active.link.send(ClientMessage::realtime_input(&frame.packet)) {
                tracing::trace!("channel closed, dropping captured frame");
            }
        }

        if voice_active {
            self.apply(ModeEvent::VoiceActivity);
        }
    }

    fn on_playback_ended(&mut self, id: PlaybackId) {
        let drained = self
            .active
            .as_mut()
            .is_some_and(|a| a.playback.on_ended(id));
        if drained {
            tracing::debug!("playback drained");
            self.apply(ModeEvent::PlaybackDrained);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.status = SessionStatus::Connected;
                self.apply(ModeEvent::ChannelOpened);
                tracing::info!("realtime channel acknowledged");
            }
            TransportEvent::Audio(packet) => {
                let Some(active) = self.active.as_mut() else {
                    return;
                };
                match active.playback.enqueue(&packet) {
                    Ok(Enqueued::Scheduled { .. }) => self.apply(ModeEvent::PlaybackStarted),
                    Ok(Enqueued::Suppressed | Enqueued::Empty) => {}
                    Ok(Enqueued::Rejected) => {
                        tracing::debug!(mode = %self.mode, "output refused inbound audio");
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping malformed audio packet"),
                }
            }
            TransportEvent::Interrupted => {
                if let Some(active) = self.active.as_mut() {
                    active.playback.interrupt();
                }
                self.apply(ModeEvent::Interrupted);
            }
            TransportEvent::Closed => {
                tracing::info!("realtime channel closed by server");
                self.end_session(SessionStatus::Disconnected);
            }
            TransportEvent::Error(detail) => {
                let err = classify_channel_error(&detail);
                tracing::warn!(error = %err, "realtime channel failed");
                let failure = err
                    .failure()
                    .unwrap_or(SessionFailure::ChannelError(detail));
                self.end_session(SessionStatus::Failed(failure));
            }
        }
    }

    fn end_session(&mut self, status: SessionStatus) {
        if let Some(mut active) = self.active.take() {
            active.teardown();
            tracing::info!(session_id = %active.id, %status, "session ended");
            self.status = status;
        } else if matches!(
            self.status,
            SessionStatus::Idle | SessionStatus::Connecting | SessionStatus::Connected
        ) {
            self.status = status;
        }
        self.apply(ModeEvent::Disconnected);
    }

    fn fail_connect(&mut self, err: Error) -> Error {
        let failure = err
            .failure()
            .unwrap_or_else(|| SessionFailure::ChannelError(err.to_string()));
        tracing::warn!(error = %err, "connect failed");
        self.status = SessionStatus::Failed(failure);
        self.apply(ModeEvent::Disconnected);
        err
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.teardown();
        }
    }
}
