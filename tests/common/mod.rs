//! Shared test utilities
//!
//! Hardware-free stand-ins for the audio devices and the model channel. Each fake hands
//! the test a probe sharing its state, so the test can play the part of the driver or
//! the remote model.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use beacon_realtime::audio::{
    AudioBackend, AudioOutput, AudioPacket, EndNotifier, FrameSink, InputTrack, PlaybackId,
    ScheduledPlayback, codec,
};
use beacon_realtime::session::SessionSettings;
use beacon_realtime::transport::{ClientMessage, EventSink, SessionSetup};
use beacon_realtime::{Error, Result, Transport, TransportEvent, TransportLink};

/// Build a packet of `secs` seconds of a quiet tone at the playback rate
#[must_use]
pub fn speech_packet(secs: f64) -> AudioPacket {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (secs * f64::from(beacon_realtime::audio::PLAYBACK_SAMPLE_RATE)).round() as usize;
    let samples: Vec<f32> = (0..len).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
    AudioPacket::inbound(codec::encode(&samples).data())
}

/// Settings with small frames so a few samples produce a frame
#[must_use]
pub fn test_settings(frame_size: usize) -> SessionSettings {
    SessionSettings {
        setup: SessionSetup {
            voice: "alloy".to_string(),
            system_instruction: Some("Be brief.".to_string()),
        },
        capture: beacon_realtime::audio::CaptureSettings {
            frame_size,
            vad_threshold: 0.02,
        },
    }
}

// ----------------------------------------------------------------------------
// Audio devices
// ----------------------------------------------------------------------------

/// Everything the fake devices observed
#[derive(Default)]
pub struct DeviceLog {
    pub deny_microphone: bool,
    pub inputs_opened: usize,
    pub inputs_stopped: usize,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    pub clock: f64,
    /// `(id, start_at, end_at)` in scheduling order
    pub scheduled: Vec<(PlaybackId, f64, f64)>,
    pub stopped: Vec<PlaybackId>,
    sink: Option<FrameSink>,
    on_ended: Option<EndNotifier>,
}

/// Test-side handle onto the fake devices
#[derive(Clone, Default)]
pub struct DeviceProbe(Arc<Mutex<DeviceLog>>);

impl DeviceProbe {
    /// Lock the device log
    pub fn log(&self) -> MutexGuard<'_, DeviceLog> {
        self.0.lock().expect("device log poisoned")
    }

    /// Move the output clock
    pub fn set_clock(&self, secs: f64) {
        self.log().clock = secs;
    }

    /// Deliver samples as the microphone callback would
    pub fn speak(&self, samples: &[f32]) {
        let sink = self.log().sink.clone();
        if let Some(sink) = sink {
            sink(samples);
        }
    }

    /// Report a buffer as finished, as the output callback would
    pub fn finish(&self, id: PlaybackId) {
        let on_ended = self.log().on_ended.clone();
        if let Some(on_ended) = on_ended {
            on_ended(id);
        }
    }

    /// Start offsets of every buffer scheduled so far
    pub fn scheduled_starts(&self) -> Vec<f64> {
        self.log().scheduled.iter().map(|(_, start, _)| *start).collect()
    }

    /// Ids of every buffer scheduled so far
    pub fn scheduled_ids(&self) -> Vec<PlaybackId> {
        self.log().scheduled.iter().map(|(id, _, _)| *id).collect()
    }
}

/// Audio backend backed by a [`DeviceLog`]
pub struct FakeDevices {
    log: DeviceProbe,
}

impl FakeDevices {
    /// Working microphone and speakers
    #[must_use]
    pub fn new() -> (Self, DeviceProbe) {
        let probe = DeviceProbe::default();
        (Self { log: probe.clone() }, probe)
    }

    /// Speakers work but the microphone is refused
    #[must_use]
    pub fn without_microphone() -> (Self, DeviceProbe) {
        let (devices, probe) = Self::new();
        probe.log().deny_microphone = true;
        (devices, probe)
    }
}

impl AudioBackend for FakeDevices {
    fn open_input(&self, sink: FrameSink) -> Result<Box<dyn InputTrack>> {
        let mut log = self.log.log();
        if log.deny_microphone {
            return Err(Error::PermissionDenied("access refused".to_string()));
        }
        log.inputs_opened += 1;
        log.sink = Some(sink);
        Ok(Box::new(FakeInput {
            log: self.log.clone(),
        }))
    }

    fn open_output(&self, on_ended: EndNotifier) -> Result<Box<dyn AudioOutput>> {
        let mut log = self.log.log();
        log.outputs_opened += 1;
        log.on_ended = Some(on_ended);
        Ok(Box::new(FakeOutput {
            log: self.log.clone(),
        }))
    }
}

struct FakeInput {
    log: DeviceProbe,
}

impl InputTrack for FakeInput {
    fn stop(&mut self) {
        self.log.log().inputs_stopped += 1;
    }
}

struct FakeOutput {
    log: DeviceProbe,
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.log.log().clock
    }

    fn schedule(&mut self, playback: &ScheduledPlayback) -> Result<()> {
        self.log
            .log()
            .scheduled
            .push((playback.id(), playback.start_at(), playback.end_at()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.log.log().stopped.push(id);
    }

    fn close(&mut self) {
        self.log.log().outputs_closed += 1;
    }
}

// ----------------------------------------------------------------------------
// Model channel
// ----------------------------------------------------------------------------

/// How the fake channel answers `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    #[default]
    Accept,
    /// Refuse with a transient condition
    Busy,
    /// Refuse with a hard error
    Refuse,
}

/// Everything the fake channel observed
#[derive(Default)]
pub struct ChannelLog {
    pub behavior: OpenBehavior,
    pub opens: usize,
    pub setups: Vec<SessionSetup>,
    events: Option<EventSink>,
    outbound: Option<mpsc::UnboundedReceiver<ClientMessage>>,
    shutdown: Option<oneshot::Receiver<()>>,
}

/// Test-side handle onto the fake channel
#[derive(Clone, Default)]
pub struct ChannelProbe(Arc<Mutex<ChannelLog>>);

impl ChannelProbe {
    /// Lock the channel log
    pub fn log(&self) -> MutexGuard<'_, ChannelLog> {
        self.0.lock().expect("channel log poisoned")
    }

    /// Post an event as the remote model would
    pub fn emit(&self, event: TransportEvent) {
        let events = self.log().events.clone();
        if let Some(events) = events {
            events(event);
        }
    }

    /// The event sink handed to the most recent `open`
    pub fn event_sink(&self) -> Option<EventSink> {
        self.log().events.clone()
    }

    /// Everything sent on the current link so far
    pub fn drain_outbound(&self) -> Vec<ClientMessage> {
        let mut log = self.log();
        let mut sent = Vec::new();
        if let Some(rx) = log.outbound.as_mut() {
            while let Ok(message) = rx.try_recv() {
                sent.push(message);
            }
        }
        sent
    }

    /// Whether the session asked the current link to shut down
    pub fn was_shut_down(&self) -> bool {
        self.log()
            .shutdown
            .as_mut()
            .is_some_and(|rx| rx.try_recv().is_ok())
    }
}

/// Transport backed by a [`ChannelLog`]
pub struct FakeTransport {
    log: ChannelProbe,
}

impl FakeTransport {
    #[must_use]
    pub fn new(behavior: OpenBehavior) -> (Self, ChannelProbe) {
        let probe = ChannelProbe::default();
        probe.log().behavior = behavior;
        (Self { log: probe.clone() }, probe)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, setup: &SessionSetup, events: EventSink) -> Result<TransportLink> {
        let mut log = self.log.log();
        log.opens += 1;
        match log.behavior {
            OpenBehavior::Busy => {
                return Err(Error::ChannelUnavailable("server busy".to_string()));
            }
            OpenBehavior::Refuse => {
                return Err(Error::Channel("connection refused".to_string()));
            }
            OpenBehavior::Accept => {}
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // The setup message goes first, as a real channel would send it
        let _ = outbound_tx.send(ClientMessage::from(setup));

        log.setups.push(setup.clone());
        log.events = Some(events);
        log.outbound = Some(outbound_rx);
        log.shutdown = Some(shutdown_rx);
        Ok(TransportLink::new(outbound_tx, Some(shutdown_tx)))
    }
}
