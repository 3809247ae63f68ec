//! Gapless playback scheduling for inbound speech
//!
//! Every decoded buffer starts at `max(next_start_time, now)` on the output clock, so
//! bursts queue up back to back and gaps collapse to "play now".

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::{self, AudioPacket, CodecError, DecodedBuffer};
use super::device::AudioOutput;
use super::mute::MuteFlag;

/// Identifier of one scheduled buffer, unique per scheduler
pub type PlaybackId = u64;

/// Cancellation token carried by every scheduled buffer
#[derive(Debug, Clone, Default)]
pub struct PlaybackHandle(Arc<AtomicBool>);

impl PlaybackHandle {
    /// Cancel playback of the buffer
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the buffer has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A decoded buffer placed on the output clock
#[derive(Debug, Clone)]
pub struct ScheduledPlayback {
    id: PlaybackId,
    buffer: Arc<DecodedBuffer>,
    start_at: f64,
    handle: PlaybackHandle,
}

impl ScheduledPlayback {
    /// Buffer id
    #[must_use]
    pub const fn id(&self) -> PlaybackId {
        self.id
    }

    /// Decoded audio
    #[must_use]
    pub fn buffer(&self) -> &DecodedBuffer {
        &self.buffer
    }

    /// Start time on the output clock, in seconds
    #[must_use]
    pub const fn start_at(&self) -> f64 {
        self.start_at
    }

    /// End time on the output clock, in seconds
    #[must_use]
    pub fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration_secs()
    }

    /// Cancellation token
    #[must_use]
    pub const fn handle(&self) -> &PlaybackHandle {
        &self.handle
    }
}

/// What happened to an inbound packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Enqueued {
    /// Buffer placed on the output clock
    Scheduled {
        /// Buffer id
        id: PlaybackId,
        /// Start time in seconds
        start_at: f64,
        /// Duration in seconds
        duration: f64,
    },
    /// Dropped because mute was active or playback is closed; nothing was decoded or retained
    Suppressed,
    /// Decoded but refused by the output device; nothing was retained
    Rejected,
    /// Packet decoded to zero samples
    Empty,
}

/// Owns the output graph and the ordered set of live buffers
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    mute: MuteFlag,
    next_start_time: f64,
    live: VecDeque<ScheduledPlayback>,
    next_id: PlaybackId,
    closed: bool,
}

impl PlaybackScheduler {
    /// Create a scheduler on top of an open output graph
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>, mute: MuteFlag) -> Self {
        Self {
            output,
            mute,
            next_start_time: 0.0,
            live: VecDeque::new(),
            next_id: 1,
            closed: false,
        }
    }

    /// Decode a packet and schedule it right after whatever is already queued
    ///
    /// While mute is active the packet is dropped without decoding
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for a malformed packet; scheduler state is left untouched
    pub fn enqueue(&mut self, packet: &AudioPacket) -> Result<Enqueued, CodecError> {
        if self.mute.is_muted() {
            tracing::trace!("muted, dropping inbound packet");
            return Ok(Enqueued::Suppressed);
        }
        if self.closed {
            tracing::trace!("playback closed, dropping inbound packet");
            return Ok(Enqueued::Suppressed);
        }

        let buffer = codec::decode(packet)?;
        if buffer.is_empty() {
            return Ok(Enqueued::Empty);
        }

        let now = self.output.current_time();
        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration_secs();

        let id = self.next_id;
        self.next_id += 1;

        let playback = ScheduledPlayback {
            id,
            buffer: Arc::new(buffer),
            start_at,
            handle: PlaybackHandle::default(),
        };

        if let Err(e) = self.output.schedule(&playback) {
            tracing::warn!(error = %e, "failed to schedule playback, dropping packet");
            return Ok(Enqueued::Rejected);
        }

        self.next_start_time = start_at + duration;
        self.live.push_back(playback);

        tracing::trace!(id, start_at, duration, now, "playback scheduled");
        Ok(Enqueued::Scheduled {
            id,
            start_at,
            duration,
        })
    }

    /// Record that a buffer finished on its own
    ///
    /// Returns `true` when this emptied the live set (playback drained). Ids that are no
    /// longer live, e.g. stopped by an interrupt, are ignored
    pub fn on_ended(&mut self, id: PlaybackId) -> bool {
        let Some(index) = self.live.iter().position(|p| p.id == id) else {
            return false;
        };
        self.live.remove(index);
        self.live.is_empty()
    }

    /// Stop everything immediately and forget the queued timeline
    pub fn interrupt(&mut self) {
        let stopped = self.live.len();
        for playback in self.live.drain(..) {
            playback.handle.cancel();
            self.output.stop(playback.id);
        }
        self.next_start_time = 0.0;

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
    }

    /// Stop playback and close the output graph
    pub fn close(&mut self) {
        self.interrupt();
        if !self.closed {
            self.output.close();
            self.closed = true;
        }
    }

    /// Number of buffers scheduled and not yet finished
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live buffers in start order
    pub fn live(&self) -> impl Iterator<Item = &ScheduledPlayback> {
        self.live.iter()
    }

    /// Offset at which the next buffer would start if the clock were behind it
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Current output clock position
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// Whether the output graph has been closed
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::Result;

    #[derive(Default)]
    struct Recorded {
        clock: Cell<f64>,
        stopped: Cell<usize>,
        closed: Cell<usize>,
        refuse: Cell<bool>,
    }

    struct TestOutput(Rc<Recorded>);

    impl AudioOutput for TestOutput {
        fn current_time(&self) -> f64 {
            self.0.clock.get()
        }

        fn schedule(&mut self, _playback: &ScheduledPlayback) -> Result<()> {
            if self.0.refuse.get() {
                return Err(crate::Error::Audio("device lost".to_string()));
            }
            Ok(())
        }

        fn stop(&mut self, _id: PlaybackId) {
            self.0.stopped.set(self.0.stopped.get() + 1);
        }

        fn close(&mut self) {
            self.0.closed.set(self.0.closed.get() + 1);
        }
    }

    fn scheduler() -> (PlaybackScheduler, Rc<Recorded>, MuteFlag) {
        let recorded = Rc::new(Recorded::default());
        let mute = MuteFlag::new();
        let scheduler =
            PlaybackScheduler::new(Box::new(TestOutput(Rc::clone(&recorded))), mute.clone());
        (scheduler, recorded, mute)
    }

    /// Packet of `secs` seconds of quiet tone at the playback rate
    fn packet(secs: f64) -> AudioPacket {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let len = (secs * f64::from(codec::PLAYBACK_SAMPLE_RATE)) as usize;
        AudioPacket::inbound(codec::encode(&vec![0.1; len]).data())
    }

    fn start_of(outcome: Enqueued) -> f64 {
        match outcome {
            Enqueued::Scheduled { start_at, .. } => start_at,
            other => panic!("expected scheduled, got {other:?}"),
        }
    }

    #[test]
    fn test_burst_queues_back_to_back() {
        let (mut s, recorded, _) = scheduler();
        recorded.clock.set(2.0);

        let a = start_of(s.enqueue(&packet(0.5)).unwrap());
        let b = start_of(s.enqueue(&packet(0.25)).unwrap());
        let c = start_of(s.enqueue(&packet(0.5)).unwrap());

        assert!((a - 2.0).abs() < 1e-9);
        assert!((b - 2.5).abs() < 1e-9);
        assert!((c - 2.75).abs() < 1e-9);
        assert_eq!(s.live_count(), 3);
    }

    #[test]
    fn test_gap_collapses_to_current_time() {
        let (mut s, recorded, _) = scheduler();
        let first = start_of(s.enqueue(&packet(0.5)).unwrap());
        assert!(first.abs() < 1e-9);

        // Clock moved well past the end of the first buffer
        recorded.clock.set(3.0);
        let second = start_of(s.enqueue(&packet(0.5)).unwrap());
        assert!((second - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ended_reports_drain_only_when_empty() {
        let (mut s, _, _) = scheduler();
        let Enqueued::Scheduled { id: first, .. } = s.enqueue(&packet(0.1)).unwrap() else {
            panic!("expected scheduled");
        };
        let Enqueued::Scheduled { id: second, .. } = s.enqueue(&packet(0.1)).unwrap() else {
            panic!("expected scheduled");
        };

        assert!(!s.on_ended(first));
        assert!(!s.on_ended(first));
        assert!(s.on_ended(second));
        assert_eq!(s.live_count(), 0);
    }

    #[test]
    fn test_interrupt_clears_and_resets_timeline() {
        let (mut s, recorded, _) = scheduler();
        recorded.clock.set(1.0);
        s.enqueue(&packet(0.5)).unwrap();
        s.enqueue(&packet(0.5)).unwrap();
        let handles: Vec<_> = s.live().map(|p| p.handle().clone()).collect();

        s.interrupt();
        assert_eq!(s.live_count(), 0);
        assert!(s.next_start_time().abs() < f64::EPSILON);
        assert_eq!(recorded.stopped.get(), 2);
        assert!(handles.iter().all(PlaybackHandle::is_cancelled));

        recorded.clock.set(1.2);
        let next = start_of(s.enqueue(&packet(0.5)).unwrap());
        assert!((next - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_muted_packets_are_not_decoded_or_kept() {
        let (mut s, _, mute) = scheduler();
        mute.set(true);

        // Even a malformed packet is simply dropped while muted
        assert_eq!(
            s.enqueue(&AudioPacket::inbound("%%%")).unwrap(),
            Enqueued::Suppressed
        );
        assert_eq!(s.enqueue(&packet(0.5)).unwrap(), Enqueued::Suppressed);
        assert_eq!(s.live_count(), 0);

        mute.set(false);
        assert!(matches!(
            s.enqueue(&packet(0.5)).unwrap(),
            Enqueued::Scheduled { .. }
        ));
        assert_eq!(s.live_count(), 1);
    }

    #[test]
    fn test_bad_packet_leaves_state_untouched() {
        let (mut s, _, _) = scheduler();
        s.enqueue(&packet(0.5)).unwrap();
        let before = s.next_start_time();

        assert!(s.enqueue(&AudioPacket::inbound("@@@")).is_err());
        assert_eq!(s.live_count(), 1);
        assert!((s.next_start_time() - before).abs() < f64::EPSILON);
    }

    #[test]
    fn test_device_refusal_is_not_reported_as_mute() {
        let (mut s, recorded, _) = scheduler();
        s.enqueue(&packet(0.5)).unwrap();
        let before = s.next_start_time();

        recorded.refuse.set(true);
        assert_eq!(s.enqueue(&packet(0.5)).unwrap(), Enqueued::Rejected);
        assert_eq!(s.live_count(), 1);
        assert!((s.next_start_time() - before).abs() < f64::EPSILON);

        recorded.refuse.set(false);
        let next = start_of(s.enqueue(&packet(0.5)).unwrap());
        assert!((next - before).abs() < 1e-9);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut s, recorded, _) = scheduler();
        s.enqueue(&packet(0.1)).unwrap();
        s.close();
        s.close();
        assert_eq!(recorded.closed.get(), 1);
        assert!(s.is_closed());
        assert_eq!(s.enqueue(&packet(0.1)).unwrap(), Enqueued::Suppressed);
    }
}
