//! Microphone capture and framing
//!
//! Device callbacks deliver chunks of whatever size the driver likes; the encoder cuts
//! them into fixed frames, measures loudness and encodes each frame for the wire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::{self, AudioPacket};
use super::device::{AudioBackend, FrameSink, InputTrack};
use crate::Result;

/// Samples per outbound frame (256ms at 16kHz)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// RMS above which a frame counts as voice activity
pub const DEFAULT_VAD_THRESHOLD: f32 = 0.02;

/// One encoded frame ready to send
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Wire packet
    pub packet: AudioPacket,
    /// Loudness of the frame
    pub rms: f32,
    /// Whether `rms` exceeded the activation threshold
    pub voice_active: bool,
}

/// Framing and encoding parameters
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Samples per frame
    pub frame_size: usize,
    /// Voice activity threshold
    pub vad_threshold: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            vad_threshold: DEFAULT_VAD_THRESHOLD,
        }
    }
}

/// Cuts arbitrary sample chunks into fixed-size frames
#[derive(Debug)]
pub struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    /// Create an accumulator; a zero frame size is treated as one sample
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }

        let rest = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.frame_size).map(<[f32]>::to_vec).collect()
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Owns the microphone for one session and turns its samples into outbound frames
pub struct CaptureEncoder {
    settings: CaptureSettings,
    frames: FrameAccumulator,
    attached: Arc<AtomicBool>,
    track: Option<Box<dyn InputTrack>>,
}

impl CaptureEncoder {
    /// Request the microphone and start forwarding its samples to `sink`
    ///
    /// Samples only reach `sink` while the encoder is attached; after [`detach`] the
    /// device callback becomes a no-op even if the driver fires once more
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PermissionDenied`] if the microphone cannot be opened
    ///
    /// [`detach`]: Self::detach
    pub fn start(
        backend: &dyn AudioBackend,
        settings: CaptureSettings,
        sink: FrameSink,
    ) -> Result<Self> {
        let attached = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&attached);
        let gated: FrameSink = Arc::new(move |samples: &[f32]| {
            if gate.load(Ordering::Acquire) {
                sink(samples);
            }
        });

        let track = backend.open_input(gated)?;
        tracing::debug!(
            frame_size = settings.frame_size,
            threshold = settings.vad_threshold,
            "capture started"
        );

        Ok(Self {
            settings,
            frames: FrameAccumulator::new(settings.frame_size),
            attached,
            track: Some(track),
        })
    }

    /// Frame, measure and encode newly captured samples
    pub fn process(&mut self, samples: &[f32]) -> Vec<CaptureFrame> {
        if !self.is_attached() {
            return Vec::new();
        }

        self.frames
            .push(samples)
            .into_iter()
            .map(|frame| {
                let rms = codec::rms(&frame);
                CaptureFrame {
                    packet: codec::encode(&frame),
                    rms,
                    voice_active: rms > self.settings.vad_threshold,
                }
            })
            .collect()
    }

    /// Stop delivering samples; later device callbacks are ignored
    pub fn detach(&mut self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            self.frames.clear();
            tracing::debug!("capture detached");
        }
    }

    /// Stop the microphone track
    pub fn release(&mut self) {
        if let Some(mut track) = self.track.take() {
            track.stop();
            tracing::debug!("microphone released");
        }
    }

    /// Whether samples are still being delivered
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Whether the microphone track is still held
    #[must_use]
    pub const fn holds_microphone(&self) -> bool {
        self.track.is_some()
    }
}

impl Drop for CaptureEncoder {
    fn drop(&mut self) {
        self.detach();
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audio::device::{AudioOutput, EndNotifier};
    use crate::Error;

    #[derive(Default)]
    struct MicBackend {
        sink: Mutex<Option<FrameSink>>,
        stopped: Arc<AtomicBool>,
        deny: bool,
    }

    struct MicTrack(Arc<AtomicBool>);

    impl InputTrack for MicTrack {
        fn stop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    impl AudioBackend for MicBackend {
        fn open_input(&self, sink: FrameSink) -> Result<Box<dyn InputTrack>> {
            if self.deny {
                return Err(Error::PermissionDenied("denied".to_string()));
            }
            *self.sink.lock().unwrap() = Some(sink);
            Ok(Box::new(MicTrack(Arc::clone(&self.stopped))))
        }

        fn open_output(&self, _on_ended: EndNotifier) -> Result<Box<dyn AudioOutput>> {
            Err(Error::Audio("no output in this test".to_string()))
        }
    }

    #[test]
    fn test_accumulator_splits_across_chunks() {
        let mut acc = FrameAccumulator::new(4);
        assert!(acc.push(&[0.0; 3]).is_empty());
        assert_eq!(acc.pending(), 3);

        let frames = acc.push(&[1.0; 6]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(frames[1], vec![1.0; 4]);
        assert_eq!(acc.pending(), 1);
    }

    #[test]
    fn test_process_flags_voice_activity() {
        let backend = MicBackend::default();
        let settings = CaptureSettings {
            frame_size: 8,
            vad_threshold: DEFAULT_VAD_THRESHOLD,
        };
        let mut capture =
            CaptureEncoder::start(&backend, settings, Arc::new(|_: &[f32]| {})).unwrap();

        let quiet = capture.process(&[0.01; 8]);
        assert_eq!(quiet.len(), 1);
        assert!(!quiet[0].voice_active);

        let loud = capture.process(&[0.05, -0.05, 0.05, -0.05, 0.05, -0.05, 0.05, -0.05]);
        assert_eq!(loud.len(), 1);
        assert!(loud[0].voice_active);
        assert!((loud[0].rms - 0.05).abs() < 1e-6);
        assert_eq!(loud[0].packet.sample_rate(), codec::CAPTURE_SAMPLE_RATE);
    }

    #[test]
    fn test_detached_callback_is_a_no_op() {
        let backend = MicBackend::default();
        let delivered = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&delivered);
        let mut capture = CaptureEncoder::start(
            &backend,
            CaptureSettings::default(),
            Arc::new(move |s: &[f32]| *counter.lock().unwrap() += s.len()),
        )
        .unwrap();

        let device_sink = backend.sink.lock().unwrap().clone().unwrap();
        device_sink(&[0.0; 10]);
        assert_eq!(*delivered.lock().unwrap(), 10);

        capture.detach();
        device_sink(&[0.0; 10]);
        assert_eq!(*delivered.lock().unwrap(), 10);
        assert!(capture.process(&[0.5; 8192]).is_empty());

        capture.release();
        capture.release();
        assert!(backend.stopped.load(Ordering::Acquire));
        assert!(!capture.holds_microphone());
    }

    #[test]
    fn test_denied_microphone_never_starts() {
        let backend = MicBackend {
            deny: true,
            ..Default::default()
        };
        let result =
            CaptureEncoder::start(&backend, CaptureSettings::default(), Arc::new(|_: &[f32]| {}));
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }
}
