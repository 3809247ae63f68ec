//! Audio device seams and the cpal implementation
//!
//! The session only talks to [`AudioBackend`], [`InputTrack`] and [`AudioOutput`], so the
//! scheduling and lifecycle logic runs the same against real hardware and against
//! manual-clock fakes in tests.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};

use super::codec::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use super::playback::{PlaybackHandle, PlaybackId, ScheduledPlayback};
use crate::{Error, Result};

/// Receives raw microphone samples (mono, capture rate) from the device thread
pub type FrameSink = Arc<dyn Fn(&[f32]) + Send + Sync>;

/// Told when a scheduled buffer finished playing on its own
pub type EndNotifier = Arc<dyn Fn(PlaybackId) + Send + Sync>;

/// An open microphone
pub trait InputTrack {
    /// Stop the track and release the device. Must be idempotent
    fn stop(&mut self);
}

/// An output graph with its own playback clock
pub trait AudioOutput {
    /// Current playback position on the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Queue a buffer to start at `playback.start_at` on the output clock
    ///
    /// # Errors
    ///
    /// Returns error if the output graph is closed
    fn schedule(&mut self, playback: &ScheduledPlayback) -> Result<()>;

    /// Stop a scheduled buffer immediately, without an end notification
    fn stop(&mut self, id: PlaybackId);

    /// Tear the graph down. Must be idempotent
    fn close(&mut self);
}

/// Opens input and output graphs for a session
pub trait AudioBackend {
    /// Request the microphone and start delivering frames to `sink`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if the microphone is refused or missing
    fn open_input(&self, sink: FrameSink) -> Result<Box<dyn InputTrack>>;

    /// Open the speaker graph
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open_output(&self, on_ended: EndNotifier) -> Result<Box<dyn AudioOutput>>;
}

/// Default-device backend built on cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// Create the backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(&self, sink: FrameSink) -> Result<Box<dyn InputTrack>> {
        Ok(Box::new(CpalInput::open(sink)?))
    }

    fn open_output(&self, on_ended: EndNotifier) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(CpalOutput::open(on_ended)?))
    }
}

/// Microphone stream from the default input device
pub struct CpalInput {
    stream: Option<Stream>,
}

impl CpalInput {
    /// Open the default input device at the capture rate
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] if no device can be opened
    pub fn open(sink: FrameSink) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = CAPTURE_SAMPLE_RATE,
            channels,
            "audio capture initialized"
        );

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        sink(data);
                    } else {
                        let mono = downmix(data, channels);
                        sink(&mono);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?;

        tracing::debug!("audio capture started");
        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl InputTrack for CpalInput {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One buffer queued on the output clock
struct Voice {
    id: PlaybackId,
    samples: Arc<[f32]>,
    start_frame: u64,
    handle: PlaybackHandle,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared with the output callback
#[derive(Default)]
struct Mixer {
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    /// Queue a voice, never earlier than the next frame to be rendered
    fn push(&mut self, mut voice: Voice) {
        voice.start_frame = voice.start_frame.max(self.frames_rendered);
        self.voices.push(voice);
    }

    /// Fill `data` and return ids of buffers that finished during this period
    fn render(&mut self, data: &mut [f32], channels: usize) -> Vec<PlaybackId> {
        let base = self.frames_rendered;
        let mut frames = 0u64;

        for (offset, frame) in (0u64..).zip(data.chunks_mut(channels)) {
            let position = base + offset;
            let mut acc = 0.0f32;
            for voice in &self.voices {
                if voice.handle.is_cancelled() || position < voice.start_frame {
                    continue;
                }
                if let Ok(index) = usize::try_from(position - voice.start_frame) {
                    if let Some(sample) = voice.samples.get(index) {
                        acc += sample;
                    }
                }
            }
            frame.fill(acc.clamp(-1.0, 1.0));
            frames += 1;
        }

        self.frames_rendered += frames;
        let now = self.frames_rendered;

        let mut ended = Vec::new();
        self.voices.retain(|voice| {
            if voice.handle.is_cancelled() {
                false
            } else if voice.end_frame() <= now {
                ended.push(voice.id);
                false
            } else {
                true
            }
        });
        ended
    }
}

/// Speaker graph on the default output device
///
/// The graph renders continuously from the moment it opens; its clock is the number of
/// frames rendered so far
pub struct CpalOutput {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
}

impl CpalOutput {
    /// Open the default output device at the playback rate
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(on_ended: EndNotifier) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels,
            "audio playback initialized"
        );

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let render_mixer = Arc::clone(&mixer);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let ended = render_mixer
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .render(data, channels);
                    for id in ended {
                        on_ended(id);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
        })
    }
}

impl AudioOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        let frames = self
            .mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames_rendered;
        frames as f64 / f64::from(PLAYBACK_SAMPLE_RATE)
    }

    fn schedule(&mut self, playback: &ScheduledPlayback) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("output graph closed".to_string()));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (playback.start_at() * f64::from(PLAYBACK_SAMPLE_RATE)).round() as u64;

        // The callback may have advanced the clock since `start_at` was read
        self.mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Voice {
                id: playback.id(),
                samples: Arc::from(playback.buffer().samples()),
                start_frame,
                handle: playback.handle().clone(),
            });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.mixer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .voices
            .retain(|voice| voice.id != id);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.mixer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .voices
                .clear();
            tracing::debug!("audio playback closed");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Average interleaved frames down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            Error::PermissionDenied("input device not available".to_string())
        }
        other => Error::Audio(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: PlaybackId, start_frame: u64, len: usize) -> Voice {
        Voice {
            id,
            samples: Arc::from(vec![0.5f32; len]),
            start_frame,
            handle: PlaybackHandle::default(),
        }
    }

    #[test]
    fn test_mixer_plays_back_to_back_buffers() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(1, 0, 4));
        mixer.voices.push(voice(2, 4, 4));

        let mut out = vec![0.0f32; 6];
        let ended = mixer.render(&mut out, 1);
        assert_eq!(ended, vec![1]);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < f32::EPSILON));

        let mut out = vec![0.0f32; 4];
        let ended = mixer.render(&mut out, 1);
        assert_eq!(ended, vec![2]);
        assert!((out[1] - 0.5).abs() < f32::EPSILON);
        assert!(out[2].abs() < f32::EPSILON);
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_mixer_never_clips_a_late_voice() {
        let mut mixer = Mixer::default();
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1);

        // Scheduled for frame 2, but frames up to 4 already went out
        let mut late = voice(3, 2, 3);
        late.samples = Arc::from(vec![0.1f32, 0.2, 0.3]);
        mixer.push(late);
        assert_eq!(mixer.voices[0].start_frame, 4);

        let mut out = vec![0.0f32; 3];
        let ended = mixer.render(&mut out, 1);
        assert_eq!(ended, vec![3]);
        assert!((out[0] - 0.1).abs() < f32::EPSILON);
        assert!((out[2] - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mixer_skips_cancelled_voice_without_notifying() {
        let mut mixer = Mixer::default();
        let v = voice(7, 0, 8);
        v.handle.cancel();
        mixer.voices.push(v);

        let mut out = vec![1.0f32; 4];
        let ended = mixer.render(&mut out, 1);
        assert!(ended.is_empty());
        assert!(out.iter().all(|s| s.abs() < f32::EPSILON));
        assert!(mixer.voices.is_empty());
    }

    #[test]
    fn test_mixer_fills_every_channel() {
        let mut mixer = Mixer::default();
        mixer.voices.push(voice(1, 1, 2));

        let mut out = vec![9.0f32; 6];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(mixer.frames_rendered, 3);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }
}
