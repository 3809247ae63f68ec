//! PCM wire codec
//!
//! Converts between f32 samples and base64-encoded 16-bit little-endian PCM packets.
//! Outbound packets carry the capture rate, inbound packets are always played back at
//! [`PLAYBACK_SAMPLE_RATE`]; the two rates are never mixed up.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Sample rate for audio capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthetic speech returned by the model
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Scale between f32 samples and signed 16-bit PCM
const PCM_SCALE: f32 = 32768.0;

/// Errors decoding an inbound packet
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded payload cannot be split into 16-bit samples
    #[error("odd pcm byte length: {0}")]
    OddLength(usize),
}

/// A mono PCM packet as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    data: String,
    sample_rate: u32,
}

impl AudioPacket {
    /// Wrap an inbound base64 payload (implicitly at the playback rate)
    #[must_use]
    pub fn inbound(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }

    /// Base64 payload
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Sample rate the payload is tagged with
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Mime tag for the wire, e.g. `audio/pcm;rate=16000`
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Samples recovered from an inbound packet
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedBuffer {
    /// Build a buffer from raw samples at the given rate
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decoded samples in [-1, 1]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Playback rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Whether the buffer holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Take the samples out of the buffer
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Encode captured samples into an outbound packet
///
/// Samples are scaled by 32768 and truncated toward zero; values at or past full scale
/// saturate to the i16 range. No resampling is done, so `samples` must already be at
/// [`CAPTURE_SAMPLE_RATE`]
#[must_use]
pub fn encode(samples: &[f32]) -> AudioPacket {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // `as` saturates out-of-range floats
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * PCM_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    AudioPacket {
        data: STANDARD.encode(bytes),
        sample_rate: CAPTURE_SAMPLE_RATE,
    }
}

/// Decode an inbound packet into playable samples
///
/// # Errors
///
/// Returns [`CodecError`] if the payload is not base64 or has an odd byte count
pub fn decode(packet: &AudioPacket) -> Result<DecodedBuffer, CodecError> {
    let bytes = STANDARD.decode(packet.data.as_bytes())?;
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM_SCALE)
        .collect();

    Ok(DecodedBuffer::new(samples, PLAYBACK_SAMPLE_RATE))
}

/// Root-mean-square loudness of a frame
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
