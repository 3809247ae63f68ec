//! Audio processing module
//!
//! Handles PCM encoding, microphone capture, and gapless playback scheduling.

pub mod codec;
mod capture;
mod device;
mod mute;
mod playback;

pub use capture::{
    CaptureEncoder, CaptureFrame, CaptureSettings, DEFAULT_FRAME_SIZE, DEFAULT_VAD_THRESHOLD,
    FrameAccumulator,
};
pub use codec::{
    AudioPacket, CAPTURE_SAMPLE_RATE, CodecError, DecodedBuffer, PLAYBACK_SAMPLE_RATE, rms,
};
pub use device::{
    AudioBackend, AudioOutput, CpalBackend, CpalInput, CpalOutput, EndNotifier, FrameSink,
    InputTrack,
};
pub use mute::MuteFlag;
pub use playback::{Enqueued, PlaybackHandle, PlaybackId, PlaybackScheduler, ScheduledPlayback};
