//! Audio module - handles audio input, sample handoff and recording
//!
//! This module provides:
//! - Lock-free sample ring between the audio callback and the UI tick
//! - Audio input capture
//! - WAV recording

mod buffer;
mod input;
mod recorder;

pub use buffer::{RingStats, Sample, SampleConsumer, SampleRing};
pub use input::{
    list_input_devices, CaptureConfig, CaptureSource, CaptureState, DeviceSelector,
    InputDeviceInfo,
};
pub use recorder::{RecordingFormat, WavRecorder};

#[cfg(test)]
pub(crate) use recorder::tests::{decode_wav, FlakySink};
