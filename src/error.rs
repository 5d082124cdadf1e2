//! Error types shared across the capture, recording and engine modules

use thiserror::Error;

/// Failures while opening the input stream. Fatal to capture start only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Failed to enumerate input devices: {0}")]
    Enumerate(String),

    #[error("No input device matches {0}")]
    NoMatchingDevice(String),

    #[error(
        "Unsupported format: {sample_rate} Hz, {channels} channel(s), \
         {sample_width} byte(s) per sample"
    )]
    UnsupportedFormat {
        sample_rate: u32,
        channels: u16,
        sample_width: u16,
    },

    #[error("Sample ring already has a writer")]
    ProducerBusy,

    #[error("Failed to build input stream: {0}")]
    Build(String),

    #[error("Failed to start input stream: {0}")]
    Play(String),
}

/// Failures while recording to disk. Disables recording, never capture.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Recording is closed")]
    Closed,
}

/// Any error the engine reports to its caller
#[derive(Error, Debug)]
pub enum ScopeError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}
