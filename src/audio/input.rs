//! Audio input capture
//!
//! This module opens an input stream with cpal and pushes every chunk the
//! device delivers into the sample ring. The data callback only converts
//! samples into a preallocated scratch buffer and calls `push`: no locks, no
//! allocation, no I/O.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample as _;
use serde::{Deserialize, Serialize};

use super::buffer::{Sample, SampleProducer, SampleRing};
use crate::error::DeviceError;

/// Smallest scratch buffer handed to the callback, in frames
const MIN_SCRATCH_FRAMES: usize = 8192;

/// Strategy for picking an input device by its advertised name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeviceSelector {
    /// The host's default input device
    #[default]
    Default,
    /// Position in the host's device list
    Index(usize),
    /// Name must match exactly
    Exact(String),
    /// Name must contain this text (case-insensitive)
    Contains(String),
}

impl DeviceSelector {
    /// Find the selected device in a list of device names
    ///
    /// `Default` prefers the host's default device and falls back to the
    /// first one listed.
    pub fn position(&self, names: &[String], default_name: Option<&str>) -> Option<usize> {
        match self {
            Self::Default => default_name
                .and_then(|default| names.iter().position(|n| n == default))
                .or_else(|| (!names.is_empty()).then_some(0)),
            Self::Index(index) => (*index < names.len()).then_some(*index),
            Self::Exact(name) => names.iter().position(|n| n == name),
            Self::Contains(part) => {
                let part = part.to_lowercase();
                names.iter().position(|n| n.to_lowercase().contains(&part))
            }
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "the default device"),
            Self::Index(index) => write!(f, "device #{}", index),
            Self::Exact(name) => write!(f, "\"{}\"", name),
            Self::Contains(part) => write!(f, "a name containing \"{}\"", part),
        }
    }
}

/// Stream parameters, fixed for the lifetime of an open stream
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample; only 16-bit capture is supported
    pub sample_width: u16,
    /// Frames per hardware chunk we ask the device for
    pub chunk_size: usize,
    pub device: DeviceSelector,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            channels: 1,
            sample_width: 2,
            chunk_size: 1024,
            device: DeviceSelector::Default,
        }
    }
}

impl CaptureConfig {
    /// Reject formats we can never capture, before touching the hardware
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.sample_width != 2 || self.channels == 0 || self.sample_rate == 0 {
            return Err(self.unsupported());
        }
        Ok(())
    }

    fn unsupported(&self) -> DeviceError {
        DeviceError::UnsupportedFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_width: self.sample_width,
        }
    }
}

/// Capture lifecycle: `Closed → Opening → Streaming → Stopping → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CaptureState {
    #[default]
    Closed = 0,
    Opening = 1,
    Streaming = 2,
    Stopping = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Streaming,
            3 => Self::Stopping,
            _ => Self::Closed,
        }
    }

    /// Whether the callback should forward samples in this state
    pub fn accepts_samples(self) -> bool {
        matches!(self, Self::Opening | Self::Streaming)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Opening => "Opening",
            Self::Streaming => "Streaming",
            Self::Stopping => "Stopping",
        }
    }
}

/// Capture state shared with the audio callback
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// What the data callback tells its caller after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFlow {
    Continue,
    Stop,
}

/// Everything the audio callback owns
///
/// Multi-channel devices contribute their first channel only.
pub struct ChunkHandler {
    producer: SampleProducer,
    state: Arc<StateCell>,
    channels: usize,
    scratch: Box<[Sample]>,
}

impl ChunkHandler {
    fn new(
        producer: SampleProducer,
        state: Arc<StateCell>,
        channels: usize,
        scratch_frames: usize,
    ) -> Self {
        Self {
            producer,
            state,
            channels: channels.max(1),
            scratch: vec![0; scratch_frames.max(1)].into_boxed_slice(),
        }
    }

    /// Handle a chunk that is already 16-bit
    #[inline]
    pub fn on_native(&mut self, data: &[Sample]) -> CallbackFlow {
        if self.channels > 1 {
            return self.on_frames(data);
        }
        if !self.state.get().accepts_samples() {
            self.producer.discard(data.len());
            return CallbackFlow::Stop;
        }
        self.producer.push(data);
        CallbackFlow::Continue
    }

    /// Handle a chunk in any format cpal can convert to 16-bit
    #[inline]
    pub fn on_frames<T>(&mut self, data: &[T]) -> CallbackFlow
    where
        T: Copy,
        Sample: cpal::FromSample<T>,
    {
        let channels = self.channels;
        if !self.state.get().accepts_samples() {
            self.producer.discard(data.len() / channels);
            return CallbackFlow::Stop;
        }

        for batch in data.chunks(channels * self.scratch.len()) {
            let mut frames = 0;
            for (slot, frame) in self.scratch.iter_mut().zip(batch.chunks_exact(channels)) {
                *slot = Sample::from_sample(frame[0]);
                frames += 1;
            }
            self.producer.push(&self.scratch[..frames]);
        }
        CallbackFlow::Continue
    }
}

/// An input device as the host reports it
#[derive(Debug, Clone, PartialEq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub default_sample_rate: Option<u32>,
}

/// List every input device of the default host
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

    Ok(devices
        .map(|device| InputDeviceInfo {
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
            default_sample_rate: device
                .default_input_config()
                .ok()
                .map(|config| config.sample_rate().0),
        })
        .collect())
}

/// Audio input capture engine
pub struct CaptureSource {
    ring: SampleRing,

    /// Lifecycle state, shared with the callback
    state: Arc<StateCell>,

    /// Set by the stream's error callback
    faulted: Arc<AtomicBool>,

    /// The audio input stream
    stream: Option<cpal::Stream>,

    device_name: Option<String>,
}

impl CaptureSource {
    pub fn new(ring: SampleRing) -> Self {
        Self {
            ring,
            state: Arc::new(StateCell::default()),
            faulted: Arc::new(AtomicBool::new(false)),
            stream: None,
            device_name: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Open the device and start streaming into the ring
    ///
    /// Does nothing if a stream is already open.
    pub fn open(&mut self, config: &CaptureConfig) -> Result<(), DeviceError> {
        if self.state() != CaptureState::Closed {
            return Ok(());
        }
        config.validate()?;

        log::info!("Starting audio capture...");
        self.state.set(CaptureState::Opening);

        match self.open_stream(config) {
            Ok((stream, name)) => {
                self.state.set(CaptureState::Streaming);
                self.stream = Some(stream);
                log::info!("Capturing from {}", name);
                self.device_name = Some(name);
                Ok(())
            }
            Err(e) => {
                self.ring.close();
                self.state.set(CaptureState::Closed);
                log::error!("Failed to start capture: {}", e);
                Err(e)
            }
        }
    }

    fn open_stream(
        &mut self,
        config: &CaptureConfig,
    ) -> Result<(cpal::Stream, String), DeviceError> {
        let host = cpal::default_host();
        let device = select_device(&host, &config.device)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using input device: {}", name);

        let (stream_config, format) = negotiate(&device, config)?;
        log::info!("Audio config: {:?} ({:?})", stream_config, format);

        self.faulted.store(false, Ordering::Release);
        self.ring.reopen();
        let producer = self.ring.producer().ok_or(DeviceError::ProducerBusy)?;
        let handler = ChunkHandler::new(
            producer,
            Arc::clone(&self.state),
            stream_config.channels as usize,
            config.chunk_size.max(MIN_SCRATCH_FRAMES),
        );

        let faulted = Arc::clone(&self.faulted);
        let stream = match format {
            cpal::SampleFormat::I16 => {
                let mut handler = handler;
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let _ = handler.on_native(data);
                    },
                    error_callback(faulted),
                    None,
                )
            }
            cpal::SampleFormat::F32 => {
                build_converting::<f32>(&device, &stream_config, handler, faulted)
            }
            cpal::SampleFormat::I32 => {
                build_converting::<i32>(&device, &stream_config, handler, faulted)
            }
            cpal::SampleFormat::U16 => {
                build_converting::<u16>(&device, &stream_config, handler, faulted)
            }
            cpal::SampleFormat::I8 => {
                build_converting::<i8>(&device, &stream_config, handler, faulted)
            }
            cpal::SampleFormat::U8 => {
                build_converting::<u8>(&device, &stream_config, handler, faulted)
            }
            _ => return Err(config.unsupported()),
        }
        .map_err(|e| DeviceError::Build(e.to_string()))?;

        stream.play().map_err(|e| DeviceError::Play(e.to_string()))?;
        Ok((stream, name))
    }

    /// Stop capture. Pushes that race with this call are discarded.
    pub fn stop(&mut self) {
        self.ring.close();
        if self.stream.is_none() && self.state() == CaptureState::Closed {
            return;
        }

        self.state.set(CaptureState::Stopping);
        self.stream = None;
        self.state.set(CaptureState::Closed);
        log::info!("Capture stopped");
    }

    /// Stop the stream if the backend reported an error. Returns true if it did.
    pub fn take_fault(&mut self) -> bool {
        if !self.faulted.swap(false, Ordering::AcqRel) {
            return false;
        }
        log::error!("Input stream failed, stopping capture");
        self.stop();
        true
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn select_device(
    host: &cpal::Host,
    selector: &DeviceSelector,
) -> Result<cpal::Device, DeviceError> {
    let mut devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    selector
        .position(&names, default_name.as_deref())
        .map(|index| devices.swap_remove(index))
        .ok_or_else(|| DeviceError::NoMatchingDevice(selector.to_string()))
}

/// Preference order for native sample formats; `None` means we can't convert it
fn format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::I16 => Some(0),
        cpal::SampleFormat::F32 => Some(1),
        cpal::SampleFormat::I32 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        cpal::SampleFormat::I8 => Some(4),
        cpal::SampleFormat::U8 => Some(5),
        _ => None,
    }
}

/// Pick a supported stream config for the requested rate and channel count
fn negotiate(
    device: &cpal::Device,
    config: &CaptureConfig,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat), DeviceError> {
    let rate = cpal::SampleRate(config.sample_rate);

    let range = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Enumerate(e.to_string()))?
        .filter(|r| {
            r.channels() >= config.channels
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
                && format_rank(r.sample_format()).is_some()
        })
        .min_by_key(|r| (r.channels() != config.channels, format_rank(r.sample_format())))
        .ok_or_else(|| config.unsupported())?;

    let chunk = u32::try_from(config.chunk_size).ok();
    let buffer_size = match (range.buffer_size(), chunk) {
        (cpal::SupportedBufferSize::Range { min, max }, Some(chunk))
            if (*min..=*max).contains(&chunk) =>
        {
            cpal::BufferSize::Fixed(chunk)
        }
        _ => cpal::BufferSize::Default,
    };

    Ok((
        cpal::StreamConfig {
            channels: range.channels(),
            sample_rate: rate,
            buffer_size,
        },
        range.sample_format(),
    ))
}

fn build_converting<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut handler: ChunkHandler,
    faulted: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
    Sample: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let _ = handler.on_frames(data);
        },
        error_callback(faulted),
        None,
    )
}

fn error_callback(faulted: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        log::error!("Audio error: {}", err);
        faulted.store(true, Ordering::Release);
    }
}
