//! Wires capture → ring → {display, recording} and drives the consumer tick
//!
//! The engine lives on the UI thread. It owns the consumer half of the ring,
//! the display window and the optional recorder; the capture callback only
//! ever sees the producer half.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::{
    CaptureConfig, CaptureSource, CaptureState, DeviceSelector, RecordingFormat, RingStats, Sample,
    SampleConsumer, SampleRing, WavRecorder,
};
use crate::display::{DisplayBuffer, DisplaySnapshot};
use crate::error::{PersistError, ScopeError};

/// Sizing of the ring and the display window, in chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLayout {
    /// Chunks kept in the display window
    pub max_chunks: usize,
    /// Chunks the ring can hold before it starts overwriting
    pub ring_chunks: usize,
}

impl Default for EngineLayout {
    fn default() -> Self {
        Self {
            max_chunks: 40,
            ring_chunks: 8,
        }
    }
}

/// Recording in progress
struct ActiveRecording {
    recorder: WavRecorder,
    /// Ring overruns when recording started
    overruns_at_start: u64,
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Samples pulled from the ring
    pub pulled: usize,
    /// Samples lost to overrun since the previous tick
    pub overrun: u64,
    /// Set when the input stream died during this tick
    pub capture_failed: bool,
    /// Set when recording was disabled during this tick
    pub recording_error: Option<PersistError>,
}

impl TickReport {
    /// Whether the display window changed
    pub fn redraw(&self) -> bool {
        self.pulled > 0
    }
}

/// Counters for the status bar
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub state: CaptureState,
    pub device: Option<String>,
    pub ring: RingStats,
    pub recording: Option<RecordingStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingStats {
    pub path: PathBuf,
    pub samples_written: u64,
    /// Samples the ring overwrote while this recording was active
    pub samples_lost: u64,
}

/// Capture orchestrator
pub struct ScopeEngine {
    config: CaptureConfig,
    ring: SampleRing,
    consumer: SampleConsumer,
    capture: CaptureSource,
    display: DisplayBuffer,
    recording: Option<ActiveRecording>,
    /// Reused between ticks so pulling never allocates
    pulled: Vec<Sample>,
    last_overruns: u64,
    last_error: Option<String>,
}

impl ScopeEngine {
    pub fn new(config: CaptureConfig, layout: EngineLayout) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let capacity = layout.ring_chunks.max(1).saturating_mul(chunk_size);
        let (ring, consumer) = SampleRing::with_consumer(capacity);

        log::info!(
            "Engine: {} Hz, chunk {} samples, window {} chunks, ring {} samples",
            config.sample_rate,
            chunk_size,
            layout.max_chunks,
            ring.capacity()
        );

        Self {
            display: DisplayBuffer::new(layout.max_chunks, chunk_size, config.sample_rate),
            capture: CaptureSource::new(ring.clone()),
            consumer,
            ring,
            recording: None,
            pulled: Vec::with_capacity(chunk_size),
            last_overruns: 0,
            last_error: None,
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Choose another input device; applies on the next `start_capture`
    pub fn set_device(&mut self, device: DeviceSelector) {
        self.config.device = device;
    }

    /// Time between ticks: one chunk's worth of audio
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(
            self.config.chunk_size.max(1) as f64 / f64::from(self.config.sample_rate.max(1)),
        )
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current window for drawing
    pub fn snapshot(&self) -> DisplaySnapshot<'_> {
        self.display.snapshot()
    }

    /// Start capture. Does nothing if already streaming.
    pub fn start_capture(&mut self) -> Result<(), ScopeError> {
        self.capture.open(&self.config).map_err(|e| {
            self.last_error = Some(e.to_string());
            ScopeError::from(e)
        })?;
        self.last_error = None;
        Ok(())
    }

    /// Stop capture. Samples already in the ring still drain on later ticks.
    pub fn stop_capture(&mut self) {
        self.capture.stop();
    }

    /// Start writing pulled samples to `path`. Does nothing if already recording.
    pub fn start_recording(&mut self, path: impl AsRef<Path>) -> Result<(), ScopeError> {
        if self.recording.is_some() {
            return Ok(());
        }

        let format = RecordingFormat::new(self.config.sample_rate);
        let recorder = WavRecorder::open(path, format).map_err(|e| {
            self.last_error = Some(e.to_string());
            log::error!("Failed to start recording: {}", e);
            ScopeError::from(e)
        })?;

        self.attach_recorder(recorder);
        Ok(())
    }

    fn attach_recorder(&mut self, recorder: WavRecorder) {
        self.recording = Some(ActiveRecording {
            recorder,
            overruns_at_start: self.ring.stats().overruns,
        });
    }

    /// Finish the current recording. Does nothing if not recording.
    pub fn stop_recording(&mut self) -> Result<(), ScopeError> {
        let Some(mut active) = self.recording.take() else {
            return Ok(());
        };
        let lost = self
            .ring
            .stats()
            .overruns
            .saturating_sub(active.overruns_at_start);
        if lost > 0 {
            log::warn!(
                "{} samples were lost to overrun while recording {}",
                lost,
                active.recorder.path().display()
            );
        }
        active.recorder.close().map_err(|e| {
            self.last_error = Some(e.to_string());
            ScopeError::from(e)
        })
    }

    /// One consumer cycle: pull a chunk, shift the display, persist
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            capture_failed: self.capture.take_fault(),
            ..TickReport::default()
        };
        if report.capture_failed {
            self.last_error = Some("Input stream failed".to_string());
        }

        let chunk = self.config.chunk_size.max(1);
        report.pulled = self.consumer.pull_into(&mut self.pulled, chunk);

        let overruns = self.ring.stats().overruns;
        report.overrun = overruns.saturating_sub(self.last_overruns);
        self.last_overruns = self.last_overruns.max(overruns);
        if report.overrun > 0 {
            log::warn!("Ring overrun: {} samples dropped", report.overrun);
        }

        if report.pulled == 0 {
            return report;
        }

        self.display.shift_in(&self.pulled);

        if let Some(active) = self.recording.as_mut() {
            if let Err(e) = active.recorder.write(&self.pulled) {
                log::error!(
                    "Recording to {} failed, disabling it: {}",
                    active.recorder.path().display(),
                    e
                );
                self.last_error = Some(e.to_string());
                // Dropping the recorder tries to finalize what was written.
                self.recording = None;
                report.recording_error = Some(e);
            }
        }

        report
    }

    pub fn stats(&self) -> EngineStats {
        let ring = self.ring.stats();
        EngineStats {
            state: self.capture.state(),
            device: self.capture.device_name().map(str::to_string),
            recording: self.recording.as_ref().map(|active| RecordingStats {
                path: active.recorder.path().to_path_buf(),
                samples_written: active.recorder.samples_written(),
                samples_lost: ring.overruns.saturating_sub(active.overruns_at_start),
            }),
            ring,
        }
    }

    /// Stop everything, finalizing any recording
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop_recording() {
            log::warn!("Failed to close recording: {}", e);
        }
        self.stop_capture();
    }
}
