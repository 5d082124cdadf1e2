use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, DeviceSelector};
use crate::engine::EngineLayout;
use crate::ScopeApp;

/// Largest hardware chunk we ask the device for
const MAX_CHUNK_SIZE: usize = 1 << 16;

/// Upper bound on the samples held by the display window, and by the ring
const MAX_BUFFER_SAMPLES: usize = 1 << 21;

/// Returns the path to the settings file: `~/.config/audioscope/settings.json`
fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("audioscope");
    path.push("settings.json");
    path
}

/// Persisted application settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Capture
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
    pub chunk_size: usize,
    pub device: DeviceSelector,

    // Buffering
    pub max_chunks: usize,
    pub ring_chunks: usize,

    // Recording
    pub record_dir: Option<PathBuf>,

    // Display
    pub line_width: f32,
    pub zoom: f32,
    pub show_graticule: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        let layout = EngineLayout::default();
        Self {
            sample_rate: capture.sample_rate,
            channels: capture.channels,
            sample_width: capture.sample_width,
            chunk_size: capture.chunk_size,
            device: capture.device,

            max_chunks: layout.max_chunks,
            ring_chunks: layout.ring_chunks,

            record_dir: None,

            line_width: 1.0,
            zoom: 1.0,
            show_graticule: true,
        }
    }
}

impl AppSettings {
    /// Load settings from disk, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = settings_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings.sanitized()
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to disk as pretty JSON.
    pub fn save(&self) {
        let path = settings_path();
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!("Failed to write settings: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }

    /// Replace values the engine can't run with by their defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if self.sample_rate == 0 {
            log::warn!("Invalid sample rate 0, using {}", defaults.sample_rate);
            self.sample_rate = defaults.sample_rate;
        }
        if self.channels == 0 {
            log::warn!("Invalid channel count 0, using {}", defaults.channels);
            self.channels = defaults.channels;
        }
        if self.sample_width != 2 {
            log::warn!(
                "Only 16-bit capture is supported, ignoring sample width {}",
                self.sample_width
            );
            self.sample_width = defaults.sample_width;
        }
        if self.chunk_size == 0 {
            log::warn!("Invalid chunk size 0, using {}", defaults.chunk_size);
            self.chunk_size = defaults.chunk_size;
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            log::warn!(
                "Chunk size {} is too large, using {}",
                self.chunk_size,
                MAX_CHUNK_SIZE
            );
            self.chunk_size = MAX_CHUNK_SIZE;
        }

        // Both buffers are sized in chunks
        let chunk_limit = MAX_BUFFER_SAMPLES / self.chunk_size;
        if self.max_chunks == 0 {
            self.max_chunks = defaults.max_chunks.min(chunk_limit);
        }
        if self.max_chunks > chunk_limit {
            log::warn!(
                "Display window of {} chunks is too large, using {}",
                self.max_chunks,
                chunk_limit
            );
            self.max_chunks = chunk_limit;
        }
        if self.ring_chunks < 2 {
            log::warn!("Ring must hold at least 2 chunks, using {}", defaults.ring_chunks);
            self.ring_chunks = defaults.ring_chunks;
        }
        if self.ring_chunks > chunk_limit {
            log::warn!(
                "Ring of {} chunks is too large, using {}",
                self.ring_chunks,
                chunk_limit
            );
            self.ring_chunks = chunk_limit;
        }
        if self.line_width.is_nan() || self.line_width <= 0.0 {
            self.line_width = defaults.line_width;
        }
        if self.zoom.is_nan() || self.zoom <= 0.0 {
            self.zoom = defaults.zoom;
        }
        self
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_width: self.sample_width,
            chunk_size: self.chunk_size,
            device: self.device.clone(),
        }
    }

    pub fn layout(&self) -> EngineLayout {
        EngineLayout {
            max_chunks: self.max_chunks,
            ring_chunks: self.ring_chunks,
        }
    }

    /// Pull back the values the user can change while running.
    pub fn update_from_app(&mut self, app: &ScopeApp) {
        self.device = app.engine.config().device.clone();
        self.line_width = app.trace.settings.line_width;
        self.zoom = app.trace.settings.zoom;
        self.show_graticule = app.trace.settings.show_graticule;
    }

    /// Apply loaded display settings to the running application.
    pub fn apply(&self, app: &mut ScopeApp) {
        app.trace.settings.line_width = self.line_width;
        app.trace.settings.zoom = self.zoom;
        app.trace.settings.show_graticule = self.show_graticule;
    }
}
