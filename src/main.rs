//! audioscope - Audio Oscilloscope
//!
//! Captures mono 16-bit audio from an input device and shows the most recent
//! window of samples as a scrolling time-domain trace. The stream can be
//! recorded to a WAV file while it is displayed.

use eframe::egui;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

mod audio;
mod display;
mod engine;
mod error;
mod render;
mod settings;

use audio::{DeviceSelector, InputDeviceInfo};
use engine::ScopeEngine;
use render::Trace;
use settings::AppSettings;

/// Ticks run back to back within one frame before the timer is resynced
const MAX_CATCH_UP_TICKS: u32 = 8;

fn main() -> eframe::Result<()> {
    env_logger::init();
    log::info!("Starting audioscope");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 500.0])
            .with_title("audioscope"),
        ..Default::default()
    };

    eframe::run_native(
        "audioscope",
        options,
        Box::new(|cc| Ok(Box::new(ScopeApp::new(cc)))),
    )
}

struct ScopeApp {
    settings: AppSettings,
    engine: ScopeEngine,
    trace: Trace,
    devices: Vec<InputDeviceInfo>,
    next_tick: Instant,
    show_settings: bool,
    status: String,
}

impl ScopeApp {
    fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();

        let devices = match audio::list_input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::error!("{}", e);
                Vec::new()
            }
        };
        for (i, device) in devices.iter().enumerate() {
            match device.default_sample_rate {
                Some(rate) => log::info!("Input {}: {} ({} Hz)", i, device.name, rate),
                None => log::info!("Input {}: {}", i, device.name),
            }
        }

        let engine = ScopeEngine::new(settings.capture_config(), settings.layout());
        let mut app = Self {
            settings: settings.clone(),
            engine,
            trace: Trace::new(),
            devices,
            next_tick: Instant::now(),
            show_settings: false,
            status: String::new(),
        };
        settings.apply(&mut app);
        app.start_capture();
        app
    }

    fn start_capture(&mut self) {
        match self.engine.start_capture() {
            Ok(()) => {
                self.next_tick = Instant::now() + self.engine.tick_interval();
                self.status = format!(
                    "Capturing from {}",
                    self.engine.stats().device.unwrap_or_default()
                );
            }
            Err(e) => {
                log::error!("Failed to start capture: {}", e);
                self.status = format!("Error: {}", e);
            }
        }
    }

    fn toggle_capture(&mut self) {
        if self.engine.capture_state().accepts_samples() {
            self.engine.stop_capture();
            self.status = "Stopped".to_string();
        } else {
            self.start_capture();
        }
    }

    fn toggle_recording(&mut self) {
        if self.engine.is_recording() {
            match self.engine.stop_recording() {
                Ok(()) => self.status = "Recording saved".to_string(),
                Err(e) => self.status = format!("Error: {}", e),
            }
            return;
        }

        let mut dialog = rfd::FileDialog::new()
            .add_filter("WAV", &["wav"])
            .set_file_name(default_recording_name());
        if let Some(dir) = &self.settings.record_dir {
            dialog = dialog.set_directory(dir);
        }
        let Some(path) = dialog.save_file() else {
            return;
        };

        match self.engine.start_recording(&path) {
            Ok(()) => {
                self.settings.record_dir = path.parent().map(PathBuf::from);
                self.status = format!("Recording to {}", path.display());
            }
            Err(e) => {
                log::error!("Failed to start recording: {}", e);
                self.status = format!("Error: {}", e);
            }
        }
    }

    /// Run every tick that has come due since the last frame.
    ///
    /// Returns true if the display window changed.
    fn run_ticks(&mut self) -> bool {
        let interval = self.engine.tick_interval();
        let now = Instant::now();
        let mut ticks = 0;
        let mut redraw = false;

        while self.next_tick <= now {
            let report = self.engine.tick();
            redraw |= report.redraw();
            if report.overrun > 0 {
                self.status = format!("Display fell behind, {} samples dropped", report.overrun);
            }
            if report.capture_failed {
                self.status = "Error: input stream failed".to_string();
            }
            if let Some(e) = report.recording_error {
                self.status = format!("Recording stopped: {}", e);
            }

            self.next_tick += interval;
            ticks += 1;
            if ticks >= MAX_CATCH_UP_TICKS {
                self.next_tick = now + interval;
                break;
            }
        }
        redraw
    }

    fn selected_device_label(&self) -> String {
        if let Some(name) = self.engine.stats().device {
            return name;
        }
        match &self.engine.config().device {
            DeviceSelector::Default => "Default".to_string(),
            selector => selector.to_string(),
        }
    }
}

impl eframe::App for ScopeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Keep ticking after a stop until the ring has drained
        if self.engine.capture_state().accepts_samples() || self.engine.ring().available() > 0 {
            if self.run_ticks() {
                ctx.request_repaint();
            }
            ctx.request_repaint_after(self.next_tick.saturating_duration_since(Instant::now()));
        }

        let streaming = self.engine.capture_state().accepts_samples();
        let recording = self.engine.is_recording();
        let mut toggle_capture = false;
        let mut toggle_recording = false;

        // Top panel
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("audioscope");
                ui.separator();

                // Device selector; takes effect on the next capture start
                ui.add_enabled_ui(!streaming, |ui| {
                    egui::ComboBox::from_id_salt("device")
                        .selected_text(self.selected_device_label())
                        .show_ui(ui, |ui| {
                            if ui
                                .selectable_label(
                                    self.engine.config().device == DeviceSelector::Default,
                                    "Default",
                                )
                                .clicked()
                            {
                                self.engine.set_device(DeviceSelector::Default);
                            }
                            for device in &self.devices {
                                let selector = DeviceSelector::Exact(device.name.clone());
                                let selected = self.engine.config().device == selector;
                                if ui.selectable_label(selected, &device.name).clicked() {
                                    self.engine.set_device(selector);
                                }
                            }
                        });
                });

                ui.separator();

                let capture_text = if streaming { "⏹ Stop" } else { "▶ Capture" };
                if ui.button(capture_text).clicked() {
                    toggle_capture = true;
                }

                let record_text = if recording { "⏹ Stop Recording" } else { "⏺ Record" };
                let record_button = egui::Button::new(record_text);
                if ui.add_enabled(streaming || recording, record_button).clicked() {
                    toggle_recording = true;
                }

                ui.separator();
                ui.label(&self.status);

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.toggle_value(&mut self.show_settings, "⚙ Settings");
                });
            });
        });

        if toggle_capture {
            self.toggle_capture();
        }
        if toggle_recording {
            self.toggle_recording();
        }

        // Settings panel
        if self.show_settings {
            egui::SidePanel::right("settings_panel")
                .min_width(200.0)
                .show(ctx, |ui| {
                    ui.heading("Settings");
                    ui.separator();

                    ui.collapsing("Display", |ui| {
                        ui.horizontal(|ui| {
                            ui.label("Zoom:");
                            ui.add(
                                egui::Slider::new(&mut self.trace.settings.zoom, 0.25..=16.0)
                                    .logarithmic(true),
                            );
                        });

                        ui.horizontal(|ui| {
                            ui.label("Line width:");
                            ui.add(egui::Slider::new(
                                &mut self.trace.settings.line_width,
                                0.5..=5.0,
                            ));
                        });

                        ui.checkbox(&mut self.trace.settings.show_graticule, "Show grid");
                    });

                    ui.separator();

                    ui.collapsing("Capture", |ui| {
                        let config = self.engine.config();
                        let window = self.engine.snapshot();
                        ui.label(format!("Sample rate: {} Hz", config.sample_rate));
                        ui.label(format!("Chunk: {} samples", config.chunk_size));
                        ui.label(format!(
                            "Window: {} samples ({:.2} s)",
                            window.len(),
                            window.duration()
                        ));
                        ui.label(format!("Ring: {} samples", self.engine.ring().capacity()));
                        ui.small("Edit settings.json to change these.");
                    });
                });
        }

        // Status bar
        egui::TopBottomPanel::bottom("status_panel").show(ctx, |ui| {
            let stats = self.engine.stats();
            ui.horizontal(|ui| {
                ui.small(format!("State: {}", stats.state.name()));
                ui.separator();
                ui.small(format!("Captured: {}", stats.ring.written));
                ui.separator();
                ui.small(format!(
                    "Buffered: {}/{}",
                    stats.ring.available, stats.ring.capacity
                ));
                ui.separator();
                ui.small(format!("Overruns: {}", stats.ring.overruns));
                ui.separator();
                ui.small(format!("Discarded: {}", stats.ring.discarded));
                if let Some(rec) = &stats.recording {
                    ui.separator();
                    let name = rec
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    ui.small(format!(
                        "Recording {}: {} written, {} lost",
                        name, rec.samples_written, rec.samples_lost
                    ));
                }
                if let Some(err) = self.engine.last_error() {
                    ui.separator();
                    ui.small(err);
                }
            });
        });

        // Main trace display
        egui::CentralPanel::default().show(ctx, |ui| {
            self.trace.show(ui, self.engine.snapshot());
        });
    }
}

impl Drop for ScopeApp {
    fn drop(&mut self) {
        self.engine.shutdown();

        let mut settings = self.settings.clone();
        settings.update_from_app(self);
        settings.save();
    }
}

fn default_recording_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    format!("audioscope-{}.wav", secs)
}
