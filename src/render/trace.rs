//! Time-domain trace widget
//!
//! Draws a display snapshot as amplitude over time. Windows wider than the
//! widget are reduced to a min/max envelope per pixel column.

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, Shape, Stroke, Vec2};

use crate::audio::Sample;
use crate::display::DisplaySnapshot;

/// Display settings for the trace
#[derive(Clone)]
pub struct TraceSettings {
    pub color: Color32,
    pub background: Color32,
    pub line_width: f32,
    /// Vertical gain; 1.0 maps full scale to the widget height
    pub zoom: f32,
    pub show_graticule: bool,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            color: Color32::from_rgb(255, 80, 80),
            background: Color32::from_rgb(15, 15, 20),
            line_width: 1.0,
            zoom: 1.0,
            show_graticule: true,
        }
    }
}

/// Amplitude-over-time widget
#[derive(Default)]
pub struct Trace {
    pub settings: TraceSettings,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    fn amplitude_to_y(&self, value: Sample, rect: Rect) -> f32 {
        let norm = (f32::from(value) / 32768.0 * self.settings.zoom).clamp(-1.0, 1.0);
        rect.center().y - norm * rect.height() * 0.5
    }

    pub fn show(&mut self, ui: &mut egui::Ui, snapshot: DisplaySnapshot<'_>) -> egui::Response {
        let size = ui.available_size().max(Vec2::new(100.0, 60.0));
        let (response, painter) = ui.allocate_painter(size, egui::Sense::hover());
        let rect = response.rect;

        painter.rect_filled(rect, 4.0, self.settings.background);

        if self.settings.show_graticule {
            self.draw_graticule(&painter, rect, snapshot.duration());
        }

        if !snapshot.is_empty() {
            self.draw_trace(&painter, rect, snapshot.samples);
        }

        response
    }

    fn draw_graticule(&self, painter: &egui::Painter, rect: Rect, duration: f64) {
        let grid_color = Color32::from_rgba_unmultiplied(80, 80, 90, 100);
        let axis_color = Color32::from_rgba_unmultiplied(110, 110, 120, 150);
        let text_color = Color32::from_gray(150);

        let stroke_grid = Stroke::new(0.5, grid_color);
        let stroke_axis = Stroke::new(1.0, axis_color);

        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let x = rect.left() + t * rect.width();
            painter.line_segment(
                [Pos2::new(x, rect.top()), Pos2::new(x, rect.bottom())],
                stroke_grid,
            );
        }
        for i in 0..=8 {
            let y = rect.top() + i as f32 / 8.0 * rect.height();
            let stroke = if i == 4 { stroke_axis } else { stroke_grid };
            painter.line_segment(
                [Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)],
                stroke,
            );
        }

        let font = FontId::monospace(10.0);
        painter.text(
            rect.left_bottom() + Vec2::new(4.0, -4.0),
            Align2::LEFT_BOTTOM,
            "0 s",
            font.clone(),
            text_color,
        );
        painter.text(
            rect.right_bottom() + Vec2::new(-4.0, -4.0),
            Align2::RIGHT_BOTTOM,
            format!("{:.2} s", duration),
            font,
            text_color,
        );
    }

    fn draw_trace(&self, painter: &egui::Painter, rect: Rect, samples: &[Sample]) {
        let stroke = Stroke::new(self.settings.line_width, self.settings.color);
        let columns = rect.width().max(1.0) as usize;

        let points: Vec<Pos2> = if samples.len() <= columns * 2 {
            let step = rect.width() / (samples.len().max(2) - 1) as f32;
            samples
                .iter()
                .enumerate()
                .map(|(i, &s)| {
                    Pos2::new(rect.left() + i as f32 * step, self.amplitude_to_y(s, rect))
                })
                .collect()
        } else {
            let step = rect.width() / columns as f32;
            column_envelope(samples, columns)
                .into_iter()
                .enumerate()
                .flat_map(|(i, (lo, hi))| {
                    let x = rect.left() + i as f32 * step;
                    [
                        Pos2::new(x, self.amplitude_to_y(lo, rect)),
                        Pos2::new(x, self.amplitude_to_y(hi, rect)),
                    ]
                })
                .collect()
        };

        if points.len() >= 2 {
            painter.add(Shape::line(points, stroke));
        }
    }
}

/// Min/max of each of `columns` equal slices of `samples`
fn column_envelope(samples: &[Sample], columns: usize) -> Vec<(Sample, Sample)> {
    if samples.is_empty() || columns == 0 {
        return Vec::new();
    }

    (0..columns)
        .filter_map(|c| {
            let start = c * samples.len() / columns;
            let end = ((c + 1) * samples.len() / columns).max(start + 1).min(samples.len());
            let slice = samples.get(start..end)?;
            let lo = slice.iter().copied().min()?;
            let hi = slice.iter().copied().max()?;
            Some((lo, hi))
        })
        .collect()
}
