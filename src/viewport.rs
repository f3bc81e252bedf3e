//! Document image geometry: fit-to-container scale, zoom, highlight boxes and
//! pointer hit-testing. Everything here is a pure function of its inputs; the
//! review session decides when to recompute.

use serde::{Deserialize, Serialize};

use crate::models::{FieldSelection, HoverTarget};
use crate::types::{BoundingBox, ExtractedField};

pub const ZOOM_MIN: f64 = 0.5;
pub const ZOOM_MAX: f64 = 5.0;
pub const ZOOM_STEP: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64")]
pub struct Zoom(f64);

impl From<f64> for Zoom {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self(1.0)
    }
}

impl Zoom {
    /// Snapped to the step grid and clamped. Non-finite input resets to 1.0.
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            return Self::default();
        }
        let snapped = (value / ZOOM_STEP).round() * ZOOM_STEP;
        Self(snapped.clamp(ZOOM_MIN, ZOOM_MAX))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn zoom_in(self) -> Self {
        Self::new(self.0 + ZOOM_STEP)
    }

    pub fn zoom_out(self) -> Self {
        Self::new(self.0 - ZOOM_STEP)
    }

    pub fn reset(self) -> Self {
        Self::default()
    }

    /// Wheel zoom only with the modifier held; otherwise the container scrolls.
    pub fn wheel(self, delta_y: f64, modifier: bool) -> Self {
        if !modifier || delta_y == 0.0 || !delta_y.is_finite() {
            return self;
        }
        if delta_y < 0.0 {
            self.zoom_in()
        } else {
            self.zoom_out()
        }
    }

    pub fn percent_label(self) -> String {
        format!("{}%", (self.0 * 100.0).round() as i64)
    }
}

/// Layout limits of the image pane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    pub max_display_width: f64,
    pub container_padding: f64,
    pub label_font_px: f64,
    pub label_height: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            max_display_width: 1200.0,
            container_padding: 48.0,
            label_font_px: 12.0,
            label_height: 18.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayTransform {
    pub base_scale: f64,
    pub zoom: f64,
}

impl DisplayTransform {
    /// Fit an image of `(image_width, image_height)` into a container of
    /// `container_width`, then apply `zoom`. Degenerate sizes give a zero scale.
    pub fn compute(
        image_width: u32,
        image_height: u32,
        container_width: f64,
        zoom: Zoom,
        config: &OverlayConfig,
    ) -> Self {
        let base_scale = base_scale(image_width, image_height, container_width, config);
        Self {
            base_scale,
            zoom: zoom.value(),
        }
    }

    pub fn current_scale(&self) -> f64 {
        self.base_scale * self.zoom
    }

    /// Size the drawing surface takes at the current scale.
    pub fn surface_size(&self, image_width: u32, image_height: u32) -> (f64, f64) {
        let s = self.current_scale();
        (image_width as f64 * s, image_height as f64 * s)
    }
}

fn base_scale(w: u32, h: u32, container_width: f64, config: &OverlayConfig) -> f64 {
    if w == 0 || h == 0 || !container_width.is_finite() {
        return 0.0;
    }
    let (w, h) = (w as f64, h as f64);
    let available = (container_width - config.container_padding).max(0.0);
    let display_width = available.min(config.max_display_width.max(0.0));
    let display_height = display_width / (w / h);
    (display_width / w).min(display_height / h)
}

/// Rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn from_box(b: &BoundingBox, scale: f64) -> Self {
        let n = b.normalized();
        Self {
            x: n.x1 * scale,
            y: n.y1 * scale,
            width: (n.x2 - n.x1) * scale,
            height: (n.y2 - n.y1) * scale,
        }
    }

    /// Edges count as inside.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// First field in list order whose scaled box contains the point. Fields
/// without a box are skipped.
pub fn hit_test(
    fields: &[ExtractedField],
    transform: &DisplayTransform,
    px: f64,
    py: f64,
) -> Option<usize> {
    if !px.is_finite() || !py.is_finite() {
        return None;
    }
    let scale = transform.current_scale();
    fields.iter().position(|f| {
        f.coordinate
            .map(|b| Rect::from_box(&b, scale).contains(px, py))
            .unwrap_or(false)
    })
}

/// Measures label text in surface pixels.
pub trait TextMeasure {
    fn text_width(&self, text: &str, font_px: f64) -> f64;
}

/// Average-glyph estimate for a sans-serif label font.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedMeasure;

impl TextMeasure for EstimatedMeasure {
    fn text_width(&self, text: &str, font_px: f64) -> f64 {
        text.chars().count() as f64 * font_px * 0.6
    }
}

const PALETTE: [(u8, u8, u8); 8] = [
    (231, 76, 60),
    (52, 152, 219),
    (155, 89, 182),
    (46, 204, 113),
    (243, 156, 18),
    (26, 188, 156),
    (230, 126, 34),
    (22, 160, 133),
];

/// Colour for a field name: palette slots are handed out in first-appearance order.
pub fn field_color(fields: &[ExtractedField], name: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for f in fields {
        if !seen.contains(&f.name.as_str()) {
            seen.push(&f.name);
        }
        if f.name == name {
            break;
        }
    }
    let slot = seen.iter().position(|n| *n == name).unwrap_or(seen.len());
    let (r, g, b) = PALETTE[slot % PALETTE.len()];
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Emphasis {
    Selected,
    Hovered,
}

impl Emphasis {
    fn stroke_width(self) -> f64 {
        match self {
            Emphasis::Selected => 3.0,
            Emphasis::Hovered => 2.0,
        }
    }

    fn fill_alpha(self) -> f64 {
        match self {
            Emphasis::Selected => 0.25,
            Emphasis::Hovered => 0.12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayLabel {
    pub text: String,
    pub background: Rect,
    pub font_px: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayBox {
    pub field_index: usize,
    pub rect: Rect,
    pub color: String,
    pub stroke_width: f64,
    pub fill_alpha: f64,
    pub emphasis: Emphasis,
    pub label: OverlayLabel,
}

/// Everything the image pane paints for one redraw.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayFrame {
    pub surface_width: f64,
    pub surface_height: f64,
    pub scale: f64,
    pub boxes: Vec<OverlayBox>,
}

/// Only the selected and the hovered field get a box. When both resolve to the
/// same field it is drawn once, as selected.
pub fn overlay_frame(
    fields: &[ExtractedField],
    image_size: (u32, u32),
    transform: &DisplayTransform,
    selection: &FieldSelection,
    hover: &HoverTarget,
    config: &OverlayConfig,
    measure: &dyn TextMeasure,
) -> OverlayFrame {
    let (surface_width, surface_height) = transform.surface_size(image_size.0, image_size.1);
    let scale = transform.current_scale();

    let selected = selection.resolve(fields);
    let hovered = hover.resolve(fields).filter(|i| Some(*i) != selected);

    let boxes = [
        (selected, Emphasis::Selected),
        (hovered, Emphasis::Hovered),
    ]
    .into_iter()
    .filter_map(|(index, emphasis)| {
        let index = index?;
        let field = &fields[index];
        let rect = Rect::from_box(&field.coordinate?, scale);
        let text_width = measure.text_width(&field.name, config.label_font_px);
        let label = OverlayLabel {
            text: field.name.clone(),
            background: Rect {
                x: rect.x,
                y: rect.y - config.label_height,
                width: text_width + 8.0,
                height: config.label_height,
            },
            font_px: config.label_font_px,
        };
        Some(OverlayBox {
            field_index: index,
            rect,
            color: field_color(fields, &field.name),
            stroke_width: emphasis.stroke_width(),
            fill_alpha: emphasis.fill_alpha(),
            emphasis,
            label,
        })
    })
    .collect();

    OverlayFrame {
        surface_width,
        surface_height,
        scale,
        boxes,
    }
}
