//! Brush-mask editor: stroke capture, pan/zoom view transform and mask
//! rasterization for image-to-image requests.

mod editor;
mod mask;
mod viewport;

use serde::{Deserialize, Serialize};

pub use editor::{CanvasEditor, CursorPreview, Interaction, Modifiers, PointerButton};
pub use mask::{
    compose_preview, export_mask, export_mask_png, rasterize_mask, smooth_polyline,
    StrokeDocument, PREVIEW_ALPHA, SPLINE_TENSION,
};
pub use viewport::{view_size, Viewport, MAX_VIEW_HEIGHT, MAX_VIEW_WIDTH, ZOOM_STEP};

pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 100.0;
pub const DEFAULT_BRUSH_SIZE: f32 = 20.0;
pub const DEFAULT_BRUSH_OPACITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Freehand stroke in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub width: f32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 {
    1.0
}

/// Brush size is in screen pixels; opacity only affects the preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushSettings {
    size: f32,
    opacity: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_BRUSH_SIZE,
            opacity: DEFAULT_BRUSH_OPACITY,
        }
    }
}

impl BrushSettings {
    pub fn new(size: f32, opacity: f32) -> Self {
        let mut brush = Self::default();
        brush.set_size(size);
        brush.set_opacity(opacity);
        brush
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = if size.is_finite() {
            size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE)
        } else {
            DEFAULT_BRUSH_SIZE
        };
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            DEFAULT_BRUSH_OPACITY
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brush_settings_clamp_to_control_ranges() {
        let brush = BrushSettings::new(250.0, 1.7);
        assert_eq!(brush.size(), MAX_BRUSH_SIZE);
        assert_eq!(brush.opacity(), 1.0);

        let mut brush = BrushSettings::default();
        brush.set_size(0.2);
        brush.set_opacity(-0.5);
        assert_eq!(brush.size(), MIN_BRUSH_SIZE);
        assert_eq!(brush.opacity(), 0.0);

        brush.set_size(f32::NAN);
        assert_eq!(brush.size(), DEFAULT_BRUSH_SIZE);
    }

    #[test]
    fn stroke_opacity_defaults_when_missing() -> anyhow::Result<()> {
        let stroke: Stroke =
            serde_json::from_str(r#"{"points":[{"x":1.0,"y":2.0}],"width":4.0}"#)?;
        assert_eq!(stroke.opacity, 1.0);
        assert_eq!(stroke.points, vec![Point::new(1.0, 2.0)]);
        Ok(())
    }
}
