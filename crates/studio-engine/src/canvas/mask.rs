use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use studio_contracts::payload::{ImageData, DEFAULT_IMAGE_MIME};

use super::{Point, Stroke};

pub const SPLINE_TENSION: f32 = 0.5;
/// Preview strokes are black at this alpha, times the stroke opacity.
pub const PREVIEW_ALPHA: f32 = 0.7;

const MASK_BACKGROUND: Luma<u8> = Luma([0]);
const MASK_PAINT: Luma<u8> = Luma([255]);
const MAX_SEGMENT_STEPS: usize = 32;

/// Strokes saved alongside the size of the image they were drawn on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeDocument {
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub strokes: Vec<Stroke>,
}

impl StrokeDocument {
    pub fn new(image_width: u32, image_height: u32, strokes: Vec<Stroke>) -> Self {
        Self {
            image_width,
            image_height,
            strokes,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strokes from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid stroke document {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Strokes mapped onto an image of `width`x`height`, rescaling when the
    /// document was drawn against a different size.
    pub fn strokes_for(&self, width: u32, height: u32) -> Vec<Stroke> {
        if self.image_width == 0
            || self.image_height == 0
            || (self.image_width, self.image_height) == (width, height)
        {
            return self.strokes.clone();
        }
        let sx = width as f32 / self.image_width as f32;
        let sy = height as f32 / self.image_height as f32;
        let width_scale = (sx + sy) / 2.0;
        self.strokes
            .iter()
            .map(|stroke| Stroke {
                points: stroke
                    .points
                    .iter()
                    .map(|point| Point::new(point.x * sx, point.y * sy))
                    .collect(),
                width: stroke.width * width_scale,
                opacity: stroke.opacity,
            })
            .collect()
    }
}

/// Cardinal-spline subdivision through `points`. Fewer than three points
/// are returned unchanged.
pub fn smooth_polyline(points: &[Point], tension: f32) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let last = points.len() - 1;
    let mut out = Vec::with_capacity(points.len() * 4);
    out.push(points[0]);
    for i in 0..last {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(last)];
        let m1 = Point::new((p2.x - p0.x) * tension, (p2.y - p0.y) * tension);
        let m2 = Point::new((p3.x - p1.x) * tension, (p3.y - p1.y) * tension);

        let steps = segment_steps(p1, p2);
        for step in 1..=steps {
            let t = step as f32 / steps as f32;
            let t2 = t * t;
            let t3 = t2 * t;
            let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
            let h10 = t3 - 2.0 * t2 + t;
            let h01 = -2.0 * t3 + 3.0 * t2;
            let h11 = t3 - t2;
            out.push(Point::new(
                h00 * p1.x + h10 * m1.x + h01 * p2.x + h11 * m2.x,
                h00 * p1.y + h10 * m1.y + h01 * p2.y + h11 * m2.y,
            ));
        }
    }
    out
}

fn segment_steps(a: Point, b: Point) -> usize {
    let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    ((length / 2.0).ceil() as usize).clamp(1, MAX_SEGMENT_STEPS)
}

/// Black mask of `width`x`height` with every stroke painted white.
///
/// Opacity is ignored: the mask is strictly binary.
pub fn rasterize_mask(strokes: &[Stroke], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, MASK_BACKGROUND);
    for stroke in strokes {
        for_each_covered_pixel(stroke, width, height, |x, y| {
            mask.put_pixel(x, y, MASK_PAINT);
        });
    }
    mask
}

pub fn export_mask_png(strokes: &[Stroke], width: u32, height: u32) -> Result<Vec<u8>> {
    let mask = rasterize_mask(strokes, width, height);
    let mut bytes = Vec::new();
    mask.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode mask")?;
    Ok(bytes)
}

pub fn export_mask(strokes: &[Stroke], width: u32, height: u32) -> Result<ImageData> {
    let bytes = export_mask_png(strokes, width, height)?;
    Ok(ImageData::from_bytes(&bytes, DEFAULT_IMAGE_MIME))
}

/// Source image with the strokes laid over it in translucent black.
pub fn compose_preview(source: &RgbaImage, strokes: &[Stroke]) -> RgbaImage {
    let (width, height) = source.dimensions();
    let mut preview = source.clone();
    for stroke in strokes {
        let alpha = (PREVIEW_ALPHA * stroke.opacity.clamp(0.0, 1.0)).clamp(0.0, 1.0);
        if alpha <= 0.0 {
            continue;
        }
        // A stroke is composited once, so self-overlap does not darken it.
        let coverage = rasterize_mask(std::slice::from_ref(stroke), width, height);
        for (x, y, covered) in coverage.enumerate_pixels() {
            if covered[0] == 0 {
                continue;
            }
            let pixel = preview.get_pixel_mut(x, y);
            let Rgba([r, g, b, a]) = *pixel;
            let darken = |channel: u8| (channel as f32 * (1.0 - alpha)).round() as u8;
            let out_alpha = a as f32 + (255.0 - a as f32) * alpha;
            *pixel = Rgba([darken(r), darken(g), darken(b), out_alpha.round() as u8]);
        }
    }
    preview
}

fn for_each_covered_pixel(
    stroke: &Stroke,
    width: u32,
    height: u32,
    mut paint: impl FnMut(u32, u32),
) {
    if width == 0 || height == 0 || !stroke.width.is_finite() || stroke.width <= 0.0 {
        return;
    }
    let radius = (stroke.width / 2.0).max(0.5);
    let path = smooth_polyline(&stroke.points, SPLINE_TENSION);
    let segments: Vec<(Point, Point)> = match path.as_slice() {
        [] => return,
        [only] => vec![(*only, *only)],
        many => many.windows(2).map(|pair| (pair[0], pair[1])).collect(),
    };
    for (a, b) in segments {
        let min_x = clamp_index(a.x.min(b.x) - radius, width);
        let max_x = clamp_index(a.x.max(b.x) + radius, width);
        let min_y = clamp_index(a.y.min(b.y) - radius, height);
        let max_y = clamp_index(a.y.max(b.y) + radius, height);
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                if distance_to_segment(center, a, b) <= radius {
                    paint(x, y);
                }
            }
        }
    }
}

fn clamp_index(value: f32, size: u32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value.floor() as u32).min(size - 1)
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let (nx, ny) = (a.x + dx * t, a.y + dy * t);
    ((p.x - nx).powi(2) + (p.y - ny).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(points: &[(f32, f32)], width: f32, opacity: f32) -> Stroke {
        Stroke {
            points: points.iter().map(|(x, y)| Point::new(*x, *y)).collect(),
            width,
            opacity,
        }
    }

    #[test]
    fn mask_dimensions_always_match_the_image() -> Result<()> {
        let strokes = vec![stroke(&[(-50.0, -50.0), (5000.0, 5000.0)], 30.0, 1.0)];
        for (width, height) in [(1, 1), (37, 91), (640, 480)] {
            let data = export_mask(&strokes, width, height)?;
            assert_eq!(data.mime_type, "image/png");
            assert_eq!(data.dimensions()?, (width, height));
        }
        assert!(export_mask(&[], 12, 7)?.dimensions()? == (12, 7));
        Ok(())
    }

    #[test]
    fn strokes_paint_white_on_black_with_round_caps() {
        let mask = rasterize_mask(&[stroke(&[(10.0, 10.0), (30.0, 10.0)], 6.0, 0.2)], 40, 20);
        assert_eq!(mask.get_pixel(20, 10)[0], 255);
        // Round cap extends past the endpoint by the radius.
        assert_eq!(mask.get_pixel(31, 10)[0], 255);
        assert_eq!(mask.get_pixel(20, 16)[0], 0);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert!(mask.pixels().all(|pixel| pixel[0] == 0 || pixel[0] == 255));
    }

    #[test]
    fn single_point_stroke_is_a_dot() {
        let mask = rasterize_mask(&[stroke(&[(10.0, 10.0)], 8.0, 1.0)], 20, 20);
        assert_eq!(mask.get_pixel(10, 10)[0], 255);
        assert_eq!(mask.get_pixel(12, 12)[0], 255);
        assert_eq!(mask.get_pixel(16, 10)[0], 0);
    }

    #[test]
    fn smoothing_passes_through_control_points() {
        let points = [
            Point::new(0.0, 0.0),
            Point::new(20.0, 10.0),
            Point::new(40.0, 0.0),
        ];
        let smooth = smooth_polyline(&points, SPLINE_TENSION);
        assert!(smooth.len() > points.len());
        assert_eq!(smooth.first(), Some(&points[0]));
        assert_eq!(smooth.last(), Some(&points[2]));
        assert!(smooth
            .iter()
            .any(|point| (point.x - 20.0).abs() < 1e-4 && (point.y - 10.0).abs() < 1e-4));
        assert_eq!(smooth_polyline(&points[..2], SPLINE_TENSION), points[..2].to_vec());
    }

    #[test]
    fn preview_darkens_by_opacity() {
        let source = RgbaImage::from_pixel(10, 10, Rgba([200, 100, 40, 255]));
        let preview = compose_preview(&source, &[stroke(&[(5.0, 5.0)], 4.0, 0.5)]);
        let covered = preview.get_pixel(5, 5);
        // 0.7 * 0.5 = 0.35 black over the source.
        assert_eq!(*covered, Rgba([130, 65, 26, 255]));
        assert_eq!(*preview.get_pixel(0, 0), Rgba([200, 100, 40, 255]));
    }

    #[test]
    fn stroke_documents_rescale_to_the_target_image() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("strokes.json");
        let document = StrokeDocument::new(100, 50, vec![stroke(&[(10.0, 10.0)], 4.0, 1.0)]);
        document.save(&path)?;

        let loaded = StrokeDocument::load(&path)?;
        assert_eq!(loaded, document);
        assert_eq!(loaded.strokes_for(100, 50), document.strokes);

        let scaled = loaded.strokes_for(200, 100);
        assert_eq!(scaled[0].points, vec![Point::new(20.0, 20.0)]);
        assert_eq!(scaled[0].width, 8.0);
        Ok(())
    }
}
