use super::Point;

pub const MAX_VIEW_WIDTH: f32 = 600.0;
pub const MAX_VIEW_HEIGHT: f32 = 600.0;
pub const ZOOM_STEP: f32 = 1.1;

/// Size of the on-screen canvas for an image: at most 600 wide, height
/// following the image aspect ratio.
pub fn view_size(image_width: u32, image_height: u32) -> (f32, f32) {
    if image_width == 0 || image_height == 0 {
        return (MAX_VIEW_WIDTH, MAX_VIEW_HEIGHT);
    }
    let width = (image_width as f32).min(MAX_VIEW_WIDTH);
    let height = width / image_width as f32 * image_height as f32;
    (width, height)
}

/// Maps image coordinates to screen coordinates: `screen = image * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub offset: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Point::default(),
        }
    }
}

impl Viewport {
    /// Scales the image down (never up) to fit 600x600 and centres it in the view.
    pub fn fit(image_width: u32, image_height: u32, view_width: f32, view_height: f32) -> Self {
        if image_width == 0 || image_height == 0 {
            return Self::default();
        }
        let (width, height) = (image_width as f32, image_height as f32);
        let scale = (MAX_VIEW_WIDTH / width)
            .min(MAX_VIEW_HEIGHT / height)
            .min(1.0);
        Self {
            scale,
            offset: Point::new(
                (view_width - width * scale) / 2.0,
                (view_height - height * scale) / 2.0,
            ),
        }
    }

    pub fn screen_to_image(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.offset.x) / self.scale,
            (screen.y - self.offset.y) / self.scale,
        )
    }

    pub fn image_to_screen(&self, image: Point) -> Point {
        Point::new(
            image.x * self.scale + self.offset.x,
            image.y * self.scale + self.offset.y,
        )
    }

    /// Positive `delta_y` zooms in by one step, anything else zooms out; the
    /// image point under `pointer` stays put.
    pub fn zoom_at(&mut self, pointer: Point, delta_y: f32) {
        let anchor = self.screen_to_image(pointer);
        self.scale = if delta_y > 0.0 {
            self.scale * ZOOM_STEP
        } else {
            self.scale / ZOOM_STEP
        };
        self.offset = Point::new(
            pointer.x - anchor.x * self.scale,
            pointer.y - anchor.y * self.scale,
        );
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.offset.x += dx;
        self.offset.y += dy;
    }
}
