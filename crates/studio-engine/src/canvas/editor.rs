use super::viewport::{view_size, Viewport};
use super::{BrushSettings, Point, Stroke};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interaction {
    Idle,
    Drawing,
    Panning { last: Point },
}

/// Brush outline drawn under the pointer, in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorPreview {
    pub center: Point,
    pub radius: f32,
}

/// Interaction state of the mask canvas for one source image.
///
/// Strokes are only ever appended while an image is loaded; loading a new
/// image starts a new session.
#[derive(Debug, Clone)]
pub struct CanvasEditor {
    image_width: u32,
    image_height: u32,
    view_width: f32,
    view_height: f32,
    viewport: Viewport,
    brush: BrushSettings,
    strokes: Vec<Stroke>,
    interaction: Interaction,
    cursor: Option<CursorPreview>,
    mask_revision: u64,
}

impl CanvasEditor {
    pub fn new(image_width: u32, image_height: u32, brush: BrushSettings) -> Self {
        let mut editor = Self {
            image_width: 0,
            image_height: 0,
            view_width: 0.0,
            view_height: 0.0,
            viewport: Viewport::default(),
            brush,
            strokes: Vec::new(),
            interaction: Interaction::Idle,
            cursor: None,
            mask_revision: 0,
        };
        editor.load_image(image_width, image_height);
        editor
    }

    pub fn load_image(&mut self, image_width: u32, image_height: u32) {
        let (view_width, view_height) = view_size(image_width, image_height);
        self.image_width = image_width;
        self.image_height = image_height;
        self.view_width = view_width;
        self.view_height = view_height;
        self.viewport = Viewport::fit(image_width, image_height, view_width, view_height);
        self.strokes.clear();
        self.interaction = Interaction::Idle;
        self.cursor = None;
        self.mask_revision += 1;
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    pub fn view_size(&self) -> (f32, f32) {
        (self.view_width, self.view_height)
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn brush(&self) -> &BrushSettings {
        &self.brush
    }

    pub fn brush_mut(&mut self) -> &mut BrushSettings {
        &mut self.brush
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn interaction(&self) -> Interaction {
        self.interaction
    }

    pub fn cursor(&self) -> Option<CursorPreview> {
        self.cursor
    }

    /// Bumped whenever the stroke list changes; callers re-export the mask
    /// when it moves.
    pub fn mask_revision(&self) -> u64 {
        self.mask_revision
    }

    pub fn pointer_down(&mut self, pos: Point, button: PointerButton, modifiers: Modifiers) {
        if button == PointerButton::Middle || modifiers.meta {
            self.interaction = Interaction::Panning { last: pos };
            return;
        }
        self.interaction = Interaction::Drawing;
        self.strokes.push(Stroke {
            points: vec![self.viewport.screen_to_image(pos)],
            width: self.brush.size() / self.viewport.scale,
            opacity: self.brush.opacity(),
        });
        self.mask_revision += 1;
    }

    pub fn pointer_move(&mut self, pos: Point) -> CursorPreview {
        match self.interaction {
            Interaction::Panning { last } => {
                self.viewport.pan_by(pos.x - last.x, pos.y - last.y);
                self.interaction = Interaction::Panning { last: pos };
            }
            Interaction::Drawing => {
                let point = self.viewport.screen_to_image(pos);
                if let Some(stroke) = self.strokes.last_mut() {
                    stroke.points.push(point);
                    self.mask_revision += 1;
                }
            }
            Interaction::Idle => {}
        }
        let preview = CursorPreview {
            center: pos,
            radius: self.brush.size() / 2.0,
        };
        self.cursor = Some(preview);
        preview
    }

    pub fn pointer_up(&mut self) {
        self.interaction = Interaction::Idle;
    }

    pub fn pointer_leave(&mut self) {
        self.interaction = Interaction::Idle;
        self.cursor = None;
    }

    pub fn wheel(&mut self, pos: Point, delta_y: f32) {
        self.viewport.zoom_at(pos, delta_y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> CanvasEditor {
        // 1200x800 fits at scale 0.5 with no offset.
        CanvasEditor::new(1200, 800, BrushSettings::new(20.0, 0.6))
    }

    #[test]
    fn drawing_records_strokes_in_image_space() {
        let mut editor = editor();
        editor.pointer_down(Point::new(10.0, 20.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Point::new(30.0, 40.0));
        editor.pointer_up();
        editor.pointer_move(Point::new(300.0, 300.0));

        let strokes = editor.strokes();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].points, vec![Point::new(20.0, 40.0), Point::new(60.0, 80.0)]);
        assert_eq!(strokes[0].width, 40.0);
        assert_eq!(strokes[0].opacity, 0.6);
        assert_eq!(editor.interaction(), Interaction::Idle);
    }

    #[test]
    fn middle_button_or_meta_pans_instead_of_drawing() {
        let mut editor = editor();
        editor.pointer_down(Point::new(100.0, 100.0), PointerButton::Middle, Modifiers::default());
        editor.pointer_move(Point::new(130.0, 90.0));
        editor.pointer_up();
        assert_eq!(editor.viewport().offset, Point::new(30.0, -10.0));

        editor.pointer_down(
            Point::new(0.0, 0.0),
            PointerButton::Primary,
            Modifiers { meta: true },
        );
        editor.pointer_move(Point::new(5.0, 5.0));
        assert_eq!(editor.viewport().offset, Point::new(35.0, -5.0));
        assert!(editor.strokes().is_empty());
    }

    #[test]
    fn stroke_width_compensates_for_zoom() {
        let mut editor = editor();
        editor.wheel(Point::new(0.0, 0.0), 1.0);
        editor.pointer_down(Point::new(55.0, 55.0), PointerButton::Primary, Modifiers::default());
        let expected = 20.0 / (0.5 * 1.1);
        assert!((editor.strokes()[0].width - expected).abs() < 1e-3);
    }

    #[test]
    fn cursor_preview_tracks_pointer_until_leave() {
        let mut editor = editor();
        let preview = editor.pointer_move(Point::new(42.0, 24.0));
        assert_eq!(preview.radius, 10.0);
        assert_eq!(editor.cursor(), Some(preview));

        editor.pointer_down(Point::new(42.0, 24.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_leave();
        assert_eq!(editor.cursor(), None);
        assert_eq!(editor.interaction(), Interaction::Idle);
    }

    #[test]
    fn loading_an_image_starts_a_new_session() {
        let mut editor = editor();
        editor.pointer_down(Point::new(1.0, 1.0), PointerButton::Primary, Modifiers::default());
        let revision = editor.mask_revision();
        editor.pointer_move(Point::new(2.0, 2.0));
        assert!(editor.mask_revision() > revision);

        editor.load_image(300, 200);
        assert!(editor.strokes().is_empty());
        assert_eq!(editor.image_size(), (300, 200));
        assert_eq!(editor.view_size(), (300.0, 200.0));
        assert_eq!(editor.viewport().scale, 1.0);
    }
}
