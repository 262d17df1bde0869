//! Pointer gesture state machine for a single image view.
//!
//! The host feeds raw screen positions; the viewport maps them into image
//! pixels and the geometry functions turn the pointer delta into an edited
//! annotation. Applying the result to the store is up to the caller.

use super::{drag, hit_test, resize, DrawGesture, Hit, ResizeHandle};
use crate::config::EngineConfig;
use crate::model::{Annotation, AnnotationId, ClassId};

/// Active editing tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tool {
    #[default]
    Select,
    Rectangle,
}

/// Pan offset and zoom of the view, in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    /// Maps a screen position into image pixel space.
    pub fn to_image(&self, screen_x: f64, screen_y: f64) -> (f64, f64) {
        (
            (screen_x - self.offset_x) / self.zoom,
            (screen_y - self.offset_y) / self.zoom,
        )
    }
}

/// The gesture currently in progress.
#[derive(Clone, Debug, PartialEq)]
pub enum Gesture {
    Idle,
    Dragging {
        start_x: f64,
        start_y: f64,
        origin: Annotation,
    },
    Resizing {
        handle: ResizeHandle,
        start_x: f64,
        start_y: f64,
        origin: Annotation,
    },
    Drawing(DrawGesture),
}

/// Result of feeding one pointer event.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerUpdate {
    /// Nothing changed.
    Ignored,
    /// Live result of a drag or resize; replaces the annotation with the same id.
    Edited(Annotation),
    /// Rubber band of a rectangle being drawn.
    Preview(DrawGesture),
    /// A drawn rectangle large enough to keep.
    Committed(Annotation),
    /// A drawn rectangle that was too small.
    Discarded,
    /// A drag or resize ended.
    Released,
}

#[derive(Clone, Debug)]
pub struct Interaction {
    gesture: Gesture,
    image_width: f64,
    image_height: f64,
    handle_size_px: f64,
    min_draw_size_px: f64,
}

impl Interaction {
    pub fn new(config: &EngineConfig, image_width: f64, image_height: f64) -> Self {
        Self {
            gesture: Gesture::Idle,
            image_width,
            image_height,
            handle_size_px: config.handle_size_px,
            min_draw_size_px: config.min_draw_size_px,
        }
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.gesture, Gesture::Idle)
    }

    /// Starts a gesture.
    ///
    /// With [`Tool::Select`] a selected annotation is hit-tested (corner
    /// handles first, then the interior). With [`Tool::Rectangle`] a new draw
    /// is anchored at the pointer.
    pub fn pointer_down(
        &mut self,
        tool: Tool,
        selected: Option<&Annotation>,
        screen_x: f64,
        screen_y: f64,
        viewport: &Viewport,
    ) -> &Gesture {
        let (x, y) = viewport.to_image(screen_x, screen_y);

        if tool == Tool::Select {
            if let Some(ann) = selected {
                let hit = hit_test(
                    ann,
                    x,
                    y,
                    self.image_width,
                    self.image_height,
                    self.handle_size_px,
                    viewport.zoom,
                );
                match hit {
                    Some(Hit::Handle(handle)) => {
                        self.gesture = Gesture::Resizing {
                            handle,
                            start_x: x,
                            start_y: y,
                            origin: ann.clone(),
                        };
                    }
                    Some(Hit::Interior) => {
                        self.gesture = Gesture::Dragging {
                            start_x: x,
                            start_y: y,
                            origin: ann.clone(),
                        };
                    }
                    None => {}
                }
            }
        } else {
            self.gesture = Gesture::Drawing(DrawGesture::begin(x, y));
        }
        &self.gesture
    }

    pub fn pointer_move(&mut self, screen_x: f64, screen_y: f64, viewport: &Viewport) -> PointerUpdate {
        let (x, y) = viewport.to_image(screen_x, screen_y);
        match &mut self.gesture {
            Gesture::Idle => PointerUpdate::Ignored,
            Gesture::Dragging {
                start_x,
                start_y,
                origin,
            } => PointerUpdate::Edited(drag(
                origin,
                x - *start_x,
                y - *start_y,
                self.image_width,
                self.image_height,
            )),
            Gesture::Resizing {
                handle,
                start_x,
                start_y,
                origin,
            } => PointerUpdate::Edited(resize(
                origin,
                *handle,
                x - *start_x,
                y - *start_y,
                self.image_width,
                self.image_height,
            )),
            Gesture::Drawing(draw) => {
                draw.update(x, y);
                PointerUpdate::Preview(*draw)
            }
        }
    }

    /// Ends the gesture. A draw commits with `next_id` and `active_class`.
    pub fn pointer_up(&mut self, next_id: AnnotationId, active_class: ClassId) -> PointerUpdate {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => PointerUpdate::Ignored,
            Gesture::Dragging { .. } | Gesture::Resizing { .. } => PointerUpdate::Released,
            Gesture::Drawing(draw) => match draw.commit(
                self.min_draw_size_px,
                self.image_width,
                self.image_height,
                next_id,
                active_class,
            ) {
                Some(ann) => PointerUpdate::Committed(ann),
                None => PointerUpdate::Discarded,
            },
        }
    }

    /// Abandons the current gesture without committing anything.
    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction() -> Interaction {
        Interaction::new(&EngineConfig::default(), 100.0, 100.0)
    }

    #[test]
    fn test_viewport_maps_screen_to_image() {
        let viewport = Viewport {
            offset_x: 10.0,
            offset_y: 20.0,
            zoom: 2.0,
        };
        assert_eq!(viewport.to_image(30.0, 40.0), (10.0, 10.0));
    }

    #[test]
    fn test_draw_gesture_commits_with_active_class() {
        let mut it = interaction();
        let vp = Viewport::default();
        it.pointer_down(Tool::Rectangle, None, 10.0, 10.0, &vp);
        assert!(matches!(it.pointer_move(20.0, 20.0, &vp), PointerUpdate::Preview(_)));

        match it.pointer_up(AnnotationId(9), ClassId(1)) {
            PointerUpdate::Committed(ann) => {
                assert_eq!(ann.class_id, ClassId(1));
                assert_eq!(ann.id, AnnotationId(9));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        assert!(it.is_idle());
    }

    #[test]
    fn test_tiny_draw_is_discarded() {
        let mut it = interaction();
        let vp = Viewport::default();
        it.pointer_down(Tool::Rectangle, None, 10.0, 10.0, &vp);
        it.pointer_move(13.0, 13.0, &vp);
        assert_eq!(it.pointer_up(AnnotationId(0), ClassId(0)), PointerUpdate::Discarded);
    }

    #[test]
    fn test_select_interior_starts_drag() {
        let mut it = interaction();
        let vp = Viewport::default();
        let ann = Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 0.4, 0.4);
        it.pointer_down(Tool::Select, Some(&ann), 50.0, 50.0, &vp);
        assert!(matches!(it.gesture(), Gesture::Dragging { .. }));

        match it.pointer_move(60.0, 50.0, &vp) {
            PointerUpdate::Edited(moved) => assert!((moved.center_x - 0.6).abs() < 1e-9),
            other => panic!("expected edit, got {other:?}"),
        }
        assert_eq!(it.pointer_up(AnnotationId(0), ClassId(0)), PointerUpdate::Released);
    }

    #[test]
    fn test_select_corner_starts_resize() {
        let mut it = interaction();
        let vp = Viewport::default();
        let ann = Annotation::rectangle(0u64, 0usize, 0.5, 0.5, 0.4, 0.4);
        it.pointer_down(Tool::Select, Some(&ann), 70.0, 70.0, &vp);
        assert!(matches!(
            it.gesture(),
            Gesture::Resizing {
                handle: ResizeHandle::SouthEast,
                ..
            }
        ));
    }

    #[test]
    fn test_select_miss_stays_idle() {
        let mut it = interaction();
        let vp = Viewport::default();
        let ann = Annotation::rectangle(0u64, 0usize, 0.2, 0.2, 0.1, 0.1);
        it.pointer_down(Tool::Select, Some(&ann), 90.0, 90.0, &vp);
        assert!(it.is_idle());
        assert_eq!(it.pointer_move(95.0, 95.0, &vp), PointerUpdate::Ignored);
    }
}
