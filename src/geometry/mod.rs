//! Geometry engine: normalized/pixel conversion and interactive edit math.
//!
//! Annotations store normalized centers. Two conversion functions exist and
//! they deliberately disagree about what `(x, y)` means:
//!
//! - [`to_pixel`] returns a **pixel-space center**.
//! - [`to_normalized`] takes a **top-left** pixel position and returns it
//!   normalized, still top-left. Callers that want a center add half the
//!   normalized extents afterwards, which is what [`resize`] and
//!   [`DrawGesture::commit`] do.

mod interaction;
mod rect;
mod space;

pub use interaction::{Gesture, Interaction, PointerUpdate, Tool, Viewport};
pub use rect::Rect;
pub use space::{Normalized, Pixel};

use crate::model::{Annotation, AnnotationId, ClassId};

/// Normalized annotation to pixels. The returned `(x, y)` is the box center.
pub fn to_pixel(annotation: &Annotation, image_width: f64, image_height: f64) -> Rect<Pixel> {
    Rect::new(
        annotation.center_x * image_width,
        annotation.center_y * image_height,
        annotation.width * image_width,
        annotation.height * image_height,
    )
}

/// Pixel rectangle to normalized fractions.
///
/// `(pixel_x, pixel_y)` is a top-left corner, so the returned `(x, y)` is a
/// normalized top-left corner, not a center.
pub fn to_normalized(
    pixel_x: f64,
    pixel_y: f64,
    pixel_width: f64,
    pixel_height: f64,
    image_width: f64,
    image_height: f64,
) -> Rect<Normalized> {
    Rect::new(
        pixel_x / image_width,
        pixel_y / image_height,
        pixel_width / image_width,
        pixel_height / image_height,
    )
}

/// Pixel rectangle of an annotation with `(x, y)` at its top-left corner.
pub fn pixel_bounds(annotation: &Annotation, image_width: f64, image_height: f64) -> Rect<Pixel> {
    let center = to_pixel(annotation, image_width, image_height);
    Rect::new(
        center.x - center.width / 2.0,
        center.y - center.height / 2.0,
        center.width,
        center.height,
    )
}

/// Moves an annotation by a pixel delta measured from the gesture start.
///
/// Only the center changes.
pub fn drag(start: &Annotation, dx: f64, dy: f64, image_width: f64, image_height: f64) -> Annotation {
    Annotation {
        center_x: start.center_x + dx / image_width,
        center_y: start.center_y + dy / image_height,
        ..start.clone()
    }
}

/// Corner handle grabbed during a resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResizeHandle {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

impl ResizeHandle {
    /// Hit-test order.
    pub const ALL: [ResizeHandle; 4] = [
        ResizeHandle::NorthWest,
        ResizeHandle::NorthEast,
        ResizeHandle::SouthWest,
        ResizeHandle::SouthEast,
    ];

    /// Sign applied to `dx` for width growth.
    fn x_sign(self) -> f64 {
        match self {
            ResizeHandle::NorthWest | ResizeHandle::SouthWest => -1.0,
            ResizeHandle::NorthEast | ResizeHandle::SouthEast => 1.0,
        }
    }

    /// Sign applied to `dy` for height growth.
    fn y_sign(self) -> f64 {
        match self {
            ResizeHandle::NorthWest | ResizeHandle::NorthEast => -1.0,
            ResizeHandle::SouthWest | ResizeHandle::SouthEast => 1.0,
        }
    }

    /// Corner position of a top-left based pixel rectangle.
    fn corner(self, bounds: &Rect<Pixel>) -> (f64, f64) {
        let x = match self {
            ResizeHandle::NorthWest | ResizeHandle::SouthWest => bounds.x,
            ResizeHandle::NorthEast | ResizeHandle::SouthEast => bounds.x + bounds.width,
        };
        let y = match self {
            ResizeHandle::NorthWest | ResizeHandle::NorthEast => bounds.y,
            ResizeHandle::SouthWest | ResizeHandle::SouthEast => bounds.y + bounds.height,
        };
        (x, y)
    }
}

/// Resizes `start` by dragging `handle` by `(dx, dy)` pixels.
///
/// Width and height grow by the signed delta of the grabbed corner and the
/// center moves by half of that same signed delta. Dragging past the
/// opposite side yields a negative extent, which is kept as is.
pub fn resize(
    start: &Annotation,
    handle: ResizeHandle,
    dx: f64,
    dy: f64,
    image_width: f64,
    image_height: f64,
) -> Annotation {
    let orig = to_pixel(start, image_width, image_height);
    let sx = handle.x_sign();
    let sy = handle.y_sign();

    let new_width = orig.width + sx * dx;
    let new_height = orig.height + sy * dy;
    let new_center_x = orig.x + sx * dx / 2.0;
    let new_center_y = orig.y + sy * dy / 2.0;

    let normalized = to_normalized(
        new_center_x - new_width / 2.0,
        new_center_y - new_height / 2.0,
        new_width,
        new_height,
        image_width,
        image_height,
    );

    Annotation {
        center_x: normalized.x + normalized.width / 2.0,
        center_y: normalized.y + normalized.height / 2.0,
        width: normalized.width,
        height: normalized.height,
        ..start.clone()
    }
}

/// A rectangle being drawn, anchored where the pointer went down.
///
/// `width`/`height` are signed offsets from the anchor in image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawGesture {
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub width: f64,
    pub height: f64,
}

impl DrawGesture {
    pub fn begin(x: f64, y: f64) -> Self {
        Self {
            anchor_x: x,
            anchor_y: y,
            width: 0.0,
            height: 0.0,
        }
    }

    /// Tracks the live pointer position.
    pub fn update(&mut self, x: f64, y: f64) {
        self.width = x - self.anchor_x;
        self.height = y - self.anchor_y;
    }

    /// True when both extents exceed `min_size` pixels.
    pub fn is_committable(&self, min_size: f64) -> bool {
        self.width.abs() > min_size && self.height.abs() > min_size
    }

    /// Turns the gesture into an annotation, or `None` if it is too small.
    ///
    /// Non-positive image dimensions are treated as 1.
    pub fn commit(
        &self,
        min_size: f64,
        image_width: f64,
        image_height: f64,
        id: AnnotationId,
        class_id: ClassId,
    ) -> Option<Annotation> {
        if !self.is_committable(min_size) {
            return None;
        }
        let image_width = if image_width > 0.0 { image_width } else { 1.0 };
        let image_height = if image_height > 0.0 { image_height } else { 1.0 };

        let normalized = to_normalized(
            self.anchor_x.min(self.anchor_x + self.width),
            self.anchor_y.min(self.anchor_y + self.height),
            self.width.abs(),
            self.height.abs(),
            image_width,
            image_height,
        );

        Some(Annotation::rectangle(
            id,
            class_id,
            normalized.x + normalized.width / 2.0,
            normalized.y + normalized.height / 2.0,
            normalized.width,
            normalized.height,
        ))
    }
}

/// What a pointer position hits on a selected annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hit {
    Handle(ResizeHandle),
    Interior,
}

/// Hit-tests an image-space point against an annotation.
///
/// Handle zones are squares of half-side `handle_size_px / zoom` centered
/// on each corner and are checked before the interior.
pub fn hit_test(
    annotation: &Annotation,
    x: f64,
    y: f64,
    image_width: f64,
    image_height: f64,
    handle_size_px: f64,
    zoom: f64,
) -> Option<Hit> {
    let bounds = pixel_bounds(annotation, image_width, image_height);
    let half = handle_size_px / zoom;

    for handle in ResizeHandle::ALL {
        let (cx, cy) = handle.corner(&bounds);
        if x >= cx - half && x <= cx + half && y >= cy - half && y <= cy + half {
            return Some(Hit::Handle(handle));
        }
    }

    if bounds.contains(x, y) {
        return Some(Hit::Interior);
    }
    None
}
