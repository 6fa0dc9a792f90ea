//! Layer definitions for the meme canvas.

mod effects;
mod sticker;
mod text;

pub use effects::{Effects, Glow, Outline, Shadow};
pub use sticker::StickerLayer;
pub use text::TextLayer;
pub(crate) use text::sanitize_font_size;

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Smallest width or height a layer may have, in canvas-space pixels.
pub const MIN_LAYER_DIMENSION: f64 = 20.0;

/// Upper bound for `z_index`. Bringing a layer to the front never exceeds it.
pub const MAX_Z_INDEX: i32 = 10_000;

/// Unique identifier for layers.
pub type LayerId = Uuid;

/// Serializable RGBA8 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemeColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl MemeColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const fn black() -> Self {
        Self::rgb(0, 0, 0)
    }

    pub const fn white() -> Self {
        Self::rgb(255, 255, 255)
    }

    pub const fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse a CSS-style hex color (`#rgb`, `#rrggbb` or `#rrggbbaa`).
    pub fn parse(color: &str) -> Option<Self> {
        let color = color.trim();
        if color.eq_ignore_ascii_case("transparent") {
            return Some(Self::transparent());
        }
        let hex = color.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        match hex.len() {
            3 => Some(Self::rgb(
                channel(0..1)? * 17,
                channel(1..2)? * 17,
                channel(2..3)? * 17,
            )),
            6 => Some(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
            8 => Some(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => None,
        }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    /// Whether drawing with this color would leave any mark.
    pub fn is_visible(&self) -> bool {
        self.a > 0
    }
}

/// Discriminant of a [`Layer`], used where only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Text,
    Sticker,
}

/// A visual layer composited over the base image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Layer {
    Text(TextLayer),
    Sticker(StickerLayer),
}

impl Layer {
    pub fn id(&self) -> LayerId {
        match self {
            Layer::Text(l) => l.id,
            Layer::Sticker(l) => l.id,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Text(_) => LayerKind::Text,
            Layer::Sticker(_) => LayerKind::Sticker,
        }
    }

    /// Top-left corner in canvas-space.
    pub fn position(&self) -> Point {
        match self {
            Layer::Text(l) => Point::new(l.x, l.y),
            Layer::Sticker(l) => Point::new(l.x, l.y),
        }
    }

    pub fn size(&self) -> Size {
        match self {
            Layer::Text(l) => Size::new(l.width, l.height),
            Layer::Sticker(l) => Size::new(l.width, l.height),
        }
    }

    /// Unrotated bounding box in canvas-space.
    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.position(), self.size())
    }

    /// Center of the bounding box; the rotation pivot.
    pub fn center(&self) -> Point {
        self.bounds().center()
    }

    /// Rotation in degrees, clockwise.
    pub fn rotation(&self) -> f64 {
        match self {
            Layer::Text(l) => l.rotation,
            Layer::Sticker(l) => l.rotation,
        }
    }

    pub fn z_index(&self) -> i32 {
        match self {
            Layer::Text(l) => l.z_index,
            Layer::Sticker(l) => l.z_index,
        }
    }

    pub fn effects(&self) -> &Effects {
        match self {
            Layer::Text(l) => &l.effects,
            Layer::Sticker(l) => &l.effects,
        }
    }

    pub fn effects_mut(&mut self) -> &mut Effects {
        match self {
            Layer::Text(l) => &mut l.effects,
            Layer::Sticker(l) => &mut l.effects,
        }
    }

    /// Aspect ratio constraint for resizing, if the layer has one.
    pub fn aspect_ratio(&self) -> Option<f64> {
        match self {
            Layer::Text(_) => None,
            Layer::Sticker(l) => Some(l.aspect_ratio),
        }
    }

    pub fn as_text(&self) -> Option<&TextLayer> {
        match self {
            Layer::Text(l) => Some(l),
            Layer::Sticker(_) => None,
        }
    }

    pub fn as_sticker(&self) -> Option<&StickerLayer> {
        match self {
            Layer::Sticker(l) => Some(l),
            Layer::Text(_) => None,
        }
    }

    pub(crate) fn set_position(&mut self, position: Point) {
        match self {
            Layer::Text(l) => (l.x, l.y) = (position.x, position.y),
            Layer::Sticker(l) => (l.x, l.y) = (position.x, position.y),
        }
    }

    pub(crate) fn set_rotation(&mut self, rotation: f64) {
        match self {
            Layer::Text(l) => l.rotation = rotation,
            Layer::Sticker(l) => l.rotation = rotation,
        }
    }

    pub(crate) fn set_z_index(&mut self, z_index: i32) {
        match self {
            Layer::Text(l) => l.z_index = z_index,
            Layer::Sticker(l) => l.z_index = z_index,
        }
    }

    /// Resize the bounding box, enforcing the minimum dimension and, for
    /// stickers, the fixed aspect ratio.
    pub(crate) fn set_size(&mut self, size: Size) {
        match self {
            Layer::Text(l) => {
                l.width = size.width.max(MIN_LAYER_DIMENSION);
                l.height = size.height.max(MIN_LAYER_DIMENSION);
            }
            Layer::Sticker(l) => {
                let fitted = aspect_locked_size(size.width, size.height, l.aspect_ratio);
                l.width = fitted.width;
                l.height = fitted.height;
            }
        }
    }

    pub(crate) fn set_id(&mut self, id: LayerId) {
        match self {
            Layer::Text(l) => l.id = id,
            Layer::Sticker(l) => l.id = id,
        }
    }

    /// Transform from the layer's local frame (origin at the top-left of the
    /// unrotated box) to canvas-space.
    pub fn local_transform(&self) -> Affine {
        let bounds = self.bounds();
        let half = Vec2::new(bounds.width() / 2.0, bounds.height() / 2.0);
        Affine::translate(bounds.center().to_vec2())
            * Affine::rotate(self.rotation().to_radians())
            * Affine::translate(-half)
    }

    /// The four corners of the rotated box, clockwise from top-left.
    pub fn corners(&self) -> [Point; 4] {
        let transform = self.local_transform();
        let size = self.size();
        [
            transform * Point::ZERO,
            transform * Point::new(size.width, 0.0),
            transform * Point::new(size.width, size.height),
            transform * Point::new(0.0, size.height),
        ]
    }

    /// Axis-aligned bounds of the rotated box.
    pub fn rotated_bounds(&self) -> Rect {
        let corners = self.corners();
        corners[1..]
            .iter()
            .fold(Rect::from_points(corners[0], corners[0]), |acc, p| {
                acc.union_pt(*p)
            })
    }

    /// Check whether a canvas-space point falls inside the rotated box.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let local = self.local_transform().inverse() * point;
        Rect::from_origin_size(Point::ZERO, self.size())
            .inflate(tolerance, tolerance)
            .contains(local)
    }
}

/// Fit a requested size to an aspect ratio.
///
/// Two candidates are considered: one driven by the requested width and one
/// driven by the requested height, each floored at [`MIN_LAYER_DIMENSION`]
/// on its driving axis. The candidate with the larger height wins, which
/// also guarantees both dimensions stay at or above the floor.
pub fn aspect_locked_size(width: f64, height: f64, aspect_ratio: f64) -> Size {
    let aspect_ratio = if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio
    } else {
        1.0
    };
    let width = if width.is_finite() { width } else { 0.0 };
    let height = if height.is_finite() { height } else { 0.0 };

    let by_width = {
        let w = width.max(MIN_LAYER_DIMENSION);
        Size::new(w, w / aspect_ratio)
    };
    let by_height = {
        let h = height.max(MIN_LAYER_DIMENSION);
        Size::new(h * aspect_ratio, h)
    };

    if by_width.height >= by_height.height {
        by_width
    } else {
        by_height
    }
}
