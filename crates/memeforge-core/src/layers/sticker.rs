//! Sticker layer: a raster image with a fixed aspect ratio.

use super::{Effects, LayerId, aspect_locked_size};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bitmap placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerLayer {
    pub(crate) id: LayerId,
    pub x: f64,
    pub y: f64,
    pub(crate) width: f64,
    pub(crate) height: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i32,
    /// Bitmap reference: a URL or a `data:` URL.
    pub src: String,
    /// Accessibility label.
    #[serde(default)]
    pub alt: String,
    /// Natural width / height of the bitmap, fixed at creation.
    pub(crate) aspect_ratio: f64,
    #[serde(default)]
    pub effects: Effects,
}

impl StickerLayer {
    /// Create a sticker from the natural dimensions of its decoded bitmap.
    ///
    /// Returns `None` when either natural dimension is zero.
    pub fn new(
        src: impl Into<String>,
        alt: impl Into<String>,
        natural_width: u32,
        natural_height: u32,
    ) -> Option<Self> {
        if natural_width == 0 || natural_height == 0 {
            return None;
        }
        let aspect_ratio = natural_width as f64 / natural_height as f64;
        let size = aspect_locked_size(natural_width as f64, natural_height as f64, aspect_ratio);
        Some(Self {
            id: Uuid::new_v4(),
            x: 0.0,
            y: 0.0,
            width: size.width,
            height: size.height,
            rotation: 0.0,
            z_index: 0,
            src: src.into(),
            alt: alt.into(),
            aspect_ratio,
            effects: Effects::none(),
        })
    }

    /// Scale to fit within the given box while keeping the aspect ratio.
    pub fn fit_within(mut self, max_width: f64, max_height: f64) -> Self {
        let target_aspect = max_width / max_height;
        let size = if self.aspect_ratio > target_aspect {
            aspect_locked_size(max_width, 0.0, self.aspect_ratio)
        } else {
            aspect_locked_size(0.0, max_height, self.aspect_ratio)
        };
        self.width = size.width;
        self.height = size.height;
        self
    }

    pub fn with_effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::MIN_LAYER_DIMENSION;

    #[test]
    fn test_aspect_from_natural_size() {
        let sticker = StickerLayer::new("cat.png", "cat", 100, 50).unwrap();
        assert!((sticker.aspect_ratio() - 2.0).abs() < f64::EPSILON);
        assert!((sticker.width() - 100.0).abs() < f64::EPSILON);
        assert!((sticker.height() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(StickerLayer::new("x.png", "", 0, 10).is_none());
    }

    #[test]
    fn test_fit_within() {
        let sticker = StickerLayer::new("wide.png", "", 1000, 500)
            .unwrap()
            .fit_within(400.0, 400.0);
        assert!((sticker.width() - 400.0).abs() < 0.01);
        assert!((sticker.height() - 200.0).abs() < 0.01);
    }

    #[test]
    fn test_tiny_bitmap_floored() {
        let sticker = StickerLayer::new("dot.png", "", 4, 2).unwrap();
        assert!(sticker.height() >= MIN_LAYER_DIMENSION);
        assert!((sticker.width() / sticker.height() - 2.0).abs() < 1e-9);
    }
}
