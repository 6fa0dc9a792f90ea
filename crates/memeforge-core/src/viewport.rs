//! Mapping between viewport (pointer) coordinates and canvas-space.

use kurbo::{Affine, Point, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Uniform scale plus offset placing the canvas inside the viewport.
///
/// Canvas-space is the base image's natural pixel grid; the viewport is
/// whatever the pointer reports (CSS pixels of the preview element).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Position of the canvas origin in the viewport.
    pub offset: Vec2,
    /// Viewport pixels per canvas pixel.
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn new(offset: Vec2, zoom: f64) -> Self {
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        Self { offset, zoom }
    }

    /// Scale the canvas to fit the viewport, centered.
    pub fn fit(canvas: Size, viewport: Size) -> Self {
        if canvas.width <= 0.0 || canvas.height <= 0.0 {
            return Self::default();
        }
        let zoom = (viewport.width / canvas.width).min(viewport.height / canvas.height);
        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        let offset = Vec2::new(
            (viewport.width - canvas.width * zoom) / 2.0,
            (viewport.height - canvas.height * zoom) / 2.0,
        );
        Self { offset, zoom }
    }

    /// Canvas-space to viewport.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.zoom)
    }

    /// Viewport to canvas-space.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.offset)
    }

    pub fn screen_to_canvas(&self, point: Point) -> Point {
        self.inverse_transform() * point
    }

    pub fn canvas_to_screen(&self, point: Point) -> Point {
        self.transform() * point
    }

    /// Convert a displacement measured in the viewport to canvas-space.
    pub fn screen_delta_to_canvas(&self, delta: Vec2) -> Vec2 {
        delta / self.zoom
    }

    /// Convert a length in viewport pixels to canvas-space.
    pub fn screen_len_to_canvas(&self, len: f64) -> f64 {
        len / self.zoom
    }
}
