//! Outline, shadow and glow synthesized from plain draws.
//!
//! Effect magnitudes are canvas-space pixels and are multiplied by the render
//! scale, so exports at a higher scale get proportionally larger effects.

use crate::renderer::RenderResult;
use crate::surface::{CompositeOp, DrawOp, Surface, prepare_surface, surface_pixel_size};
use kurbo::{Rect, Size};
use memeforge_core::{Effects, Glow, MemeColor, Outline, Shadow};
use tiny_skia::{Path, Pixmap};

/// Diagonal outline offsets are the orthogonal offset times this factor.
const DIAGONAL: f64 = 0.707;

/// Unit offsets for the outline silhouette: N, NE, E, SE, S, SW, W, NW.
const OUTLINE_OFFSETS: [(f64, f64); 8] = [
    (0.0, -1.0),
    (DIAGONAL, -DIAGONAL),
    (1.0, 0.0),
    (DIAGONAL, DIAGONAL),
    (0.0, 1.0),
    (-DIAGONAL, DIAGONAL),
    (-1.0, 0.0),
    (-DIAGONAL, -DIAGONAL),
];

/// Glow passes as (fraction of strength, opacity).
pub const GLOW_PASSES: [(f64, f64); 3] = [(0.5, 0.6), (1.0, 0.4), (1.5, 0.2)];

/// Offscreen surfaces kept for reuse between effect passes.
///
/// Surfaces are cleared and reset before they are handed out again.
#[derive(Debug, Clone)]
pub struct SurfacePool {
    free: Vec<Surface>,
    capacity: usize,
}

impl SurfacePool {
    pub const DEFAULT_CAPACITY: usize = 4;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
        }
    }

    /// A cleared surface of the given logical size and scale.
    pub fn acquire(&mut self, width: f64, height: f64, scale: f64) -> RenderResult<Surface> {
        let (pw, ph) = surface_pixel_size(width, height, scale)?;
        let reusable = self
            .free
            .iter()
            .position(|s| s.width() == pw && s.height() == ph)
            .map(|index| self.free.swap_remove(index));
        prepare_surface(reusable, width, height, scale)
    }

    /// Hand a surface back. Dropped if the pool is full.
    pub fn release(&mut self, surface: Surface) {
        if self.free.len() < self.capacity {
            self.free.push(surface);
        }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

impl Default for SurfacePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Content an effect is applied to, drawn in the layer's local frame with
/// its box at the origin.
#[derive(Debug, Clone, Copy)]
pub enum Drawable<'a> {
    /// A sticker bitmap stretched over the box.
    Bitmap(&'a Pixmap),
    /// A text run already laid out inside the box.
    Glyphs { path: &'a Path, color: MemeColor },
}

impl<'a> Drawable<'a> {
    fn op(&self, size: Size) -> DrawOp<'a> {
        match *self {
            Drawable::Bitmap(pixmap) => DrawOp::Image {
                pixmap,
                dest: Rect::from_origin_size((0.0, 0.0), size),
            },
            Drawable::Glyphs { path, color } => DrawOp::FillPath { path, color },
        }
    }
}

/// Draw an outline around `drawable`.
///
/// Bitmaps get a single-color silhouette drawn at eight offsets of
/// `outline.width * scale` device pixels. Glyph runs are stroked at twice
/// that width, centered on the glyph path.
pub fn apply_outline(
    surface: &mut Surface,
    pool: &mut SurfacePool,
    drawable: Drawable<'_>,
    size: Size,
    outline: &Outline,
    scale: f64,
) -> RenderResult<()> {
    let outline = outline.sanitized();
    let Some(color) = outline.color.filter(|_| outline.is_active()) else {
        return Ok(());
    };
    // Device distance converted into the surface's local units.
    let distance = outline.width * scale / surface.scale();

    match drawable {
        Drawable::Glyphs { path, .. } => {
            surface.save();
            reset_effect_state(surface);
            surface.stroke_path(path, color, distance * 2.0);
            surface.restore();
        }
        Drawable::Bitmap(pixmap) => {
            let silhouette = build_silhouette(pool, pixmap, size, color, surface.scale())?;
            surface.save();
            reset_effect_state(surface);
            for (dx, dy) in OUTLINE_OFFSETS {
                let dest = Rect::from_origin_size((dx * distance, dy * distance), size);
                surface.draw_image(silhouette.pixmap(), dest);
            }
            surface.restore();
            pool.release(silhouette);
        }
    }
    Ok(())
}

/// Draw a drop shadow of `drawable`, without the drawable itself.
pub fn apply_shadow(
    surface: &mut Surface,
    drawable: Drawable<'_>,
    size: Size,
    shadow: &Shadow,
    scale: f64,
) {
    let shadow = shadow.sanitized();
    let Some(color) = shadow.color.filter(|_| shadow.is_active()) else {
        return;
    };
    surface.save();
    reset_effect_state(surface);
    surface.set_shadow(
        color,
        shadow.blur * scale,
        shadow.offset_x * scale,
        shadow.offset_y * scale,
    );
    surface.draw_shadow_only(drawable.op(size));
    surface.restore();
}

/// Draw a soft glow around `drawable` in three blurred passes of growing
/// radius and falling opacity.
pub fn apply_glow(
    surface: &mut Surface,
    drawable: Drawable<'_>,
    size: Size,
    glow: &Glow,
    scale: f64,
) {
    let glow = glow.sanitized();
    let Some(color) = glow.color.filter(|_| glow.is_active()) else {
        return;
    };
    for (fraction, opacity) in GLOW_PASSES {
        surface.save();
        reset_effect_state(surface);
        surface.set_global_alpha(opacity);
        surface.set_shadow(color, glow.strength * scale * fraction, 0.0, 0.0);
        surface.draw_shadow_only(drawable.op(size));
        surface.restore();
    }
}

/// Outline, then shadow, then glow, then the plain drawable on top.
///
/// Malformed effect numbers are coerced before use. The surface state is
/// the same on return as on entry.
pub fn composite_with_effects(
    surface: &mut Surface,
    pool: &mut SurfacePool,
    drawable: Drawable<'_>,
    size: Size,
    effects: &Effects,
    scale: f64,
) -> RenderResult<()> {
    let effects = effects.sanitized();
    apply_outline(surface, pool, drawable, size, &effects.outline, scale)?;
    apply_shadow(surface, drawable, size, &effects.shadow, scale);
    apply_glow(surface, drawable, size, &effects.glow, scale);

    surface.save();
    surface.clear_shadow();
    surface.draw(drawable.op(size));
    surface.restore();
    Ok(())
}

fn reset_effect_state(surface: &mut Surface) {
    surface.clear_shadow();
    surface.set_global_alpha(1.0);
    surface.set_composite(CompositeOp::SourceOver);
}

/// `pixmap` recolored to `color` wherever it has alpha.
fn build_silhouette(
    pool: &mut SurfacePool,
    pixmap: &Pixmap,
    size: Size,
    color: MemeColor,
    scale: f64,
) -> RenderResult<Surface> {
    let mut silhouette = pool.acquire(size.width, size.height, scale)?;
    let bounds = Rect::from_origin_size((0.0, 0.0), size);
    silhouette.draw_image(pixmap, bounds);
    silhouette.set_composite(CompositeOp::SourceIn);
    silhouette.fill_rect(bounds, color);
    silhouette.set_composite(CompositeOp::SourceOver);
    Ok(silhouette)
}
