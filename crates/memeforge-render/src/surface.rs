//! Immediate-mode 2D drawing surface over a tiny-skia pixmap.
//!
//! The surface keeps a canvas-style state stack: transform, global alpha,
//! composite operation, shadow and image smoothing. Shadow parameters are in
//! device pixels and ignore the transform, like a browser canvas.

use crate::blur;
use crate::renderer::{
    MAX_SURFACE_DIMENSION, RenderResult, RendererError, to_skia_color, to_skia_transform,
};
use kurbo::{Affine, Rect, Size, Vec2};
use memeforge_core::MemeColor;
use tiny_skia::{
    BlendMode, Color, FillRule, FilterQuality, LineCap, LineJoin, Paint, Path, Pixmap,
    PixmapPaint, Stroke, Transform,
};

/// How new pixels combine with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    /// Keep the new pixels only where the surface already has alpha.
    SourceIn,
}

impl CompositeOp {
    fn blend_mode(self) -> BlendMode {
        match self {
            CompositeOp::SourceOver => BlendMode::SourceOver,
            CompositeOp::SourceIn => BlendMode::SourceIn,
        }
    }
}

/// Drop shadow applied to every draw while set. Device pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowState {
    pub color: MemeColor,
    pub blur: f64,
    pub offset: Vec2,
}

impl Default for ShadowState {
    fn default() -> Self {
        Self {
            color: MemeColor::transparent(),
            blur: 0.0,
            offset: Vec2::ZERO,
        }
    }
}

impl ShadowState {
    pub fn is_active(&self) -> bool {
        self.color.is_visible() && (self.blur > 0.0 || self.offset != Vec2::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DrawState {
    transform: Affine,
    global_alpha: f64,
    composite: CompositeOp,
    shadow: ShadowState,
    smoothing: bool,
}

impl DrawState {
    fn new(transform: Affine) -> Self {
        Self {
            transform,
            global_alpha: 1.0,
            composite: CompositeOp::SourceOver,
            shadow: ShadowState::default(),
            smoothing: true,
        }
    }
}

/// A single drawing primitive, in the current local frame.
#[derive(Debug, Clone, Copy)]
pub enum DrawOp<'a> {
    /// Draw a pixmap stretched into `dest`.
    Image { pixmap: &'a Pixmap, dest: Rect },
    FillPath { path: &'a Path, color: MemeColor },
    StrokePath {
        path: &'a Path,
        color: MemeColor,
        width: f64,
    },
    FillRect { rect: Rect, color: MemeColor },
}

/// Backing buffer size for a logical size at a scale.
pub fn surface_pixel_size(width: f64, height: f64, scale: f64) -> RenderResult<(u32, u32)> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !(valid(width) && valid(height) && valid(scale)) {
        return Err(RendererError::InvalidSize(format!(
            "{width}x{height} at scale {scale}"
        )));
    }
    let to_px = |v: f64| (v * scale).round().max(1.0);
    let (w, h) = (to_px(width), to_px(height));
    let max = MAX_SURFACE_DIMENSION as f64;
    if w > max || h > max {
        return Err(RendererError::InvalidSize(format!(
            "{w}x{h} exceeds {MAX_SURFACE_DIMENSION}px"
        )));
    }
    Ok((w as u32, h as u32))
}

/// A drawing surface.
#[derive(Debug, Clone)]
pub struct Surface {
    pixmap: Pixmap,
    logical_size: Size,
    scale: f64,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl Surface {
    /// Create a cleared surface of `width x height` logical pixels.
    pub fn new(width: f64, height: f64, scale: f64) -> RenderResult<Self> {
        prepare_surface(None, width, height, scale)
    }

    fn allocate(width: u32, height: u32) -> RenderResult<Self> {
        let pixmap =
            Pixmap::new(width, height).ok_or(RendererError::SurfaceCreation { width, height })?;
        Ok(Self {
            pixmap,
            logical_size: Size::new(width as f64, height as f64),
            scale: 1.0,
            state: DrawState::new(Affine::IDENTITY),
            stack: Vec::new(),
        })
    }

    /// Clear pixels and drawing state, and install the base scale.
    fn reset(&mut self, width: f64, height: f64, scale: f64) {
        self.pixmap.fill(Color::TRANSPARENT);
        self.logical_size = Size::new(width, height);
        self.scale = scale;
        self.reset_state();
    }

    /// Drop the state stack and return to the base scale transform.
    pub fn reset_state(&mut self) {
        self.stack.clear();
        self.state = DrawState::new(Affine::scale(self.scale));
    }

    /// Device pixel width.
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    /// Device pixel height.
    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn logical_size(&self) -> Size {
        self.logical_size
    }

    /// Device pixels per logical pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    pub fn save(&mut self) {
        self.stack.push(self.state);
    }

    /// Pop the last saved state. Unbalanced calls are ignored.
    pub fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    /// Number of saved states.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Current transform from the local frame to device pixels.
    pub fn transform(&self) -> Affine {
        self.state.transform
    }

    pub fn set_transform(&mut self, transform: Affine) {
        self.state.transform = transform;
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.state.transform *= Affine::translate((dx, dy));
    }

    /// Rotate the local frame, clockwise in radians.
    pub fn rotate(&mut self, radians: f64) {
        self.state.transform *= Affine::rotate(radians);
    }

    pub fn global_alpha(&self) -> f64 {
        self.state.global_alpha
    }

    /// Non-finite values are ignored.
    pub fn set_global_alpha(&mut self, alpha: f64) {
        if alpha.is_finite() {
            self.state.global_alpha = alpha.clamp(0.0, 1.0);
        }
    }

    pub fn composite(&self) -> CompositeOp {
        self.state.composite
    }

    pub fn set_composite(&mut self, composite: CompositeOp) {
        self.state.composite = composite;
    }

    pub fn shadow(&self) -> ShadowState {
        self.state.shadow
    }

    /// Set the shadow for following draws. Device pixels; non-finite values
    /// count as zero.
    pub fn set_shadow(&mut self, color: MemeColor, blur: f64, offset_x: f64, offset_y: f64) {
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        self.state.shadow = ShadowState {
            color,
            blur: finite(blur).max(0.0),
            offset: Vec2::new(finite(offset_x), finite(offset_y)),
        };
    }

    pub fn clear_shadow(&mut self) {
        self.state.shadow = ShadowState::default();
    }

    pub fn set_smoothing(&mut self, smoothing: bool) {
        self.state.smoothing = smoothing;
    }

    fn quality(&self) -> FilterQuality {
        if self.state.smoothing {
            FilterQuality::Bilinear
        } else {
            FilterQuality::Nearest
        }
    }

    /// Clear every pixel, regardless of the transform.
    pub fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }

    pub fn fill_rect(&mut self, rect: Rect, color: MemeColor) {
        self.draw(DrawOp::FillRect { rect, color });
    }

    pub fn fill_path(&mut self, path: &Path, color: MemeColor) {
        self.draw(DrawOp::FillPath { path, color });
    }

    /// Stroke centered on the path with round joins.
    pub fn stroke_path(&mut self, path: &Path, color: MemeColor, width: f64) {
        self.draw(DrawOp::StrokePath { path, color, width });
    }

    pub fn draw_image(&mut self, pixmap: &Pixmap, dest: Rect) {
        self.draw(DrawOp::Image { pixmap, dest });
    }

    /// Draw with the current state, shadow first.
    pub fn draw(&mut self, op: DrawOp<'_>) {
        if self.state.shadow.is_active() {
            self.draw_shadow(&op);
        }
        let quality = self.quality();
        paint_op(
            &mut self.pixmap,
            &op,
            self.state.transform,
            self.state.global_alpha as f32,
            self.state.composite.blend_mode(),
            quality,
        );
    }

    /// Draw only the shadow `op` would cast.
    pub fn draw_shadow_only(&mut self, op: DrawOp<'_>) {
        if self.state.shadow.is_active() {
            self.draw_shadow(&op);
        }
    }

    fn draw_shadow(&mut self, op: &DrawOp<'_>) {
        let shadow = self.state.shadow;
        let sigma = shadow.blur / 2.0;
        let pad = blur::kernel_radius(sigma) as f64 + 1.0;
        let Some(bounds) = device_bounds(op, self.state.transform) else {
            return;
        };

        // Only the part that lands on the surface after the offset matters.
        let visible = Rect::new(0.0, 0.0, self.width() as f64, self.height() as f64) - shadow.offset;
        let region = bounds
            .inflate(pad, pad)
            .intersect(visible.inflate(pad, pad))
            .expand();
        if !(region.width() >= 1.0 && region.height() >= 1.0) {
            return;
        }
        let (rw, rh) = (region.width() as u32, region.height() as u32);
        let Some(mut scratch) = Pixmap::new(rw, rh) else {
            log::warn!("Could not allocate {rw}x{rh} shadow buffer; dropping shadow");
            return;
        };

        let local = Affine::translate(-region.origin().to_vec2()) * self.state.transform;
        paint_op(
            &mut scratch,
            op,
            local,
            1.0,
            BlendMode::SourceOver,
            self.quality(),
        );
        tint(scratch.data_mut(), shadow.color, self.state.global_alpha);
        blur::gaussian_blur(scratch.data_mut(), rw, rh, sigma);

        let paint = PixmapPaint {
            opacity: 1.0,
            blend_mode: self.state.composite.blend_mode(),
            quality: FilterQuality::Bilinear,
        };
        let ts = Transform::from_translate(
            (region.x0 + shadow.offset.x) as f32,
            (region.y0 + shadow.offset.y) as f32,
        );
        self.pixmap
            .draw_pixmap(0, 0, scratch.as_ref(), &paint, ts, None);
    }
}

/// Reuse `existing` if its buffer already has the right size, otherwise
/// allocate. The result is cleared with the base scale installed.
pub(crate) fn prepare_surface(
    existing: Option<Surface>,
    width: f64,
    height: f64,
    scale: f64,
) -> RenderResult<Surface> {
    let (pw, ph) = surface_pixel_size(width, height, scale)?;
    let mut surface = match existing {
        Some(surface) if surface.width() == pw && surface.height() == ph => surface,
        _ => Surface::allocate(pw, ph)?,
    };
    surface.reset(width, height, scale);
    Ok(surface)
}

/// Size the surface in `slot` to `width * scale x height * scale` device
/// pixels and install a uniform `scale` transform, so drawing happens in
/// logical coordinates.
///
/// Each call starts from a cleared buffer and a fresh state stack; a
/// previous scale never compounds.
pub fn get_render_surface(
    slot: &mut Option<Surface>,
    width: f64,
    height: f64,
    scale: f64,
) -> RenderResult<&mut Surface> {
    let surface = prepare_surface(slot.take(), width, height, scale)?;
    Ok(slot.insert(surface))
}

fn solid_paint(color: MemeColor, alpha: f32, blend: BlendMode) -> Paint<'static> {
    let mut skia_color = to_skia_color(color);
    skia_color.apply_opacity(alpha);
    let mut paint = Paint::default();
    paint.set_color(skia_color);
    paint.blend_mode = blend;
    paint.anti_alias = true;
    paint
}

fn paint_op(
    target: &mut Pixmap,
    op: &DrawOp<'_>,
    transform: Affine,
    alpha: f32,
    blend: BlendMode,
    quality: FilterQuality,
) {
    match *op {
        DrawOp::Image { pixmap, dest } => {
            let sx = dest.width() / pixmap.width() as f64;
            let sy = dest.height() / pixmap.height() as f64;
            let ts = to_skia_transform(
                transform
                    * Affine::translate(dest.origin().to_vec2())
                    * Affine::scale_non_uniform(sx, sy),
            );
            let paint = PixmapPaint {
                opacity: alpha,
                blend_mode: blend,
                quality,
            };
            target.draw_pixmap(0, 0, pixmap.as_ref(), &paint, ts, None);
        }
        DrawOp::FillPath { path, color } => {
            let paint = solid_paint(color, alpha, blend);
            target.fill_path(path, &paint, FillRule::Winding, to_skia_transform(transform), None);
        }
        DrawOp::StrokePath { path, color, width } => {
            let paint = solid_paint(color, alpha, blend);
            let stroke = Stroke {
                width: width as f32,
                line_cap: LineCap::Round,
                line_join: LineJoin::Round,
                ..Stroke::default()
            };
            target.stroke_path(path, &paint, &stroke, to_skia_transform(transform), None);
        }
        DrawOp::FillRect { rect, color } => {
            let Some(rect) = tiny_skia::Rect::from_ltrb(
                rect.x0 as f32,
                rect.y0 as f32,
                rect.x1 as f32,
                rect.y1 as f32,
            ) else {
                return;
            };
            let paint = solid_paint(color, alpha, blend);
            target.fill_rect(rect, &paint, to_skia_transform(transform), None);
        }
    }
}

/// Device-space bounding box of what `op` can touch.
fn device_bounds(op: &DrawOp<'_>, transform: Affine) -> Option<Rect> {
    let local = match *op {
        DrawOp::Image { dest, .. } => dest,
        DrawOp::FillRect { rect, .. } => rect,
        DrawOp::FillPath { path, .. } => skia_rect(path.bounds()),
        DrawOp::StrokePath { path, width, .. } => {
            let half = width / 2.0 + 1.0;
            skia_rect(path.bounds()).inflate(half, half)
        }
    };
    let bounds = transform.transform_rect_bbox(local.abs());
    (bounds.is_finite() && bounds.area() > 0.0).then_some(bounds)
}

fn skia_rect(rect: tiny_skia::Rect) -> Rect {
    Rect::new(
        rect.left() as f64,
        rect.top() as f64,
        rect.right() as f64,
        rect.bottom() as f64,
    )
}

/// Recolor a premultiplied silhouette to `color`, scaling alpha by `alpha`.
fn tint(data: &mut [u8], color: MemeColor, alpha: f64) {
    let ca = (color.a as f64 * alpha.clamp(0.0, 1.0)).round() as u32;
    for px in data.chunks_exact_mut(4) {
        let a = (px[3] as u32 * ca + 127) / 255;
        px[0] = ((color.r as u32 * a + 127) / 255) as u8;
        px[1] = ((color.g as u32 * a + 127) / 255) as u8;
        px[2] = ((color.b as u32 * a + 127) / 255) as u8;
        px[3] = a as u8;
    }
}
