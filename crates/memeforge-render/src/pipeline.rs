//! Composite rendering shared by the live preview and export.
//!
//! A composite is always drawn from scratch: clear, base image, then layers
//! in ascending zIndex. Sticker bitmaps that cannot be resolved are left out
//! and reported; they never fail the render.

use crate::effects::{Drawable, SurfacePool, composite_with_effects};
use crate::export::data_url_to_blob;
use crate::renderer::{
    CompositeRequest, RenderReport, RenderResult, pixmap_from_bitmap, pixmap_from_rgba,
    pixmap_to_bitmap,
};
use crate::surface::{Surface, get_render_surface};
use crate::text::{FontBook, text_path};
use kurbo::{Point, Rect, Size};
use memeforge_core::diagnostics::emit;
use memeforge_core::loader::BoxFuture;
use memeforge_core::{
    Bitmap, Diagnostic, DiagnosticSink, ImageSource, Layer, LoadError, StickerLayer, TextLayer,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tiny_skia::Pixmap;

/// Decoded `data:` URLs kept by a [`BitmapStore`]; the least recently used
/// one is dropped first.
pub const DATA_URL_CACHE_CAPACITY: usize = 32;

/// Decoded bitmaps keyed by their `src` reference.
///
/// `data:` URLs decode on first use and live in a small LRU cache capped at
/// [`DATA_URL_CACHE_CAPACITY`]. Anything else has to be inserted by the
/// caller once its bytes are available.
#[derive(Debug, Clone, Default)]
pub struct BitmapStore {
    bitmaps: HashMap<String, Arc<Pixmap>>,
    decoded: VecDeque<(String, Arc<Pixmap>)>,
}

impl BitmapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bitmap(&mut self, src: impl Into<String>, bitmap: &Bitmap) -> RenderResult<()> {
        let pixmap = pixmap_from_bitmap(bitmap)?;
        self.bitmaps.insert(src.into(), Arc::new(pixmap));
        Ok(())
    }

    pub fn insert_pixmap(&mut self, src: impl Into<String>, pixmap: Pixmap) {
        self.bitmaps.insert(src.into(), Arc::new(pixmap));
    }

    /// Decode encoded image bytes and store them under `src`.
    pub fn insert_encoded(&mut self, src: impl Into<String>, bytes: &[u8]) -> Result<(), LoadError> {
        let pixmap = decode_image(bytes)?;
        self.bitmaps.insert(src.into(), Arc::new(pixmap));
        Ok(())
    }

    pub fn remove(&mut self, src: &str) -> bool {
        let cached = self.decoded_position(src).map(|i| self.decoded.remove(i));
        self.bitmaps.remove(src).is_some() || cached.is_some()
    }

    /// Drop cached `data:` URLs for which `in_use` returns false.
    pub fn retain_decoded(&mut self, mut in_use: impl FnMut(&str) -> bool) {
        self.decoded.retain(|(src, _)| in_use(src));
    }

    pub fn contains(&self, src: &str) -> bool {
        self.bitmaps.contains_key(src) || self.decoded_position(src).is_some()
    }

    pub fn len(&self) -> usize {
        self.bitmaps.len() + self.decoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty() && self.decoded.is_empty()
    }

    /// Resolve `src`, caching decoded `data:` URLs.
    pub fn resolve(&mut self, src: &str) -> Result<Arc<Pixmap>, LoadError> {
        if let Some(pixmap) = self.bitmaps.get(src) {
            return Ok(Arc::clone(pixmap));
        }
        if let Some(entry) = self.decoded_position(src).and_then(|i| self.decoded.remove(i)) {
            let pixmap = Arc::clone(&entry.1);
            self.decoded.push_back(entry);
            return Ok(pixmap);
        }
        let pixmap = self.lookup(src)?;
        if self.decoded.len() >= DATA_URL_CACHE_CAPACITY {
            self.decoded.pop_front();
        }
        self.decoded.push_back((src.to_string(), Arc::clone(&pixmap)));
        Ok(pixmap)
    }

    fn decoded_position(&self, src: &str) -> Option<usize> {
        self.decoded.iter().position(|(key, _)| key == src)
    }

    fn lookup(&self, src: &str) -> Result<Arc<Pixmap>, LoadError> {
        if let Some(pixmap) = self.bitmaps.get(src) {
            return Ok(Arc::clone(pixmap));
        }
        if let Some(i) = self.decoded_position(src) {
            return Ok(Arc::clone(&self.decoded[i].1));
        }
        if src.starts_with("data:") {
            let blob = data_url_to_blob(src).map_err(|e| LoadError::Decode(e.to_string()))?;
            return decode_image(&blob.bytes).map(Arc::new);
        }
        Err(LoadError::NotFound(src.to_string()))
    }
}

impl ImageSource for BitmapStore {
    fn load(&self, src: &str) -> BoxFuture<'_, Result<Bitmap, LoadError>> {
        let result = self.lookup(src).and_then(|pixmap| {
            pixmap_to_bitmap(&pixmap).map_err(|e| LoadError::Decode(e.to_string()))
        });
        Box::pin(async move { result })
    }
}

/// Decode PNG/JPEG/WebP bytes into a premultiplied pixmap.
pub fn decode_image(bytes: &[u8]) -> Result<Pixmap, LoadError> {
    let image = image::load_from_memory(bytes).map_err(|e| LoadError::Decode(e.to_string()))?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    pixmap_from_rgba(width, height, rgba.into_raw()).map_err(|e| LoadError::Decode(e.to_string()))
}

/// Caller-owned state reused across renders.
#[derive(Clone)]
pub struct RenderResources {
    pub pool: SurfacePool,
    pub fonts: FontBook,
    pub bitmaps: BitmapStore,
}

impl RenderResources {
    pub fn new() -> RenderResult<Self> {
        Ok(Self {
            pool: SurfacePool::new(),
            fonts: FontBook::new()?,
            bitmaps: BitmapStore::new(),
        })
    }
}

/// Draw a full composite onto `surface`.
///
/// The surface is cleared first and its state stack reset, so repeated calls
/// with the same request produce the same pixels.
pub fn draw_composite(
    surface: &mut Surface,
    resources: &mut RenderResources,
    request: &CompositeRequest<'_>,
    sink: Option<&dyn DiagnosticSink>,
) -> RenderResult<RenderReport> {
    let mut report = RenderReport::default();
    surface.reset_state();
    surface.clear();
    surface.save();
    if request.offset_x.is_finite() && request.offset_y.is_finite() {
        surface.translate(request.offset_x, request.offset_y);
    }

    if let Some(src) = request.base_image {
        match resources.bitmaps.resolve(src) {
            Ok(pixmap) => {
                surface.draw_image(&pixmap, Rect::new(0.0, 0.0, request.width, request.height));
            }
            Err(err) => {
                let reason = err.to_string();
                report.base_image_error = Some(reason.clone());
                emit(sink, Diagnostic::BaseImageSkipped { reason });
            }
        }
    }

    // Read once into a stable order; ties keep insertion order.
    let mut ordered: Vec<&Layer> = request.layers.iter().collect();
    ordered.sort_by_key(|layer| layer.z_index());

    let result = ordered.into_iter().try_for_each(|layer| {
        draw_layer(surface, resources, layer, request.scale, sink, &mut report)
    });
    surface.restore();
    result?;

    log::debug!(
        "Composite drawn: {} layers, {} skipped",
        report.drawn,
        report.skipped.len()
    );
    Ok(report)
}

/// Size the surface in `slot` for `request` and draw the composite into it.
pub fn render_composite<'s>(
    slot: &'s mut Option<Surface>,
    resources: &mut RenderResources,
    request: &CompositeRequest<'_>,
    sink: Option<&dyn DiagnosticSink>,
) -> RenderResult<(&'s mut Surface, RenderReport)> {
    let surface = get_render_surface(slot, request.width, request.height, request.scale)?;
    let report = draw_composite(surface, resources, request, sink)?;
    Ok((surface, report))
}

fn draw_layer(
    surface: &mut Surface,
    resources: &mut RenderResources,
    layer: &Layer,
    scale: f64,
    sink: Option<&dyn DiagnosticSink>,
    report: &mut RenderReport,
) -> RenderResult<()> {
    match layer {
        Layer::Text(text) => {
            draw_text_layer(surface, &mut resources.pool, &resources.fonts, text, scale)?;
        }
        Layer::Sticker(sticker) => match resources.bitmaps.resolve(&sticker.src) {
            Ok(bitmap) => {
                draw_sticker_layer(surface, &mut resources.pool, sticker, &bitmap, scale)?;
            }
            Err(err) => {
                let reason = err.to_string();
                emit(
                    sink,
                    Diagnostic::LayerSkipped {
                        layer_id: sticker.id(),
                        reason: reason.clone(),
                    },
                );
                report.skipped.push((sticker.id(), reason));
                return Ok(());
            }
        },
    }
    report.drawn += 1;
    Ok(())
}

/// Enter the layer's local frame: rotation pivots about the box center and
/// the box's top-left ends up at the origin.
fn enter_layer_frame(surface: &mut Surface, bounds: Rect, rotation_degrees: f64) {
    let center = bounds.center();
    surface.translate(center.x, center.y);
    surface.rotate(rotation_degrees.to_radians());
    surface.translate(-bounds.width() / 2.0, -bounds.height() / 2.0);
}

/// Draw a text layer centered in its box: outline stroke, shadow, glow, then
/// the fill without any shadow.
pub fn draw_text_layer(
    surface: &mut Surface,
    pool: &mut SurfacePool,
    fonts: &FontBook,
    layer: &TextLayer,
    scale: f64,
) -> RenderResult<()> {
    let size = Size::new(layer.width(), layer.height());
    let font = fonts.resolve(&layer.font_family);
    let Some(path) = text_path(font, &layer.text, layer.font_size, size) else {
        return Ok(());
    };

    surface.save();
    enter_layer_frame(
        surface,
        Rect::from_origin_size((layer.x, layer.y), size),
        layer.rotation,
    );
    let drawable = Drawable::Glyphs {
        path: &path,
        color: layer.color,
    };
    let result = composite_with_effects(surface, pool, drawable, size, &layer.effects, scale);
    surface.restore();
    result
}

/// Draw a sticker bitmap stretched over its box, effects underneath.
pub fn draw_sticker_layer(
    surface: &mut Surface,
    pool: &mut SurfacePool,
    layer: &StickerLayer,
    bitmap: &Pixmap,
    scale: f64,
) -> RenderResult<()> {
    let size = Size::new(layer.width(), layer.height());
    surface.save();
    enter_layer_frame(
        surface,
        Rect::from_origin_size((layer.x, layer.y), size),
        layer.rotation,
    );
    let result = composite_with_effects(
        surface,
        pool,
        Drawable::Bitmap(bitmap),
        size,
        &layer.effects,
        scale,
    );
    surface.restore();
    result
}

/// A single layer rendered on its own surface.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPreview {
    /// Canvas-space position of the surface's top-left corner.
    pub origin: Point,
    pub report: RenderReport,
}

/// Canvas-space bounds of everything `layer` paints: its rotated box, any
/// glyphs spilling out of a text box, and the reach of its effects.
pub fn layer_paint_bounds(fonts: &FontBook, layer: &Layer) -> Rect {
    let mut bounds = layer.rotated_bounds();
    if let Layer::Text(text) = layer {
        let size = Size::new(text.width(), text.height());
        let font = fonts.resolve(&text.font_family);
        if let Some(path) = text_path(font, &text.text, text.font_size, size) {
            let ink = path.bounds();
            let local = Rect::new(
                f64::from(ink.left()),
                f64::from(ink.top()),
                f64::from(ink.right()),
                f64::from(ink.bottom()),
            );
            bounds = bounds.union(layer.local_transform().transform_rect_bbox(local));
        }
    }
    let bleed = layer.effects().bleed();
    bounds.inflate(bleed, bleed)
}

/// Render one layer into the surface in `slot`, sized to
/// [`layer_paint_bounds`] so nothing is clipped.
pub fn render_layer_preview(
    slot: &mut Option<Surface>,
    resources: &mut RenderResources,
    layer: &Layer,
    scale: f64,
    sink: Option<&dyn DiagnosticSink>,
) -> RenderResult<LayerPreview> {
    let bounds = layer_paint_bounds(&resources.fonts, layer).expand();
    let request = CompositeRequest::new(std::slice::from_ref(layer), bounds.width(), bounds.height())
        .with_scale(scale)
        .with_offset(-bounds.x0, -bounds.y0);
    let (_, report) = render_composite(slot, resources, &request, sink)?;
    Ok(LayerPreview {
        origin: bounds.origin(),
        report,
    })
}
