//! Render request, errors and pixel conversions shared by the backend.

use kurbo::Affine;
use memeforge_core::{Bitmap, Layer, LayerId, MemeColor};
use thiserror::Error;
use tiny_skia::{Color, IntSize, Pixmap, Transform};

/// Largest backing buffer edge, in device pixels.
pub const MAX_SURFACE_DIMENSION: u32 = 16_384;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to allocate a {width}x{height} surface")]
    SurfaceCreation { width: u32, height: u32 },
    #[error("Invalid surface size: {0}")]
    InvalidSize(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Everything needed to draw one composite.
#[derive(Debug, Clone, Copy)]
pub struct CompositeRequest<'a> {
    /// Base image reference, drawn at the origin stretched to the canvas.
    pub base_image: Option<&'a str>,
    pub layers: &'a [Layer],
    /// Canvas size in logical pixels.
    pub width: f64,
    pub height: f64,
    /// Device pixels per logical pixel.
    pub scale: f64,
    /// Translation applied to the whole scene before drawing.
    pub offset_x: f64,
    pub offset_y: f64,
}

impl<'a> CompositeRequest<'a> {
    pub fn new(layers: &'a [Layer], width: f64, height: f64) -> Self {
        Self {
            base_image: None,
            layers,
            width,
            height,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    pub fn with_base_image(mut self, src: Option<&'a str>) -> Self {
        self.base_image = src;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset_x: f64, offset_y: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }
}

/// Non-fatal conditions met while drawing a composite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    /// Layers that were drawn.
    pub drawn: usize,
    /// Layers left out, with the reason.
    pub skipped: Vec<(LayerId, String)>,
    /// Why the base image was left out, if it was.
    pub base_image_error: Option<String>,
}

impl RenderReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.base_image_error.is_none()
    }
}

pub(crate) fn to_skia_color(color: MemeColor) -> Color {
    Color::from_rgba8(color.r, color.g, color.b, color.a)
}

pub(crate) fn to_skia_transform(affine: Affine) -> Transform {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    Transform::from_row(
        a as f32, b as f32, c as f32, d as f32, e as f32, f as f32,
    )
}

pub(crate) fn premultiply_rgba_in_place(bytes: &mut [u8]) {
    for pixel in bytes.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        pixel[0] = ((pixel[0] as u16 * alpha + 127) / 255) as u8;
        pixel[1] = ((pixel[1] as u16 * alpha + 127) / 255) as u8;
        pixel[2] = ((pixel[2] as u16 * alpha + 127) / 255) as u8;
    }
}

pub(crate) fn unpremultiply_rgba_in_place(bytes: &mut [u8]) {
    for pixel in bytes.chunks_exact_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }

        let alpha_u16 = alpha as u16;
        pixel[0] = ((pixel[0] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
        pixel[1] = ((pixel[1] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
        pixel[2] = ((pixel[2] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
    }
}

/// Convert a straight-alpha bitmap into a premultiplied pixmap.
pub fn pixmap_from_bitmap(bitmap: &Bitmap) -> RenderResult<Pixmap> {
    pixmap_from_rgba(bitmap.width, bitmap.height, bitmap.pixels.to_vec())
}

/// Build a pixmap from straight-alpha RGBA8 bytes.
pub fn pixmap_from_rgba(width: u32, height: u32, mut rgba: Vec<u8>) -> RenderResult<Pixmap> {
    let size = IntSize::from_wh(width, height)
        .ok_or_else(|| RendererError::InvalidSize(format!("{width}x{height}")))?;
    premultiply_rgba_in_place(&mut rgba);
    Pixmap::from_vec(rgba, size)
        .ok_or_else(|| RendererError::Decode(format!("pixel buffer does not match {width}x{height}")))
}

/// Straight-alpha RGBA8 copy of a pixmap.
pub fn pixmap_to_rgba(pixmap: &Pixmap) -> Vec<u8> {
    let mut rgba = pixmap.data().to_vec();
    unpremultiply_rgba_in_place(&mut rgba);
    rgba
}

/// Straight-alpha bitmap copy of a pixmap.
pub fn pixmap_to_bitmap(pixmap: &Pixmap) -> RenderResult<Bitmap> {
    Bitmap::from_rgba8(pixmap.width(), pixmap.height(), pixmap_to_rgba(pixmap))
        .ok_or_else(|| RendererError::InvalidSize(format!("{}x{}", pixmap.width(), pixmap.height())))
}
