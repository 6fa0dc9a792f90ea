//! MemeForge Render Library
//!
//! CPU compositor for MemeForge scenes. The same draw routines back the live
//! per-layer previews and the full-resolution export.

pub mod blur;
pub mod effects;
pub mod export;
pub mod pipeline;
mod renderer;
pub mod surface;
pub mod text;

pub use effects::{
    Drawable, SurfacePool, apply_glow, apply_outline, apply_shadow, composite_with_effects,
};
pub use export::{
    Blob, ExportError, ExportFormat, ExportOptions, MemoryUploader, Uploader, data_url_to_blob,
    export_to_blob, export_to_data_url, share,
};
pub use pipeline::{
    BitmapStore, LayerPreview, RenderResources, draw_composite, draw_sticker_layer,
    draw_text_layer, layer_paint_bounds, render_composite, render_layer_preview,
};
pub use renderer::{
    CompositeRequest, MAX_SURFACE_DIMENSION, RenderReport, RenderResult, RendererError,
    pixmap_from_bitmap, pixmap_from_rgba, pixmap_to_bitmap, pixmap_to_rgba,
};
pub use surface::{CompositeOp, DrawOp, ShadowState, Surface, get_render_surface};
pub use text::FontBook;
