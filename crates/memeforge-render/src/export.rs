//! Export to encoded images and hand-off to an upload service.
//!
//! Exports are always re-rendered from the layer description at the target
//! scale, never resampled from a preview.

use crate::pipeline::{RenderResources, draw_composite};
use crate::renderer::{CompositeRequest, RendererError, pixmap_to_rgba};
use crate::surface::Surface;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use memeforge_core::loader::BoxFuture;
use memeforge_core::{DiagnosticSink, EditorConfig, Layer};
use std::sync::Mutex;
use thiserror::Error;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: f64 = 0.92;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error("JPEG quality must be in (0, 1], got {0}")]
    InvalidQuality(f64),
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),
    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
        }
    }

    /// Parse `png`, `jpeg`/`jpg` or a MIME type.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Some(ExportFormat::Png),
            "jpeg" | "jpg" | "image/jpeg" => Some(ExportFormat::Jpeg),
            _ => None,
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// JPEG quality in (0, 1]. Ignored for PNG.
    pub quality: f64,
    /// Device pixels per canvas pixel. Falls back to the device pixel ratio.
    pub target_scale: Option<f64>,
    pub device_pixel_ratio: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Png,
            quality: DEFAULT_QUALITY,
            target_scale: None,
            device_pixel_ratio: 1.0,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Format and quality from the editor settings.
    pub fn from_config(config: &EditorConfig) -> Self {
        let format = ExportFormat::parse(&config.export_format).unwrap_or_else(|| {
            log::warn!("Unknown export format {:?}; using PNG", config.export_format);
            ExportFormat::Png
        });
        Self {
            format,
            quality: config.export_quality,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.target_scale = Some(scale);
        self
    }

    pub fn with_device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    /// The scale the export is rendered at.
    pub fn effective_scale(&self) -> f64 {
        self.target_scale.unwrap_or(self.device_pixel_ratio)
    }

    fn validate(&self) -> Result<(), ExportError> {
        if self.format == ExportFormat::Jpeg
            && !(self.quality.is_finite() && self.quality > 0.0 && self.quality <= 1.0)
        {
            return Err(ExportError::InvalidQuality(self.quality));
        }
        Ok(())
    }
}

/// Encoded image bytes with their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decode a `data:<mime>;base64,<payload>` URL.
pub fn data_url_to_blob(url: &str) -> Result<Blob, ExportError> {
    let invalid = |reason: &str| ExportError::InvalidDataUrl(reason.to_string());
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| invalid("missing data: prefix"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("missing payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("only base64 payloads are supported"))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ExportError::InvalidDataUrl(e.to_string()))?;
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    Ok(Blob::new(mime, bytes))
}

/// Render the composite at the export scale and encode it.
///
/// Stickers that fail to resolve are left out, as in any render.
pub fn export_to_blob(
    resources: &mut RenderResources,
    base_image: Option<&str>,
    layers: &[Layer],
    width: f64,
    height: f64,
    options: &ExportOptions,
    sink: Option<&dyn DiagnosticSink>,
) -> Result<Blob, ExportError> {
    options.validate()?;
    let scale = options.effective_scale();
    let request = CompositeRequest::new(layers, width, height)
        .with_base_image(base_image)
        .with_scale(scale);

    let mut surface = Surface::new(width, height, scale)?;
    let report = draw_composite(&mut surface, resources, &request, sink)?;
    if !report.is_complete() {
        log::warn!(
            "Exporting with {} layer(s) left out",
            report.skipped.len()
        );
    }

    let pixmap = surface.into_pixmap();
    let (w, h) = (pixmap.width(), pixmap.height());
    let rgba = pixmap_to_rgba(&pixmap);
    let bytes = match options.format {
        ExportFormat::Png => encode_png(&rgba, w, h)?,
        ExportFormat::Jpeg => encode_jpeg(&rgba, w, h, options.quality)?,
    };
    log::debug!(
        "Exported {w}x{h} {} ({} bytes)",
        options.format.mime(),
        bytes.len()
    );
    Ok(Blob::new(options.format.mime(), bytes))
}

/// Same as [`export_to_blob`], as a data URL.
pub fn export_to_data_url(
    resources: &mut RenderResources,
    base_image: Option<&str>,
    layers: &[Layer],
    width: f64,
    height: f64,
    options: &ExportOptions,
    sink: Option<&dyn DiagnosticSink>,
) -> Result<String, ExportError> {
    export_to_blob(resources, base_image, layers, width, height, options, sink)
        .map(|blob| blob.to_data_url())
}

fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(rgba, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| RendererError::Encode(e.to_string()))?;
    Ok(out)
}

/// JPEG has no alpha; transparent areas come out black.
fn encode_jpeg(rgba: &[u8], width: u32, height: u32, quality: f64) -> Result<Vec<u8>, ExportError> {
    let rgb: Vec<u8> = rgba
        .chunks_exact(4)
        .flat_map(|px| {
            let a = px[3] as u16;
            [0, 1, 2].map(|c| ((px[c] as u16 * a + 127) / 255) as u8)
        })
        .collect();
    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(&rgb, width, height, image::ExtendedColorType::Rgb8)
        .map_err(|e| RendererError::Encode(e.to_string()))?;
    Ok(out)
}

/// External service that stores an image and returns its public URL.
pub trait Uploader {
    fn upload(&self, blob: Blob) -> BoxFuture<'_, Result<String, ExportError>>;
}

/// Uploader that keeps blobs in memory.
#[derive(Debug, Default)]
pub struct MemoryUploader {
    uploads: Mutex<Vec<Blob>>,
}

impl MemoryUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<Blob> {
        self.uploads
            .lock()
            .map(|uploads| uploads.clone())
            .unwrap_or_default()
    }
}

impl Uploader for MemoryUploader {
    fn upload(&self, blob: Blob) -> BoxFuture<'_, Result<String, ExportError>> {
        Box::pin(async move {
            let mut uploads = self
                .uploads
                .lock()
                .map_err(|_| ExportError::Upload("upload store poisoned".to_string()))?;
            uploads.push(blob);
            Ok(format!("memory://{}", uploads.len()))
        })
    }
}

/// Export and upload, returning the public URL.
#[allow(clippy::too_many_arguments)]
pub async fn share(
    resources: &mut RenderResources,
    uploader: &dyn Uploader,
    base_image: Option<&str>,
    layers: &[Layer],
    width: f64,
    height: f64,
    options: &ExportOptions,
    sink: Option<&dyn DiagnosticSink>,
) -> Result<String, ExportError> {
    let blob = export_to_blob(resources, base_image, layers, width, height, options, sink)?;
    let url = uploader.upload(blob).await?;
    log::info!("Shared meme at {url}");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memeforge_core::{Bitmap, StickerLayer};

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);
        loop {
            if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
                return result;
            }
        }
    }

    fn scene() -> (RenderResources, Vec<Layer>) {
        let mut resources = RenderResources::new().unwrap();
        resources
            .bitmaps
            .insert_bitmap("sq", &Bitmap::solid(2, 2, [255, 0, 0, 255]).unwrap())
            .unwrap();
        let mut sticker = StickerLayer::new("sq", "", 20, 20).unwrap();
        sticker.x = 10.0;
        sticker.y = 10.0;
        (resources, vec![Layer::Sticker(sticker)])
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("PNG"), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::parse("jpg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::parse("image/jpeg"), Some(ExportFormat::Jpeg));
        assert_eq!(ExportFormat::parse("gif"), None);
    }

    #[test]
    fn test_options_from_config() {
        let config = EditorConfig {
            export_format: "jpg".to_string(),
            export_quality: 0.5,
            ..EditorConfig::default()
        };
        let options = ExportOptions::from_config(&config);
        assert_eq!(options.format, ExportFormat::Jpeg);
        assert_eq!(options.quality, 0.5);
        assert_eq!(options.effective_scale(), 1.0);
    }

    #[test]
    fn test_png_export_at_target_scale() {
        let (mut resources, layers) = scene();
        let options = ExportOptions::new()
            .with_device_pixel_ratio(3.0)
            .with_scale(2.0);
        let blob =
            export_to_blob(&mut resources, None, &layers, 40.0, 30.0, &options, None).unwrap();
        assert_eq!(blob.mime, "image/png");

        let decoded = image::load_from_memory(&blob.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (80, 60));
        assert_eq!(decoded.get_pixel(40, 40).0, [255, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(5, 5).0[3], 0);
    }

    #[test]
    fn test_scale_defaults_to_device_pixel_ratio() {
        let (mut resources, layers) = scene();
        let options = ExportOptions::new().with_device_pixel_ratio(2.0);
        let blob =
            export_to_blob(&mut resources, None, &layers, 40.0, 30.0, &options, None).unwrap();
        let decoded = image::load_from_memory(&blob.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (80, 60));
    }

    #[test]
    fn test_jpeg_quality_validated() {
        let (mut resources, layers) = scene();
        for quality in [0.0, -0.5, 1.5, f64::NAN] {
            let options = ExportOptions::new()
                .with_format(ExportFormat::Jpeg)
                .with_quality(quality);
            let err = export_to_blob(&mut resources, None, &layers, 40.0, 30.0, &options, None)
                .unwrap_err();
            assert!(matches!(err, ExportError::InvalidQuality(_)));
        }

        let options = ExportOptions::new()
            .with_format(ExportFormat::Jpeg)
            .with_quality(1.0);
        let blob =
            export_to_blob(&mut resources, None, &layers, 40.0, 30.0, &options, None).unwrap();
        assert_eq!(blob.mime, "image/jpeg");
        assert_eq!(&blob.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_png_ignores_quality() {
        let (mut resources, layers) = scene();
        let options = ExportOptions::new().with_quality(7.0);
        assert!(export_to_blob(&mut resources, None, &layers, 10.0, 10.0, &options, None).is_ok());
    }

    #[test]
    fn test_data_url_round_trip() {
        let (mut resources, layers) = scene();
        let url = export_to_data_url(
            &mut resources,
            None,
            &layers,
            40.0,
            30.0,
            &ExportOptions::new(),
            None,
        )
        .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let blob = data_url_to_blob(&url).unwrap();
        assert_eq!(blob.mime, "image/png");
        assert_eq!(&blob.bytes[1..4], b"PNG");
    }

    #[test]
    fn test_invalid_data_urls() {
        for url in ["image/png;base64,AAAA", "data:image/png,AAAA", "data:;base64,@@@"] {
            assert!(matches!(
                data_url_to_blob(url),
                Err(ExportError::InvalidDataUrl(_))
            ));
        }
    }

    #[test]
    fn test_export_does_not_mutate_layers() {
        let (mut resources, layers) = scene();
        let before = layers.clone();
        export_to_blob(
            &mut resources,
            None,
            &layers,
            40.0,
            30.0,
            &ExportOptions::new(),
            None,
        )
        .unwrap();
        assert_eq!(layers, before);
    }

    #[test]
    fn test_share_uploads_blob() {
        let (mut resources, layers) = scene();
        let uploader = MemoryUploader::new();
        let url = block_on(share(
            &mut resources,
            &uploader,
            None,
            &layers,
            40.0,
            30.0,
            &ExportOptions::new(),
            None,
        ))
        .unwrap();
        assert_eq!(url, "memory://1");
        assert_eq!(uploader.uploads().len(), 1);
        assert_eq!(uploader.uploads()[0].mime, "image/png");
    }
}
