//! MemeForge Core Library
//!
//! Platform-agnostic data model and gesture logic for the meme editor.
//! Rasterization lives in `memeforge-render`.

pub mod config;
pub mod diagnostics;
pub mod document;
pub mod interaction;
pub mod layers;
pub mod loader;
pub mod measure;
pub mod viewport;

pub use config::{ConfigError, EditorConfig, TextDefaults};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticSink, LogSink};
pub use document::{BaseImage, DocumentError, LayerUpdate, MemeDocument};
pub use interaction::{
    ActiveInteraction, Handle, HandleKind, InteractionEngine, InteractionKind, InteractionOutcome,
    PointerEvent,
};
pub use layers::{
    Effects, Glow, Layer, LayerId, LayerKind, MAX_Z_INDEX, MIN_LAYER_DIMENSION, MemeColor,
    Outline, Shadow, StickerLayer, TextLayer,
};
pub use loader::{Bitmap, ImageSource, LoadError, LoadOutcome, LoadTracker, StickerLoad};
pub use measure::{ApproximateMeasure, TextMeasure};
pub use viewport::Viewport;
