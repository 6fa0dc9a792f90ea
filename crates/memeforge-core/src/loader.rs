//! Bitmap source collaborator and load bookkeeping.
//!
//! Decoding happens outside the core; the core only needs the natural size
//! of a sticker's bitmap before the layer can be created. Loads are tagged
//! with a per-layer generation so a slow load that has been superseded by a
//! newer one for the same layer is ignored when it finally resolves.

use crate::layers::LayerId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future for collaborator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Bitmap loading errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error("Image load failed: {0}")]
    Other(String),
}

/// A decoded bitmap: straight-alpha RGBA8, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<Vec<u8>>,
}

impl Bitmap {
    /// Wrap RGBA8 pixels. Returns `None` if the buffer length does not match.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels: Arc::new(pixels),
        })
    }

    /// A bitmap filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Option<Self> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_rgba8(width, height, pixels)
    }
}

/// Resolves a `src` reference into a decoded bitmap.
pub trait ImageSource {
    fn load(&self, src: &str) -> BoxFuture<'_, Result<Bitmap, LoadError>>;
}

/// An in-flight load, identifying the layer and its generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerLoad {
    pub layer_id: LayerId,
    pub src: String,
    pub alt: String,
    pub(crate) generation: u64,
}

/// Result of a finished load, ready to hand back to the document.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub load: StickerLoad,
    pub result: Result<Bitmap, LoadError>,
}

/// Await a bitmap from `source` for a load started on the document.
pub async fn fetch_bitmap(source: &dyn ImageSource, load: StickerLoad) -> LoadOutcome {
    let result = source.load(&load.src).await;
    LoadOutcome { load, result }
}

/// Tracks the newest load generation per layer.
#[derive(Debug, Clone, Default)]
pub struct LoadTracker {
    latest: HashMap<LayerId, u64>,
    next_generation: u64,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a load for `layer_id`, superseding any load already in flight.
    pub fn begin(&mut self, layer_id: LayerId, src: String, alt: String) -> StickerLoad {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.latest.insert(layer_id, generation);
        StickerLoad {
            layer_id,
            src,
            alt,
            generation,
        }
    }

    /// Whether `load` is still the newest load for its layer.
    pub fn is_current(&self, load: &StickerLoad) -> bool {
        self.latest.get(&load.layer_id) == Some(&load.generation)
    }

    /// Retire `load`. Returns `true` if it was current and its result should
    /// be applied.
    pub fn finish(&mut self, load: &StickerLoad) -> bool {
        if self.is_current(load) {
            self.latest.remove(&load.layer_id);
            true
        } else {
            false
        }
    }

    /// Drop any pending load for a layer, so its result is ignored.
    pub fn cancel(&mut self, layer_id: LayerId) {
        self.latest.remove(&layer_id);
    }

    pub fn pending(&self) -> usize {
        self.latest.len()
    }
}

/// Image source backed by a fixed table of bitmaps, for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    bitmaps: HashMap<String, Bitmap>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, src: impl Into<String>, bitmap: Bitmap) {
        self.bitmaps.insert(src.into(), bitmap);
    }
}

impl ImageSource for MemoryImageSource {
    fn load(&self, src: &str) -> BoxFuture<'_, Result<Bitmap, LoadError>> {
        let src = src.to_string();
        Box::pin(async move {
            self.bitmaps
                .get(&src)
                .cloned()
                .ok_or(LoadError::NotFound(src))
        })
    }
}

#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    // Simple blocking executor for tests
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

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_newer_load_supersedes() {
        let mut tracker = LoadTracker::new();
        let id = Uuid::new_v4();
        let first = tracker.begin(id, "a.png".into(), String::new());
        let second = tracker.begin(id, "b.png".into(), String::new());

        assert!(!tracker.is_current(&first));
        assert!(!tracker.finish(&first));
        assert!(tracker.finish(&second));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_independent_layers() {
        let mut tracker = LoadTracker::new();
        let a = tracker.begin(Uuid::new_v4(), "a.png".into(), String::new());
        let b = tracker.begin(Uuid::new_v4(), "b.png".into(), String::new());
        assert!(tracker.finish(&b));
        assert!(tracker.finish(&a));
    }

    #[test]
    fn test_cancel() {
        let mut tracker = LoadTracker::new();
        let id = Uuid::new_v4();
        let load = tracker.begin(id, "a.png".into(), String::new());
        tracker.cancel(id);
        assert!(!tracker.finish(&load));
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemoryImageSource::new();
        source.insert("red.png", Bitmap::solid(4, 2, [255, 0, 0, 255]).unwrap());

        let loaded = block_on(source.load("red.png")).unwrap();
        assert_eq!((loaded.width, loaded.height), (4, 2));
        assert_eq!(&loaded.pixels[0..4], &[255, 0, 0, 255]);

        let missing = block_on(source.load("nope.png"));
        assert!(matches!(missing, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_bitmap_size_mismatch() {
        assert!(Bitmap::from_rgba8(2, 2, vec![0; 15]).is_none());
        assert!(Bitmap::from_rgba8(0, 2, Vec::new()).is_none());
    }
}
