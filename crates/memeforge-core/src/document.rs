//! Meme document: base image, layer collection and selection.

use crate::config::{EditorConfig, TextDefaults};
use crate::diagnostics::{Diagnostic, DiagnosticSink, emit};
use crate::layers::{
    Effects, Layer, LayerId, LayerKind, MAX_Z_INDEX, MemeColor, Outline, StickerLayer, TextLayer,
    sanitize_font_size,
};
use crate::loader::{ImageSource, LoadOutcome, LoadTracker, StickerLoad, fetch_bitmap};
use crate::measure::TextMeasure;
use kurbo::{Point, Size, Vec2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Offset applied to duplicated layers, canvas-space pixels.
pub const DUPLICATE_OFFSET: f64 = 20.0;

/// Fraction of the canvas a new sticker is fitted into.
pub const DEFAULT_STICKER_FIT_FRACTION: f64 = 0.4;

/// Document errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),
    #[error("{update} does not apply to {kind:?} layers")]
    KindMismatch {
        update: &'static str,
        kind: LayerKind,
    },
    #[error("Sticker has no valid size or aspect ratio")]
    InvalidSticker,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The image every layer is composited over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    pub src: String,
    /// Natural size; defines canvas-space.
    pub width: u32,
    pub height: u32,
}

impl BaseImage {
    pub fn new(src: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            src: src.into(),
            width,
            height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

/// A single change to a layer.
///
/// Both gestures and property editors mutate layers through
/// [`MemeDocument::update_layer`]; there is no other write path.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerUpdate {
    /// New top-left position.
    Move(Point),
    /// New box size. Clamped to the minimum; stickers keep their aspect ratio.
    Resize(Size),
    /// New rotation in degrees.
    Rotate(f64),
    Text(String),
    FontFamily(String),
    FontSize(f64),
    /// Text fill color.
    Color(MemeColor),
    Effects(Effects),
    /// Sticker accessibility label.
    Alt(String),
    ZIndex(i32),
}

impl LayerUpdate {
    fn name(&self) -> &'static str {
        match self {
            LayerUpdate::Move(_) => "move",
            LayerUpdate::Resize(_) => "resize",
            LayerUpdate::Rotate(_) => "rotate",
            LayerUpdate::Text(_) => "text",
            LayerUpdate::FontFamily(_) => "fontFamily",
            LayerUpdate::FontSize(_) => "fontSize",
            LayerUpdate::Color(_) => "color",
            LayerUpdate::Effects(_) => "effects",
            LayerUpdate::Alt(_) => "alt",
            LayerUpdate::ZIndex(_) => "zIndex",
        }
    }
}

fn default_max_z_index() -> i32 {
    MAX_Z_INDEX
}

fn default_sticker_fit_fraction() -> f64 {
    DEFAULT_STICKER_FIT_FRACTION
}

/// A meme under construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemeDocument {
    pub id: String,
    #[serde(default)]
    pub base_image: Option<BaseImage>,
    /// Layers in insertion order. Paint order comes from `z_index`.
    #[serde(default)]
    layers: Vec<Layer>,
    #[serde(skip)]
    selected: Option<LayerId>,
    #[serde(skip)]
    loads: LoadTracker,
    #[serde(skip, default = "default_max_z_index")]
    max_z_index: i32,
    #[serde(skip, default = "default_sticker_fit_fraction")]
    sticker_fit_fraction: f64,
}

impl Default for MemeDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemeDocument {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            base_image: None,
            layers: Vec::new(),
            selected: None,
            loads: LoadTracker::new(),
            max_z_index: MAX_Z_INDEX,
            sticker_fit_fraction: DEFAULT_STICKER_FIT_FRACTION,
        }
    }

    /// An empty document using the z-index ceiling and sticker fit from
    /// `config`.
    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new().with_config(config)
    }

    /// Apply the document-level settings of `config`.
    pub fn with_config(self, config: &EditorConfig) -> Self {
        self.with_max_z_index(config.max_z_index)
            .with_sticker_fit_fraction(config.sticker_fit_fraction)
    }

    pub fn with_base_image(mut self, base_image: BaseImage) -> Self {
        self.base_image = Some(base_image);
        self
    }

    /// Override the z-index ceiling. Values below 1 are ignored. Existing
    /// layers above the new ceiling are compacted under it.
    pub fn with_max_z_index(mut self, max_z_index: i32) -> Self {
        if max_z_index > 0 {
            self.max_z_index = max_z_index;
            if self.layers.iter().any(|l| l.z_index() > max_z_index) {
                self.normalize_z_order();
            }
        }
        self
    }

    /// Fraction of the canvas new stickers are fitted into. Values outside
    /// `(0, 1]` are ignored.
    pub fn with_sticker_fit_fraction(mut self, fraction: f64) -> Self {
        if fraction > 0.0 && fraction <= 1.0 {
            self.sticker_fit_fraction = fraction;
        }
        self
    }

    pub fn sticker_fit_fraction(&self) -> f64 {
        self.sticker_fit_fraction
    }

    pub fn set_base_image(&mut self, base_image: Option<BaseImage>) {
        self.base_image = base_image;
    }

    /// Canvas-space size: the base image's natural size, or zero without one.
    pub fn canvas_size(&self) -> Size {
        self.base_image
            .as_ref()
            .map(BaseImage::size)
            .unwrap_or(Size::ZERO)
    }

    pub fn max_z_index(&self) -> i32 {
        self.max_z_index
    }

    /// Layers in insertion order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    fn get_mut(&mut self, id: LayerId) -> Result<&mut Layer, DocumentError> {
        self.layers
            .iter_mut()
            .find(|l| l.id() == id)
            .ok_or(DocumentError::LayerNotFound(id))
    }

    /// Layers in paint order (back to front). Ties keep insertion order.
    pub fn layers_ordered(&self) -> Vec<&Layer> {
        let mut ordered: Vec<&Layer> = self.layers.iter().collect();
        ordered.sort_by_key(|l| l.z_index());
        ordered
    }

    /// Owned copy of the layers in paint order, taken once per render.
    pub fn snapshot(&self) -> Vec<Layer> {
        self.layers_ordered().into_iter().cloned().collect()
    }

    /// Layers under a canvas-space point, topmost first.
    pub fn layers_at_point(&self, point: Point, tolerance: f64) -> Vec<LayerId> {
        self.layers_ordered()
            .into_iter()
            .rev()
            .filter(|l| l.hit_test(point, tolerance))
            .map(Layer::id)
            .collect()
    }

    /// Insert a layer as-is. Its z-index is clamped to the ceiling.
    pub fn add_layer(&mut self, mut layer: Layer) -> LayerId {
        let id = layer.id();
        layer.set_z_index(layer.z_index().min(self.max_z_index));
        self.layers.push(layer);
        id
    }

    /// Add a text layer with the configured defaults, centered and on top.
    /// The new layer becomes the selection.
    pub fn add_text(&mut self, defaults: &TextDefaults, measure: &dyn TextMeasure) -> LayerId {
        let mut text = TextLayer::new(
            defaults.text.clone(),
            defaults.font_family.clone(),
            defaults.font_size,
            measure,
        )
        .with_color(defaults.color);
        if defaults.outline_width > 0.0 {
            text.effects = Effects::none()
                .with_outline(Outline::new(defaults.outline_color, defaults.outline_width));
        }
        let mut layer = Layer::Text(text);
        self.center_on_canvas(&mut layer);
        self.insert_on_top(layer)
    }

    fn center_on_canvas(&self, layer: &mut Layer) {
        let canvas = self.canvas_size();
        let size = layer.size();
        layer.set_position(Point::new(
            (canvas.width - size.width) / 2.0,
            (canvas.height - size.height) / 2.0,
        ));
    }

    fn insert_on_top(&mut self, layer: Layer) -> LayerId {
        let id = layer.id();
        self.layers.push(layer);
        self.place_on_top(id);
        self.selected = Some(id);
        id
    }

    /// Start loading the bitmap for a new sticker. The layer is created by
    /// [`complete_sticker`](Self::complete_sticker) once the load resolves.
    pub fn begin_sticker(&mut self, src: impl Into<String>, alt: impl Into<String>) -> StickerLoad {
        self.loads.begin(Uuid::new_v4(), src.into(), alt.into())
    }

    /// Create the sticker for a finished load.
    ///
    /// The sticker is scaled to fit the document's sticker fit fraction of
    /// the canvas, centered and placed on top. Superseded loads and failed loads create nothing
    /// and return `Ok(None)`; both are reported as diagnostics.
    pub fn complete_sticker(
        &mut self,
        outcome: LoadOutcome,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Result<Option<LayerId>, DocumentError> {
        let LoadOutcome { load, result } = outcome;
        if !self.loads.finish(&load) {
            emit(sink, Diagnostic::StaleLoadIgnored { layer_id: load.layer_id });
            return Ok(None);
        }
        let bitmap = match result {
            Ok(bitmap) => bitmap,
            Err(e) => {
                emit(
                    sink,
                    Diagnostic::StickerLoadFailed {
                        layer_id: load.layer_id,
                        reason: e.to_string(),
                    },
                );
                return Ok(None);
            }
        };

        let mut sticker = StickerLayer::new(load.src, load.alt, bitmap.width, bitmap.height)
            .ok_or(DocumentError::InvalidSticker)?;
        sticker.id = load.layer_id;
        let canvas = self.canvas_size();
        let fit_fraction = self.sticker_fit_fraction;
        if canvas.width > 0.0 && canvas.height > 0.0 {
            sticker = sticker.fit_within(canvas.width * fit_fraction, canvas.height * fit_fraction);
        }
        let mut layer = Layer::Sticker(sticker);
        self.center_on_canvas(&mut layer);
        Ok(Some(self.insert_on_top(layer)))
    }

    /// Load a bitmap and add it as a sticker in one step.
    pub async fn add_sticker(
        &mut self,
        source: &dyn ImageSource,
        src: impl Into<String>,
        alt: impl Into<String>,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Result<Option<LayerId>, DocumentError> {
        let load = self.begin_sticker(src, alt);
        let outcome = fetch_bitmap(source, load).await;
        self.complete_sticker(outcome, sink)
    }

    /// Start replacing the bitmap of an existing sticker. Any earlier
    /// replacement still in flight for the same layer is superseded.
    pub fn begin_source_change(
        &mut self,
        id: LayerId,
        src: impl Into<String>,
    ) -> Result<StickerLoad, DocumentError> {
        let layer = self.get(id).ok_or(DocumentError::LayerNotFound(id))?;
        let sticker = layer.as_sticker().ok_or(DocumentError::KindMismatch {
            update: "src",
            kind: layer.kind(),
        })?;
        let alt = sticker.alt.clone();
        Ok(self.loads.begin(id, src.into(), alt))
    }

    /// Apply a finished source change. Returns `true` if the layer changed.
    ///
    /// The aspect ratio stays the one captured when the sticker was created.
    pub fn complete_source_change(
        &mut self,
        outcome: LoadOutcome,
        sink: Option<&dyn DiagnosticSink>,
    ) -> bool {
        let LoadOutcome { load, result } = outcome;
        if !self.loads.finish(&load) {
            emit(sink, Diagnostic::StaleLoadIgnored { layer_id: load.layer_id });
            return false;
        }
        if let Err(e) = result {
            emit(
                sink,
                Diagnostic::StickerLoadFailed {
                    layer_id: load.layer_id,
                    reason: e.to_string(),
                },
            );
            return false;
        }
        match self.get_mut(load.layer_id) {
            Ok(Layer::Sticker(sticker)) => {
                sticker.src = load.src;
                true
            }
            _ => false,
        }
    }

    /// Whether a bitmap load for `id` is still in flight.
    pub fn is_loading(&self, load: &StickerLoad) -> bool {
        self.loads.is_current(load)
    }

    /// Apply one change to a layer.
    ///
    /// Non-finite geometry is ignored. Content and font changes on text
    /// layers re-measure the box through `measure`.
    pub fn update_layer(
        &mut self,
        id: LayerId,
        update: LayerUpdate,
        measure: &dyn TextMeasure,
    ) -> Result<(), DocumentError> {
        let max_z_index = self.max_z_index;
        let name = update.name();
        let layer = self.get_mut(id)?;
        let kind = layer.kind();
        let mismatch = || DocumentError::KindMismatch { update: name, kind };

        match update {
            LayerUpdate::Move(position) => {
                if position.is_finite() {
                    layer.set_position(position);
                } else {
                    log::debug!("Ignoring non-finite position for layer {id}");
                }
            }
            LayerUpdate::Resize(size) => {
                if size.width.is_finite() && size.height.is_finite() {
                    layer.set_size(size);
                } else {
                    log::debug!("Ignoring non-finite size for layer {id}");
                }
            }
            LayerUpdate::Rotate(rotation) => {
                if rotation.is_finite() {
                    layer.set_rotation(rotation);
                } else {
                    log::debug!("Ignoring non-finite rotation for layer {id}");
                }
            }
            LayerUpdate::Text(text) => match layer {
                Layer::Text(l) => {
                    l.text = text;
                    l.remeasure(measure);
                }
                Layer::Sticker(_) => return Err(mismatch()),
            },
            LayerUpdate::FontFamily(family) => match layer {
                Layer::Text(l) => {
                    l.font_family = family;
                    l.remeasure(measure);
                }
                Layer::Sticker(_) => return Err(mismatch()),
            },
            LayerUpdate::FontSize(size) => match layer {
                Layer::Text(l) => {
                    l.font_size = sanitize_font_size(size);
                    l.remeasure(measure);
                }
                Layer::Sticker(_) => return Err(mismatch()),
            },
            LayerUpdate::Color(color) => match layer {
                Layer::Text(l) => l.color = color,
                Layer::Sticker(_) => return Err(mismatch()),
            },
            LayerUpdate::Effects(effects) => {
                *layer.effects_mut() = effects.sanitized();
            }
            LayerUpdate::Alt(alt) => match layer {
                Layer::Sticker(l) => l.alt = alt,
                Layer::Text(_) => return Err(mismatch()),
            },
            LayerUpdate::ZIndex(z) => layer.set_z_index(z.min(max_z_index)),
        }
        Ok(())
    }

    /// Remove a layer. Clears the selection if it pointed at this layer and
    /// drops any bitmap load still pending for it.
    pub fn remove_layer(&mut self, id: LayerId) -> Result<Layer, DocumentError> {
        let index = self
            .layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or(DocumentError::LayerNotFound(id))?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.loads.cancel(id);
        Ok(self.layers.remove(index))
    }

    /// Remove the selected layer, if any.
    pub fn remove_selected(&mut self) -> Option<Layer> {
        let id = self.selected?;
        self.remove_layer(id).ok()
    }

    /// Copy a layer under a new id, offset and on top. The copy is selected.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId, DocumentError> {
        let mut copy = self.get(id).ok_or(DocumentError::LayerNotFound(id))?.clone();
        copy.set_id(Uuid::new_v4());
        copy.set_position(copy.position() + Vec2::new(DUPLICATE_OFFSET, DUPLICATE_OFFSET));
        Ok(self.insert_on_top(copy))
    }

    pub fn select(&mut self, id: LayerId) -> Result<(), DocumentError> {
        if self.get(id).is_none() {
            return Err(DocumentError::LayerNotFound(id));
        }
        self.selected = Some(id);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<LayerId> {
        self.selected
    }

    pub fn selected_layer(&self) -> Option<&Layer> {
        self.selected.and_then(|id| self.get(id))
    }

    /// Raise a layer above every other layer.
    ///
    /// A layer that is already strictly on top keeps its z-index.
    pub fn bring_to_front(&mut self, id: LayerId) -> Result<(), DocumentError> {
        let z = self.get(id).ok_or(DocumentError::LayerNotFound(id))?.z_index();
        if self.top_z_index_except(id).is_none_or(|m| m < z) {
            return Ok(());
        }
        self.place_on_top(id);
        Ok(())
    }

    /// Lower a layer below every other layer. Z-indices are renumbered
    /// `0..n` in paint order with this layer first.
    pub fn send_to_back(&mut self, id: LayerId) -> Result<(), DocumentError> {
        if self.get(id).is_none() {
            return Err(DocumentError::LayerNotFound(id));
        }
        let mut order: Vec<LayerId> = self.layers_ordered().iter().map(|l| l.id()).collect();
        order.retain(|&other| other != id);
        order.insert(0, id);
        self.assign_z_order(&order);
        Ok(())
    }

    fn top_z_index_except(&self, id: LayerId) -> Option<i32> {
        self.layers
            .iter()
            .filter(|l| l.id() != id)
            .map(Layer::z_index)
            .max()
    }

    /// Give `id` a z-index strictly above every other layer.
    ///
    /// When that would pass the ceiling, the other layers are compacted
    /// below it first. If there are more layers than z-index values, the
    /// lowest ones share values but `id` still ends up alone on top.
    fn place_on_top(&mut self, id: LayerId) {
        let max_z_index = self.max_z_index;
        let z = match self.top_z_index_except(id) {
            None => 0,
            Some(top) if top < max_z_index => top + 1,
            Some(_) => {
                let others: Vec<LayerId> = self
                    .layers_ordered()
                    .iter()
                    .map(|l| l.id())
                    .filter(|&other| other != id)
                    .collect();
                log::debug!("Compacting z-order of {} layers", others.len() + 1);
                let below = max_z_index - 1;
                let skip = others.len().saturating_sub(below as usize + 1);
                for (index, other) in others.iter().enumerate() {
                    // The bottom `skip` layers share z-index 0.
                    let z = index.saturating_sub(skip) as i32;
                    if let Some(layer) = self.layers.iter_mut().find(|l| l.id() == *other) {
                        layer.set_z_index(z);
                    }
                }
                (others.len().min(below as usize + 1)) as i32
            }
        };
        if let Some(layer) = self.layers.iter_mut().find(|l| l.id() == id) {
            layer.set_z_index(z);
        }
    }

    /// Renumber z-indices `0..n` keeping the current paint order.
    pub fn normalize_z_order(&mut self) {
        let order: Vec<LayerId> = self.layers_ordered().iter().map(|l| l.id()).collect();
        log::debug!("Compacting z-order of {} layers", order.len());
        self.assign_z_order(&order);
    }

    fn assign_z_order(&mut self, order: &[LayerId]) {
        let max_z_index = self.max_z_index;
        for (z, id) in order.iter().enumerate() {
            if let Some(layer) = self.layers.iter_mut().find(|l| l.id() == *id) {
                layer.set_z_index((z as i32).min(max_z_index));
            }
        }
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a document, restoring the layer invariants that hand-edited or
    /// foreign JSON may violate. Stickers without a positive finite aspect
    /// ratio are rejected.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let mut document: Self = serde_json::from_str(json)?;
        let max_z_index = document.max_z_index;
        for layer in &mut document.layers {
            normalize_layer(layer, max_z_index)?;
        }
        Ok(document)
    }
}

fn normalize_layer(layer: &mut Layer, max_z_index: i32) -> Result<(), DocumentError> {
    match layer {
        Layer::Sticker(sticker) => {
            if !(sticker.aspect_ratio.is_finite() && sticker.aspect_ratio > 0.0) {
                return Err(DocumentError::InvalidSticker);
            }
        }
        Layer::Text(text) => text.font_size = sanitize_font_size(text.font_size),
    }
    if !layer.position().is_finite() {
        layer.set_position(Point::ZERO);
    }
    if !layer.rotation().is_finite() {
        layer.set_rotation(0.0);
    }
    layer.set_size(layer.size());
    layer.set_z_index(layer.z_index().min(max_z_index));
    let effects = layer.effects().sanitized();
    *layer.effects_mut() = effects;
    Ok(())
}
