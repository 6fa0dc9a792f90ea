//! Text layer.

use super::{Effects, LayerId, MIN_LAYER_DIMENSION, MemeColor};
use crate::measure::TextMeasure;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A block of text drawn centered in its bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLayer {
    pub(crate) id: LayerId,
    /// Top-left corner, canvas-space.
    pub x: f64,
    pub y: f64,
    /// Box size. Recomputed from the text whenever content or font change.
    pub(crate) width: f64,
    pub(crate) height: f64,
    /// Degrees, clockwise, about the box center.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i32,
    pub text: String,
    pub font_family: String,
    /// Font size in pixels.
    pub font_size: f64,
    pub color: MemeColor,
    #[serde(default)]
    pub effects: Effects,
}

impl TextLayer {
    /// Default font size in pixels.
    pub const DEFAULT_FONT_SIZE: f64 = 40.0;

    /// Create a text layer at the origin, sized by `measure`.
    pub fn new(
        text: impl Into<String>,
        font_family: impl Into<String>,
        font_size: f64,
        measure: &dyn TextMeasure,
    ) -> Self {
        let mut layer = Self {
            id: Uuid::new_v4(),
            x: 0.0,
            y: 0.0,
            width: MIN_LAYER_DIMENSION,
            height: MIN_LAYER_DIMENSION,
            rotation: 0.0,
            z_index: 0,
            text: text.into(),
            font_family: font_family.into(),
            font_size: sanitize_font_size(font_size),
            color: MemeColor::white(),
            effects: Effects::none(),
        };
        layer.remeasure(measure);
        layer
    }

    pub fn with_color(mut self, color: MemeColor) -> Self {
        self.color = color;
        self
    }

    pub fn with_effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Font shorthand in CSS form, e.g. `40px Impact`.
    pub fn font(&self) -> String {
        format!("{}px {}", self.font_size, self.font_family)
    }

    /// Recompute the box from the current text and font.
    pub(crate) fn remeasure(&mut self, measure: &dyn TextMeasure) {
        let size = measure.measure(&self.text, &self.font_family, self.font_size);
        let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
        self.width = finite(size.width).max(MIN_LAYER_DIMENSION);
        self.height = finite(size.height).max(MIN_LAYER_DIMENSION);
    }
}

/// Font sizes must be positive; anything else falls back to the default.
pub(crate) fn sanitize_font_size(size: f64) -> f64 {
    if size.is_finite() && size > 0.0 {
        size
    } else {
        TextLayer::DEFAULT_FONT_SIZE
    }
}
