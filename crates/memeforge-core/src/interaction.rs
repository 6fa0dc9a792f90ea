//! Pointer gestures: handles, transform math and the gesture state machine.
//!
//! Pointer positions arrive in viewport coordinates. Move and resize work
//! in canvas-space; rotation angles are measured in the viewport, which
//! gives the same angles because the viewport mapping is a uniform scale
//! plus translation.

use crate::config::EditorConfig;
use crate::diagnostics::{Diagnostic, DiagnosticSink, emit};
use crate::document::{DocumentError, LayerUpdate, MemeDocument};
use crate::layers::{Layer, LayerId, MIN_LAYER_DIMENSION, aspect_locked_size};
use crate::measure::TextMeasure;
use crate::viewport::Viewport;
use kurbo::{Point, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Handle hit tolerance in viewport pixels.
pub const HANDLE_HIT_TOLERANCE: f64 = 16.0;
/// Distance from the top edge to the rotate handle, in viewport pixels.
pub const ROTATE_HANDLE_OFFSET: f64 = 30.0;

/// Pointer vectors shorter than this have no usable angle.
const MIN_ROTATE_RADIUS: f64 = 1e-6;

/// Type of selection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    /// Above the top-center edge.
    Rotate,
    /// Bottom-right corner.
    Resize,
}

/// A selection handle with its position and type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Handle {
    /// Position in viewport coordinates.
    pub position: Point,
    pub kind: HandleKind,
}

impl Handle {
    pub fn new(position: Point, kind: HandleKind) -> Self {
        Self { position, kind }
    }

    /// Check if a viewport point hits this handle.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        (point - self.position).hypot2() <= tolerance * tolerance
    }
}

/// Handles of a layer, in viewport coordinates. Both follow the layer's
/// rotation.
pub fn get_handles(layer: &Layer, viewport: &Viewport, rotate_offset: f64) -> [Handle; 2] {
    let to_screen = viewport.transform() * layer.local_transform();
    let size = layer.size();
    let offset = viewport.screen_len_to_canvas(rotate_offset);
    [
        Handle::new(
            to_screen * Point::new(size.width / 2.0, -offset),
            HandleKind::Rotate,
        ),
        Handle::new(
            to_screen * Point::new(size.width, size.height),
            HandleKind::Resize,
        ),
    ]
}

/// Find which handle (if any) is hit at the given viewport point.
pub fn hit_test_handles(
    layer: &Layer,
    viewport: &Viewport,
    point: Point,
    tolerance: f64,
    rotate_offset: f64,
) -> Option<HandleKind> {
    get_handles(layer, viewport, rotate_offset)
        .into_iter()
        .find(|h| h.hit_test(point, tolerance))
        .map(|h| h.kind)
}

/// What a gesture does to its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Move,
    Resize,
    Rotate,
}

impl From<HandleKind> for InteractionKind {
    fn from(kind: HandleKind) -> Self {
        match kind {
            HandleKind::Rotate => InteractionKind::Rotate,
            HandleKind::Resize => InteractionKind::Resize,
        }
    }
}

/// Values captured when a gesture starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionAnchor {
    /// Pointer minus layer position, canvas-space.
    Move { click_offset: Vec2 },
    Resize,
    Rotate {
        /// Box center in viewport coordinates.
        layer_center: Point,
        /// Angle of the pointer around the center at gesture start, radians.
        /// `None` while the pointer has not yet left the center.
        initial_angle: Option<f64>,
        original_rotation_rad: f64,
    },
}

/// The one gesture in progress.
#[derive(Debug, Clone)]
pub struct ActiveInteraction {
    pub layer_id: LayerId,
    pub kind: InteractionKind,
    /// Layer state at gesture start.
    pub original_layer: Layer,
    /// Viewport position of the pointer at gesture start.
    pub start_pointer: Point,
    pub pointer_id: u64,
    pub anchor: InteractionAnchor,
}

/// Pointer input in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down { pointer_id: u64, position: Point },
    Move { pointer_id: u64, position: Point },
    Up { pointer_id: u64, position: Point },
    Cancel { pointer_id: u64 },
}

/// Result of feeding one event to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Not relevant to any gesture.
    Ignored,
    Started {
        layer_id: LayerId,
        kind: InteractionKind,
    },
    Updated { layer_id: LayerId },
    /// The update produced degenerate geometry and was dropped.
    Skipped { layer_id: LayerId },
    Ended { layer_id: LayerId },
    /// A press on empty canvas cleared the selection.
    Deselected,
}

/// New top-left for a move gesture.
pub fn compute_move(pointer: Point, click_offset: Vec2) -> Point {
    pointer - click_offset
}

/// New size for a resize gesture with canvas-space displacement `delta`
/// since gesture start.
///
/// Text layers resize each axis independently. Stickers keep their aspect
/// ratio, taking the width-driven or height-driven candidate with the
/// larger height.
pub fn compute_resize(original: &Layer, delta: Vec2) -> Size {
    let size = original.size();
    let width = size.width + delta.x;
    let height = size.height + delta.y;
    match original.aspect_ratio() {
        Some(aspect) => aspect_locked_size(width, height, aspect),
        None => Size::new(
            width.max(MIN_LAYER_DIMENSION),
            height.max(MIN_LAYER_DIMENSION),
        ),
    }
}

/// New rotation in degrees, relative to the pointer's angular travel.
///
/// Returns `None` when the pointer sits on the center.
pub fn compute_rotation(
    layer_center: Point,
    initial_angle: f64,
    original_rotation_rad: f64,
    pointer: Point,
) -> Option<f64> {
    let current_angle = pointer_angle(layer_center, pointer)?;
    let rotation = (original_rotation_rad + (current_angle - initial_angle)).to_degrees();
    rotation.is_finite().then_some(rotation)
}

/// Angle of `pointer` around `center` in radians, or `None` when the two
/// coincide.
fn pointer_angle(center: Point, pointer: Point) -> Option<f64> {
    let v = pointer - center;
    let length = v.hypot();
    (length.is_finite() && length >= MIN_ROTATE_RADIUS).then(|| v.y.atan2(v.x))
}

/// Gesture state machine: Idle, or one [`ActiveInteraction`].
#[derive(Debug, Clone)]
pub struct InteractionEngine {
    viewport: Viewport,
    active: Option<ActiveInteraction>,
    handle_tolerance: f64,
    rotate_handle_offset: f64,
}

impl Default for InteractionEngine {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            active: None,
            handle_tolerance: HANDLE_HIT_TOLERANCE,
            rotate_handle_offset: ROTATE_HANDLE_OFFSET,
        }
    }
}

impl InteractionEngine {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            handle_tolerance: config.handle_hit_tolerance,
            rotate_handle_offset: config.rotate_handle_offset,
            ..Self::default()
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Replace the viewport mapping. Takes effect on the next event.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn active(&self) -> Option<&ActiveInteraction> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Handles of the selected layer, for drawing the selection chrome.
    pub fn selection_handles(&self, document: &MemeDocument) -> Option<[Handle; 2]> {
        document
            .selected_layer()
            .map(|layer| get_handles(layer, &self.viewport, self.rotate_handle_offset))
    }

    pub fn handle_event(
        &mut self,
        document: &mut MemeDocument,
        event: PointerEvent,
        measure: &dyn TextMeasure,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Result<InteractionOutcome, DocumentError> {
        match event {
            PointerEvent::Down {
                pointer_id,
                position,
            } => self.pointer_down(document, pointer_id, position),
            PointerEvent::Move {
                pointer_id,
                position,
            } => {
                if !self.owns(pointer_id) {
                    return Ok(InteractionOutcome::Ignored);
                }
                self.update(document, position, measure, sink)
            }
            PointerEvent::Up { pointer_id, .. } | PointerEvent::Cancel { pointer_id } => {
                if !self.owns(pointer_id) {
                    return Ok(InteractionOutcome::Ignored);
                }
                Ok(self.end())
            }
        }
    }

    fn owns(&self, pointer_id: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.pointer_id == pointer_id)
    }

    fn pointer_down(
        &mut self,
        document: &mut MemeDocument,
        pointer_id: u64,
        position: Point,
    ) -> Result<InteractionOutcome, DocumentError> {
        // A second press while a gesture runs is not a new gesture.
        if self.active.is_some() {
            return Ok(InteractionOutcome::Ignored);
        }

        // Handles of the selected layer win over any layer body.
        if let Some(layer) = document.selected_layer() {
            let hit = hit_test_handles(
                layer,
                &self.viewport,
                position,
                self.handle_tolerance,
                self.rotate_handle_offset,
            );
            if let Some(kind) = hit {
                let id = layer.id();
                return self.begin(document, id, kind.into(), pointer_id, position);
            }
        }

        let canvas_point = self.viewport.screen_to_canvas(position);
        match document.layers_at_point(canvas_point, 0.0).first() {
            Some(&id) => self.begin(document, id, InteractionKind::Move, pointer_id, position),
            None => {
                document.clear_selection();
                Ok(InteractionOutcome::Deselected)
            }
        }
    }

    /// Start a gesture on a layer: select it, bring it to the front and
    /// capture the anchors for `kind`.
    pub fn begin(
        &mut self,
        document: &mut MemeDocument,
        layer_id: LayerId,
        kind: InteractionKind,
        pointer_id: u64,
        pointer: Point,
    ) -> Result<InteractionOutcome, DocumentError> {
        let original_layer = document
            .get(layer_id)
            .ok_or(DocumentError::LayerNotFound(layer_id))?
            .clone();
        document.select(layer_id)?;
        document.bring_to_front(layer_id)?;

        let anchor = match kind {
            InteractionKind::Move => InteractionAnchor::Move {
                click_offset: self.viewport.screen_to_canvas(pointer) - original_layer.position(),
            },
            InteractionKind::Resize => InteractionAnchor::Resize,
            InteractionKind::Rotate => {
                let layer_center = self.viewport.canvas_to_screen(original_layer.center());
                InteractionAnchor::Rotate {
                    layer_center,
                    initial_angle: pointer_angle(layer_center, pointer),
                    original_rotation_rad: original_layer.rotation().to_radians(),
                }
            }
        };

        log::debug!("Starting {kind:?} on layer {layer_id}");
        self.active = Some(ActiveInteraction {
            layer_id,
            kind,
            original_layer,
            start_pointer: pointer,
            pointer_id,
            anchor,
        });
        Ok(InteractionOutcome::Started { layer_id, kind })
    }

    /// Apply a pointer position to the active gesture.
    pub fn update(
        &mut self,
        document: &mut MemeDocument,
        pointer: Point,
        measure: &dyn TextMeasure,
        sink: Option<&dyn DiagnosticSink>,
    ) -> Result<InteractionOutcome, DocumentError> {
        let Some(layer_id) = self.active.as_ref().map(|a| a.layer_id) else {
            return Ok(InteractionOutcome::Ignored);
        };
        if document.get(layer_id).is_none() {
            // Deleted mid-gesture.
            self.active = None;
            return Ok(InteractionOutcome::Ended { layer_id });
        }
        // A rotate that started on the center anchors at the first pointer
        // position off it, without rotating.
        if let Some(ActiveInteraction {
            anchor:
                InteractionAnchor::Rotate {
                    layer_center,
                    initial_angle,
                    ..
                },
            ..
        }) = self.active.as_mut()
        {
            if initial_angle.is_none() {
                *initial_angle = pointer_angle(*layer_center, pointer);
                if initial_angle.is_none() {
                    emit(sink, Diagnostic::DegenerateGesture { layer_id });
                }
                return Ok(InteractionOutcome::Skipped { layer_id });
            }
        }
        let Some(active) = &self.active else {
            return Ok(InteractionOutcome::Ignored);
        };

        let update = match active.anchor {
            InteractionAnchor::Move { click_offset } => Some(LayerUpdate::Move(compute_move(
                self.viewport.screen_to_canvas(pointer),
                click_offset,
            ))),
            InteractionAnchor::Resize => {
                let delta = self
                    .viewport
                    .screen_delta_to_canvas(pointer - active.start_pointer);
                Some(LayerUpdate::Resize(compute_resize(&active.original_layer, delta)))
            }
            InteractionAnchor::Rotate {
                layer_center,
                initial_angle,
                original_rotation_rad,
            } => initial_angle
                .and_then(|initial| {
                    compute_rotation(layer_center, initial, original_rotation_rad, pointer)
                })
                .map(LayerUpdate::Rotate),
        };

        let Some(update) = update.filter(update_is_finite) else {
            emit(sink, Diagnostic::DegenerateGesture { layer_id });
            return Ok(InteractionOutcome::Skipped { layer_id });
        };
        document.update_layer(layer_id, update, measure)?;
        Ok(InteractionOutcome::Updated { layer_id })
    }

    /// Finish the active gesture. The last geometry stays.
    pub fn end(&mut self) -> InteractionOutcome {
        match self.active.take() {
            Some(active) => {
                log::debug!("Finished {:?} on layer {}", active.kind, active.layer_id);
                InteractionOutcome::Ended {
                    layer_id: active.layer_id,
                }
            }
            None => InteractionOutcome::Ignored,
        }
    }
}

fn update_is_finite(update: &LayerUpdate) -> bool {
    match update {
        LayerUpdate::Move(p) => p.is_finite(),
        LayerUpdate::Resize(s) => s.width.is_finite() && s.height.is_finite(),
        LayerUpdate::Rotate(r) => r.is_finite(),
        _ => true,
    }
}
