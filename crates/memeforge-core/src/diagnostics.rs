//! Optional diagnostics observer.
//!
//! Recoverable conditions (a sticker that failed to load, a stale bitmap
//! load, a degenerate gesture tick) are absorbed by the core. Callers that
//! want to see them pass a [`DiagnosticSink`]; nothing depends on one being
//! present.

use crate::layers::LayerId;
use std::sync::Mutex;

/// A recoverable condition observed by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A layer was left out of a render.
    LayerSkipped { layer_id: LayerId, reason: String },
    /// The base image could not be resolved; the render continued without it.
    BaseImageSkipped { reason: String },
    /// A bitmap load finished after a newer one was started for the same layer.
    StaleLoadIgnored { layer_id: LayerId },
    /// A bitmap load for a new sticker failed; no layer was created.
    StickerLoadFailed { layer_id: LayerId, reason: String },
    /// A pointer update produced degenerate geometry and was dropped.
    DegenerateGesture { layer_id: LayerId },
}

/// Receives diagnostics.
pub trait DiagnosticSink {
    fn report(&self, diagnostic: Diagnostic);
}

/// Forward a diagnostic to the `log` facade and, if present, to a sink.
pub fn emit(sink: Option<&dyn DiagnosticSink>, diagnostic: Diagnostic) {
    match &diagnostic {
        Diagnostic::LayerSkipped { layer_id, reason } => {
            log::warn!("Skipping layer {layer_id}: {reason}");
        }
        Diagnostic::BaseImageSkipped { reason } => {
            log::warn!("Rendering without base image: {reason}");
        }
        Diagnostic::StaleLoadIgnored { layer_id } => {
            log::debug!("Ignoring superseded bitmap load for layer {layer_id}");
        }
        Diagnostic::StickerLoadFailed { layer_id, reason } => {
            log::warn!("Sticker {layer_id} failed to load: {reason}");
        }
        Diagnostic::DegenerateGesture { layer_id } => {
            log::debug!("Dropped degenerate gesture update for layer {layer_id}");
        }
    }
    if let Some(sink) = sink {
        sink.report(diagnostic);
    }
}

/// Sink that only logs. Equivalent to passing no sink at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, _diagnostic: Diagnostic) {}
}

/// Sink that records every diagnostic, for inspection in tests and tools.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded diagnostics.
    pub fn drain(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: Diagnostic) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        let id = Uuid::new_v4();
        emit(
            Some(&sink),
            Diagnostic::LayerSkipped {
                layer_id: id,
                reason: "404".into(),
            },
        );
        emit(None, Diagnostic::StaleLoadIgnored { layer_id: id });

        assert_eq!(sink.len(), 1);
        let drained = sink.drain();
        assert!(matches!(&drained[0], Diagnostic::LayerSkipped { layer_id, .. } if *layer_id == id));
        assert!(sink.is_empty());
    }
}
