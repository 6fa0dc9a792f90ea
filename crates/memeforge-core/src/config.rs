//! Editor configuration.

use crate::interaction::{HANDLE_HIT_TOLERANCE, ROTATE_HANDLE_OFFSET};
use crate::layers::{MAX_Z_INDEX, MemeColor, TextLayer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Defaults applied to newly added text layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextDefaults {
    pub text: String,
    pub font_family: String,
    pub font_size: f64,
    pub color: MemeColor,
    pub outline_color: MemeColor,
    pub outline_width: f64,
}

impl Default for TextDefaults {
    fn default() -> Self {
        Self {
            text: "TEXT".to_string(),
            font_family: "Impact".to_string(),
            font_size: TextLayer::DEFAULT_FONT_SIZE,
            color: MemeColor::white(),
            outline_color: MemeColor::black(),
            outline_width: 2.0,
        }
    }
}

/// Editor behaviour settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorConfig {
    /// Ceiling for layer z-index.
    pub max_z_index: i32,
    /// Handle hit radius in viewport pixels.
    pub handle_hit_tolerance: f64,
    /// Distance from the top edge to the rotate handle, in viewport pixels.
    pub rotate_handle_offset: f64,
    /// New stickers are scaled to fit this fraction of the canvas.
    pub sticker_fit_fraction: f64,
    pub text: TextDefaults,
    /// `"png"` or `"jpeg"`.
    pub export_format: String,
    pub export_quality: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_z_index: MAX_Z_INDEX,
            handle_hit_tolerance: HANDLE_HIT_TOLERANCE,
            rotate_handle_offset: ROTATE_HANDLE_OFFSET,
            sticker_fit_fraction: 0.4,
            text: TextDefaults::default(),
            export_format: "png".to_string(),
            export_quality: 0.92,
        }
    }
}

impl EditorConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_z_index <= 0 {
            return Err(ConfigError::Invalid {
                field: "maxZIndex",
                reason: format!("must be positive, got {}", self.max_z_index),
            });
        }
        if !(self.sticker_fit_fraction > 0.0 && self.sticker_fit_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "stickerFitFraction",
                reason: format!("must be in (0, 1], got {}", self.sticker_fit_fraction),
            });
        }
        match self.export_format.as_str() {
            "png" => {}
            "jpeg" | "jpg" => {
                if !(self.export_quality > 0.0 && self.export_quality <= 1.0) {
                    return Err(ConfigError::Invalid {
                        field: "exportQuality",
                        reason: format!("must be in (0, 1], got {}", self.export_quality),
                    });
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    field: "exportFormat",
                    reason: format!("unsupported format {other:?}"),
                });
            }
        }
        Ok(())
    }
}
