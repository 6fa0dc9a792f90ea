//! Visual effect parameters shared by text and sticker layers.
//!
//! All magnitudes are canvas-space pixels. A magnitude of zero turns the
//! effect off; a missing color does the same.

use super::MemeColor;
use serde::{Deserialize, Serialize};

/// Replace NaN and infinities with zero.
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Outline drawn around the silhouette of the content.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Outline {
    pub color: Option<MemeColor>,
    pub width: f64,
}

impl Outline {
    pub fn new(color: MemeColor, width: f64) -> Self {
        Self {
            color: Some(color),
            width,
        }
    }

    pub fn is_active(&self) -> bool {
        self.width > 0.0 && self.color.is_some_and(|c| c.is_visible())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            color: self.color,
            width: finite_or_zero(self.width).max(0.0),
        }
    }
}

/// Drop shadow.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Shadow {
    pub color: Option<MemeColor>,
    pub blur: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Shadow {
    pub fn new(color: MemeColor, blur: f64, offset_x: f64, offset_y: f64) -> Self {
        Self {
            color: Some(color),
            blur,
            offset_x,
            offset_y,
        }
    }

    pub fn is_active(&self) -> bool {
        self.blur > 0.0 && self.color.is_some_and(|c| c.is_visible())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            color: self.color,
            blur: finite_or_zero(self.blur).max(0.0),
            offset_x: finite_or_zero(self.offset_x),
            offset_y: finite_or_zero(self.offset_y),
        }
    }
}

/// Soft glow around the content.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Glow {
    pub color: Option<MemeColor>,
    pub strength: f64,
}

impl Glow {
    pub fn new(color: MemeColor, strength: f64) -> Self {
        Self {
            color: Some(color),
            strength,
        }
    }

    pub fn is_active(&self) -> bool {
        self.strength > 0.0 && self.color.is_some_and(|c| c.is_visible())
    }

    pub fn sanitized(&self) -> Self {
        Self {
            color: self.color,
            strength: finite_or_zero(self.strength).max(0.0),
        }
    }
}

/// The three independent effect groups of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Effects {
    pub outline: Outline,
    pub shadow: Shadow,
    pub glow: Glow,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = outline;
        self
    }

    pub fn with_shadow(mut self, shadow: Shadow) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn with_glow(mut self, glow: Glow) -> Self {
        self.glow = glow;
        self
    }

    /// Copy with malformed numbers coerced to safe values.
    pub fn sanitized(&self) -> Self {
        Self {
            outline: self.outline.sanitized(),
            shadow: self.shadow.sanitized(),
            glow: self.glow.sanitized(),
        }
    }

    pub fn any_active(&self) -> bool {
        self.outline.is_active() || self.shadow.is_active() || self.glow.is_active()
    }

    /// How far (canvas-space pixels) the effects can paint outside the
    /// layer's bounding box.
    pub fn bleed(&self) -> f64 {
        let effects = self.sanitized();
        let mut bleed: f64 = 0.0;
        if effects.outline.is_active() {
            bleed += effects.outline.width;
        }
        let mut soft: f64 = 0.0;
        if effects.shadow.is_active() {
            let s = effects.shadow;
            soft = soft.max(s.blur * 1.5 + s.offset_x.abs().max(s.offset_y.abs()));
        }
        if effects.glow.is_active() {
            // The widest glow pass blurs at 1.5x strength.
            soft = soft.max(effects.glow.strength * 1.5 * 1.5);
        }
        (bleed + soft).ceil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_without_color() {
        let outline = Outline {
            color: None,
            width: 4.0,
        };
        assert!(!outline.is_active());
        assert!(Outline::new(MemeColor::black(), 4.0).is_active());
        assert!(!Outline::new(MemeColor::black(), 0.0).is_active());
        assert!(!Outline::new(MemeColor::transparent(), 2.0).is_active());
    }

    #[test]
    fn test_sanitize_nan() {
        let effects = Effects::none()
            .with_outline(Outline::new(MemeColor::black(), f64::NAN))
            .with_shadow(Shadow::new(MemeColor::black(), f64::INFINITY, f64::NAN, 3.0))
            .with_glow(Glow::new(MemeColor::white(), -2.0));

        let clean = effects.sanitized();
        assert_eq!(clean.outline.width, 0.0);
        assert_eq!(clean.shadow.blur, 0.0);
        assert_eq!(clean.shadow.offset_x, 0.0);
        assert_eq!(clean.shadow.offset_y, 3.0);
        assert_eq!(clean.glow.strength, 0.0);
        assert!(!clean.any_active());
    }

    #[test]
    fn test_bleed() {
        assert_eq!(Effects::none().bleed(), 0.0);

        let outline_only = Effects::none().with_outline(Outline::new(MemeColor::black(), 3.0));
        assert_eq!(outline_only.bleed(), 3.0);

        let glow = Effects::none().with_glow(Glow::new(MemeColor::white(), 10.0));
        assert_eq!(glow.bleed(), 23.0);
    }

    #[test]
    fn test_deserialize_partial() {
        let effects: Effects =
            serde_json::from_str(r#"{"outline":{"width":2,"color":{"r":0,"g":0,"b":0,"a":255}}}"#)
                .unwrap();
        assert!(effects.outline.is_active());
        assert!(!effects.shadow.is_active());
        assert!(!effects.glow.is_active());
    }
}
