//! Text measurement collaborator.
//!
//! Text layers size their box from the rendered extent of their text. The
//! renderer provides a glyph-accurate implementation; [`ApproximateMeasure`]
//! is used where no font engine is available.

use kurbo::Size;

/// Measures the rendered extent of a block of text.
pub trait TextMeasure {
    /// Width of the widest line and total height of all lines, in pixels.
    fn measure(&self, text: &str, font_family: &str, font_size: f64) -> Size;
}

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// Character-count based estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproximateMeasure;

impl ApproximateMeasure {
    /// Average glyph advance as a fraction of the font size.
    fn char_width_factor(font_family: &str) -> f64 {
        let family = font_family.to_ascii_lowercase();
        if family.contains("mono") {
            0.60
        } else if family.contains("impact") || family.contains("condensed") {
            0.48
        } else if family.contains("serif") && !family.contains("sans") {
            0.52
        } else {
            0.55
        }
    }
}

impl TextMeasure for ApproximateMeasure {
    fn measure(&self, text: &str, font_family: &str, font_size: f64) -> Size {
        // `lines()` drops a trailing empty line, which still takes up space.
        let lines: Vec<&str> = text.split('\n').collect();
        let widest = lines
            .iter()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        let width = widest as f64 * font_size * Self::char_width_factor(font_family);
        let height = lines.len() as f64 * font_size * LINE_HEIGHT_FACTOR;
        Size::new(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_height() {
        let one = ApproximateMeasure.measure("AB", "Arial", 10.0);
        let two = ApproximateMeasure.measure("AB\nCD", "Arial", 10.0);
        assert!((two.height - 2.0 * one.height).abs() < 1e-9);
        assert!((two.width - one.width).abs() < 1e-9);
    }

    #[test]
    fn test_widest_line_wins() {
        let size = ApproximateMeasure.measure("A\nABCD\nAB", "Arial", 10.0);
        assert!((size.width - 4.0 * 10.0 * 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_empty() {
        let size = ApproximateMeasure.measure("", "Arial", 10.0);
        assert_eq!(size.width, 0.0);
        assert!((size.height - 12.0).abs() < 1e-9);
    }
}
