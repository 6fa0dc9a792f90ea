//! Fonts, line layout and glyph outlines for text layers.
//!
//! Text is centered in its box on both axes. Lines wrap at word boundaries
//! when they would not fit the box width, and each line is `1.2 * size`
//! tall, matching [`memeforge_core::measure::LINE_HEIGHT_FACTOR`].

use crate::renderer::{RenderResult, RendererError};
use ab_glyph::{Font, FontArc, GlyphId, OutlineCurve, PxScale, ScaleFont};
use kurbo::Size;
use memeforge_core::TextMeasure;
use memeforge_core::measure::LINE_HEIGHT_FACTOR;
use std::collections::HashMap;
use tiny_skia::{Path, PathBuilder};

static SANS: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
static SANS_BOLD: &[u8] = include_bytes!("../assets/DejaVuSans-Bold.ttf");
static SERIF: &[u8] = include_bytes!("../assets/DejaVuSerif.ttf");

/// Slack for floating point noise when a measured box is used as the wrap
/// width for the same text.
const WRAP_TOLERANCE: f64 = 0.5;

/// Font faces available to the renderer.
///
/// Family names are looked up case-insensitively in a CSS-style
/// comma-separated list. Registered families win; otherwise the name is
/// mapped onto one of the bundled faces, with sans-serif as the last resort.
#[derive(Clone)]
pub struct FontBook {
    sans: FontArc,
    sans_bold: FontArc,
    serif: FontArc,
    registered: HashMap<String, FontArc>,
}

impl FontBook {
    pub fn new() -> RenderResult<Self> {
        Ok(Self {
            sans: load_static(SANS)?,
            sans_bold: load_static(SANS_BOLD)?,
            serif: load_static(SERIF)?,
            registered: HashMap::new(),
        })
    }

    /// Register a font under a family name.
    pub fn register(&mut self, family: &str, data: Vec<u8>) -> RenderResult<()> {
        let font = FontArc::try_from_vec(data)
            .map_err(|e| RendererError::Decode(format!("font {family}: {e}")))?;
        self.registered.insert(normalize_family(family), font);
        Ok(())
    }

    /// The face used for a CSS font-family list.
    pub fn resolve(&self, font_family: &str) -> &FontArc {
        font_family
            .split(',')
            .map(normalize_family)
            .filter(|name| !name.is_empty())
            .find_map(|name| {
                self.registered
                    .get(&name)
                    .or_else(|| self.bundled(&name))
            })
            .unwrap_or(&self.sans)
    }

    fn bundled(&self, name: &str) -> Option<&FontArc> {
        const BOLD: [&str; 4] = ["impact", "anton", "bebas", "bold"];
        const SANS: [&str; 5] = ["sans", "arial", "helvetica", "verdana", "system-ui"];
        const SERIF: [&str; 4] = ["serif", "times", "georgia", "garamond"];

        if BOLD.iter().any(|k| name.contains(k)) {
            Some(&self.sans_bold)
        } else if SANS.iter().any(|k| name.contains(k)) {
            Some(&self.sans)
        } else if SERIF.iter().any(|k| name.contains(k)) {
            Some(&self.serif)
        } else {
            None
        }
    }
}

impl TextMeasure for FontBook {
    /// Widest unwrapped line and the height of all lines.
    fn measure(&self, text: &str, font_family: &str, font_size: f64) -> Size {
        let font = self.resolve(font_family);
        let lines: Vec<&str> = text.split('\n').collect();
        let width = lines
            .iter()
            .map(|line| line_width(font, line, font_size))
            .fold(0.0, f64::max);
        Size::new(width, lines.len() as f64 * font_size * LINE_HEIGHT_FACTOR)
    }
}

fn load_static(data: &'static [u8]) -> RenderResult<FontArc> {
    FontArc::try_from_slice(data).map_err(|e| RendererError::Decode(format!("bundled font: {e}")))
}

fn normalize_family(name: &str) -> String {
    name.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_ascii_lowercase()
}

/// Scale at which one em is `font_size` pixels.
fn px_scale(font: &FontArc, font_size: f64) -> PxScale {
    let units_per_em = font.units_per_em().unwrap_or(1000.0);
    PxScale::from(font_size as f32 * font.height_unscaled() / units_per_em)
}

/// Advance width of a single line, kerning included.
pub fn line_width(font: &FontArc, line: &str, font_size: f64) -> f64 {
    let scaled = font.as_scaled(px_scale(font, font_size));
    let mut width = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in line.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        last = Some(id);
    }
    width as f64
}

/// Break `text` into lines no wider than `max_width` where possible.
///
/// Explicit newlines always break. A single word wider than `max_width`
/// gets a line of its own.
pub fn wrap_lines(font: &FontArc, text: &str, font_size: f64, max_width: f64) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if line_width(font, &candidate, font_size) <= max_width + WRAP_TOLERANCE {
                current = candidate;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        lines.push(current);
    }
    lines
}

/// Glyph outlines of `text` laid out centered in a `box_size` box, or `None`
/// if nothing would be drawn.
pub fn text_path(font: &FontArc, text: &str, font_size: f64, box_size: Size) -> Option<Path> {
    if !(font_size.is_finite() && font_size > 0.0) {
        return None;
    }
    let scaled = font.as_scaled(px_scale(font, font_size));
    let (h_factor, v_factor) = (scaled.h_scale_factor(), scaled.v_scale_factor());
    // Baseline offset from the line center, like a "middle" text baseline.
    let middle = (scaled.ascent() + scaled.descent()) / 2.0;

    let lines = wrap_lines(font, text, font_size, box_size.width);
    let line_height = font_size * LINE_HEIGHT_FACTOR;
    let top = (box_size.height - lines.len() as f64 * line_height) / 2.0;

    let mut builder = PathBuilder::new();
    for (index, line) in lines.iter().enumerate() {
        let center_y = top + line_height * (index as f64 + 0.5);
        let baseline = center_y as f32 + middle;
        let mut pen_x = ((box_size.width - line_width(font, line, font_size)) / 2.0) as f32;
        let mut last: Option<GlyphId> = None;

        for ch in line.chars() {
            let id = font.glyph_id(ch);
            if let Some(prev) = last {
                pen_x += scaled.kern(prev, id);
            }
            if let Some(outline) = font.outline(id) {
                let origin_x = pen_x;
                append_outline(&mut builder, &outline.curves, |p| {
                    (origin_x + p.x * h_factor, baseline - p.y * v_factor)
                });
            }
            pen_x += scaled.h_advance(id);
            last = Some(id);
        }
    }
    builder.finish()
}

/// Append glyph curves (font units, y up) as closed contours.
fn append_outline(
    builder: &mut PathBuilder,
    curves: &[OutlineCurve],
    map: impl Fn(ab_glyph::Point) -> (f32, f32),
) {
    let mut last: Option<(f32, f32)> = None;
    for curve in curves {
        let start = match curve {
            OutlineCurve::Line(p0, _)
            | OutlineCurve::Quad(p0, _, _)
            | OutlineCurve::Cubic(p0, _, _, _) => map(*p0),
        };
        if last != Some(start) {
            if last.is_some() {
                builder.close();
            }
            builder.move_to(start.0, start.1);
        }
        let end = match curve {
            OutlineCurve::Line(_, p1) => {
                let p1 = map(*p1);
                builder.line_to(p1.0, p1.1);
                p1
            }
            OutlineCurve::Quad(_, c, p2) => {
                let (c, p2) = (map(*c), map(*p2));
                builder.quad_to(c.0, c.1, p2.0, p2.1);
                p2
            }
            OutlineCurve::Cubic(_, c1, c2, p3) => {
                let (c1, c2, p3) = (map(*c1), map(*c2), map(*p3));
                builder.cubic_to(c1.0, c1.1, c2.0, c2.1, p3.0, p3.1);
                p3
            }
        };
        last = Some(end);
    }
    if last.is_some() {
        builder.close();
    }
}
