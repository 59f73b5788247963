//! Text measurement and glyph drawing.
//!
//! Placement only relies on [`TextMetrics`]: callers center a run with `x - width / 2` and
//! put the baseline at `y + (ascent + descent) / 2 - descent`. Any shaper whose `draw` honors
//! its own `measure` lands text visually centered on the anchor.

use std::path::{Path, PathBuf};

use vello_cpu::kurbo::{Affine, Point, Rect};

use crate::foundation::error::{ExportError, ExportResult};
use crate::overlay::color::ColorDef;

/// Measured extent of a single line of text at a given size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextMetrics {
    pub width: f64,
    pub ascent: f64,
    pub descent: f64,
}

impl TextMetrics {
    pub fn height(&self) -> f64 {
        self.ascent + self.descent
    }

    /// Left end of the baseline that centers this run on `anchor`.
    pub fn origin_for_center(&self, anchor: Point) -> Point {
        Point::new(
            anchor.x - self.width / 2.0,
            anchor.y + (self.ascent + self.descent) / 2.0 - self.descent,
        )
    }
}

pub trait TextShaper {
    fn measure(&mut self, text: &str, size: f64) -> TextMetrics;

    /// Fill `text` with its baseline starting at `origin`. The caller has set the transform.
    fn draw(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        text: &str,
        size: f64,
        origin: Point,
        color: ColorDef,
    );
}

/// Fonts tried, in order, when no font file is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Pick a shaper: the configured font, else a known system font, else the built-in bitmap face.
pub fn default_shaper(font_path: Option<&Path>) -> Box<dyn TextShaper> {
    let candidates = font_path
        .map(Path::to_path_buf)
        .into_iter()
        .chain(SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from));
    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match ParleyShaper::from_file(&path) {
            Ok(shaper) => {
                tracing::debug!(font = %path.display(), "text shaper: parley");
                return Box::new(shaper);
            }
            Err(e) => tracing::warn!(font = %path.display(), error = %e, "font rejected"),
        }
    }
    tracing::debug!("text shaper: built-in bitmap face");
    Box::new(BitmapShaper)
}

type Brush = [u8; 4];

/// Outline text through `parley` shaping and `vello_cpu` glyph fills.
pub struct ParleyShaper {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<Brush>,
    family_name: String,
    font: vello_cpu::peniko::FontData,
}

impl ParleyShaper {
    pub fn from_file(path: &Path) -> ExportResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> ExportResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let families = font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(bytes.clone()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| ExportError::internal("no font families registered from font bytes"))?;
        let family_name = font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| ExportError::internal("registered font family has no name"))?
            .to_string();

        Ok(Self {
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            family_name,
            font: vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes), 0),
        })
    }

    pub fn family_name(&self) -> &str {
        &self.family_name
    }

    fn layout(&mut self, text: &str, size: f64) -> parley::Layout<Brush> {
        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family_name.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size as f32));
        let mut layout: parley::Layout<Brush> = builder.build(text);
        layout.break_all_lines(None);
        layout
    }
}

impl TextShaper for ParleyShaper {
    fn measure(&mut self, text: &str, size: f64) -> TextMetrics {
        let layout = self.layout(text, size);
        let (ascent, descent) = layout
            .lines()
            .next()
            .map(|line| {
                let m = line.metrics();
                (f64::from(m.ascent), f64::from(m.descent))
            })
            .unwrap_or((size * 0.8, size * 0.2));
        TextMetrics {
            width: f64::from(layout.width()),
            ascent,
            descent,
        }
    }

    fn draw(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        text: &str,
        size: f64,
        origin: Point,
        color: ColorDef,
    ) {
        let layout = self.layout(text, size);
        let Some(first_baseline) = layout.lines().next().map(|l| f64::from(l.metrics().baseline))
        else {
            return;
        };
        ctx.set_transform(Affine::translate((origin.x, origin.y - first_baseline)));
        ctx.set_paint(color.to_paint());
        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                let glyphs = run.positioned_glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(&self.font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }
        ctx.set_transform(Affine::IDENTITY);
    }
}

/// 5x7 bitmap face for hosts without any usable font file.
///
/// Each glyph is drawn from axis-aligned cells of `size / 8` pixels, advancing six cells per
/// character. The measured width is the ink width (no trailing gap), so centering is exact.
#[derive(Clone, Copy, Debug, Default)]
pub struct BitmapShaper;

const CELLS_ADVANCE: f64 = 6.0;
const CELLS_WIDE: f64 = 5.0;
const CELLS_ASCENT: f64 = 7.0;
const CELLS_DESCENT: f64 = 1.0;

impl BitmapShaper {
    fn cell(size: f64) -> f64 {
        size / 8.0
    }
}

impl TextShaper for BitmapShaper {
    fn measure(&mut self, text: &str, size: f64) -> TextMetrics {
        let s = Self::cell(size);
        let n = text.chars().count() as f64;
        let width = if n == 0.0 {
            0.0
        } else {
            ((n - 1.0) * CELLS_ADVANCE + CELLS_WIDE) * s
        };
        TextMetrics {
            width,
            ascent: CELLS_ASCENT * s,
            descent: CELLS_DESCENT * s,
        }
    }

    fn draw(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        text: &str,
        size: f64,
        origin: Point,
        color: ColorDef,
    ) {
        let s = Self::cell(size);
        let top = origin.y - CELLS_ASCENT * s;
        ctx.set_transform(Affine::IDENTITY);
        ctx.set_paint(color.to_paint());

        for (i, ch) in text.chars().enumerate() {
            let left = origin.x + i as f64 * CELLS_ADVANCE * s;
            for (row, bits) in glyph_rows(ch).iter().enumerate() {
                let y0 = top + row as f64 * s;
                let mut col = 0;
                while col < 5 {
                    if bits & (0x10 >> col) == 0 {
                        col += 1;
                        continue;
                    }
                    let start = col;
                    while col < 5 && bits & (0x10 >> col) != 0 {
                        col += 1;
                    }
                    ctx.fill_rect(&Rect::new(
                        left + start as f64 * s,
                        y0,
                        left + col as f64 * s,
                        y0 + s,
                    ));
                }
            }
        }
    }
}

/// Row bitmaps (bit 4 is the leftmost column). Lowercase folds to uppercase; unknown
/// characters render as `?`.
fn glyph_rows(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ' ' => [0; 7],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/text.rs"]
mod tests;
