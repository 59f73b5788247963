use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::foundation::core::{Canvas, FrameIndex, Point};
use crate::foundation::error::{ExportError, ExportResult};
use crate::overlay::color::ColorDef;

pub const DEFAULT_SIZE: f64 = 24.0;
pub const DEFAULT_TEXT: &str = "Sample Text";
/// Smallest font size a stacked text layer is drawn at.
pub const MIN_LAYER_TEXT_SIZE: f64 = 12.0;

/// What an overlay draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayKind {
    Text,
    Image,
    Shape,
    LayerStack,
}

impl OverlayKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" | "img" | "sticker" => Some(Self::Image),
            "shape" => Some(Self::Shape),
            "layerstack" | "layer_stack" | "layers" | "composite" => Some(Self::LayerStack),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Shape => "shape",
            Self::LayerStack => "layerStack",
        }
    }
}

/// Built-in shape outlines, sized in pixels around the anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShapeKind {
    Circle,
    Rectangle,
    Triangle,
}

impl ShapeKind {
    /// Unknown names draw a circle.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "rectangle" | "rect" | "square" => Self::Rectangle,
            "triangle" => Self::Triangle,
            _ => Self::Circle,
        }
    }
}

/// A declarative overlay, immutable for the duration of one run.
///
/// `LayerStack` overlays carry their content in `layers` (drawn in declared order) and an
/// optional `canvas_snapshot` drawn underneath them.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlaySpec {
    pub kind: OverlayKind,
    /// Text content, image path, or shape name depending on `kind`.
    pub value: String,
    /// Anchor in frame pixels; `None` means frame center.
    pub position: Option<Point>,
    pub color: ColorDef,
    pub background_color: Option<ColorDef>,
    /// Font size for text, edge hint for images.
    pub size: f64,
    /// Explicit box size in pixels.
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Multiplies the alpha of everything this overlay draws.
    pub opacity: f64,
    /// When set, `position`, `width` and `height` are fractions of the frame size.
    pub normalized: bool,
    /// Offset added to the frame number when computing animation time.
    pub frame_index: FrameIndex,
    pub layers: Vec<OverlaySpec>,
    pub canvas_snapshot: Option<PathBuf>,
}

impl OverlaySpec {
    pub fn text(value: impl Into<String>) -> Self {
        Self::with_kind(OverlayKind::Text, value)
    }

    pub fn shape(name: impl Into<String>) -> Self {
        Self::with_kind(OverlayKind::Shape, name)
    }

    pub fn image(path: impl Into<String>) -> Self {
        Self::with_kind(OverlayKind::Image, path)
    }

    pub fn layer_stack(layers: Vec<OverlaySpec>) -> Self {
        Self {
            layers,
            ..Self::with_kind(OverlayKind::LayerStack, "")
        }
    }

    fn with_kind(kind: OverlayKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            position: None,
            color: ColorDef::WHITE,
            background_color: None,
            size: DEFAULT_SIZE,
            width: None,
            height: None,
            opacity: 1.0,
            normalized: false,
            frame_index: FrameIndex(0),
            layers: Vec::new(),
            canvas_snapshot: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Point::new(x, y));
        self
    }

    pub fn colored(mut self, color: ColorDef) -> Self {
        self.color = color;
        self
    }

    pub fn sized(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.canvas_snapshot = Some(path.into());
        self
    }

    /// Anchor for a `canvas`-sized frame, defaulting to its center.
    pub fn anchor(&self, canvas: Canvas) -> Point {
        match self.position {
            Some(p) if self.normalized => Point::new(
                p.x * f64::from(canvas.width),
                p.y * f64::from(canvas.height),
            ),
            Some(p) => p,
            None => canvas.center(),
        }
    }

    /// Explicit box size in pixels, if both dimensions were given.
    pub fn box_size(&self, canvas: Canvas) -> Option<(f64, f64)> {
        let (w, h) = (self.width?, self.height?);
        if self.normalized {
            Some((w * f64::from(canvas.width), h * f64::from(canvas.height)))
        } else {
            Some((w, h))
        }
    }

    pub fn shape_kind(&self) -> ShapeKind {
        ShapeKind::from_name(&self.value)
    }

    /// Frame number that drives animation for output frame `idx`.
    pub fn animation_frame(&self, idx: FrameIndex) -> FrameIndex {
        FrameIndex(idx.0.saturating_add(self.frame_index.0))
    }

    pub fn from_json(s: &str) -> ExportResult<Self> {
        let wire: OverlayWire = serde_json::from_str(s)
            .map_err(|e| ExportError::invalid_overlay(format!("overlay json: {e}")))?;
        wire.into_spec(true)
    }

    pub fn from_value(v: serde_json::Value) -> ExportResult<Self> {
        let wire: OverlayWire = serde_json::from_value(v)
            .map_err(|e| ExportError::invalid_overlay(format!("overlay json: {e}")))?;
        wire.into_spec(true)
    }
}

/// Clamp an anchor so a `w`x`h` box centered on it stays inside the frame.
pub fn clamp_anchor(anchor: Point, canvas: Canvas, w: f64, h: f64) -> Point {
    let cw = f64::from(canvas.width);
    let ch = f64::from(canvas.height);
    let half_w = (w / 2.0).min(cw / 2.0);
    let half_h = (h / 2.0).min(ch / 2.0);
    Point::new(
        anchor.x.clamp(half_w, cw - half_w),
        anchor.y.clamp(half_h, ch - half_h),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverlayWire {
    #[serde(alias = "type")]
    kind: Option<String>,
    #[serde(alias = "text", alias = "uri", alias = "content")]
    value: Option<String>,
    position: Option<PositionWire>,
    color: Option<String>,
    background_color: Option<String>,
    #[serde(alias = "fontSize")]
    size: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    opacity: Option<f64>,
    #[serde(default)]
    normalized: bool,
    frame_index: Option<u64>,
    #[serde(default)]
    layers: Vec<OverlayWire>,
    canvas_image_uri: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PositionWire {
    x: Option<f64>,
    y: Option<f64>,
}

impl OverlayWire {
    fn into_spec(self, top_level: bool) -> ExportResult<OverlaySpec> {
        let kind = match self.kind.as_deref() {
            Some(k) => OverlayKind::parse(k)
                .ok_or_else(|| ExportError::invalid_overlay(format!("unknown overlay kind '{k}'")))?,
            None if !self.layers.is_empty() || self.canvas_image_uri.is_some() => {
                OverlayKind::LayerStack
            }
            None => OverlayKind::Text,
        };
        if !top_level && kind == OverlayKind::LayerStack {
            return Err(ExportError::invalid_overlay("layer stacks cannot be nested"));
        }

        let value = self.value.unwrap_or_else(|| match kind {
            OverlayKind::Text => DEFAULT_TEXT.to_owned(),
            OverlayKind::Shape => "circle".to_owned(),
            OverlayKind::Image | OverlayKind::LayerStack => String::new(),
        });

        let mut size = self.size.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(DEFAULT_SIZE);
        if !top_level && kind == OverlayKind::Text {
            size = size.max(MIN_LAYER_TEXT_SIZE);
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        for layer in self.layers {
            match layer.into_spec(false) {
                Ok(l) => layers.push(l),
                Err(e) => tracing::warn!(error = %e, "skipping unsupported layer"),
            }
        }

        let position = self.position.and_then(|p| match (p.x, p.y) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            _ => None,
        });

        Ok(OverlaySpec {
            kind,
            value,
            position,
            color: self
                .color
                .as_deref()
                .map(ColorDef::parse_or_white)
                .unwrap_or(ColorDef::WHITE),
            background_color: self.background_color.as_deref().map(ColorDef::parse_or_white),
            size,
            width: self.width,
            height: self.height,
            opacity: self.opacity.unwrap_or(1.0).clamp(0.0, 1.0),
            frame_index: FrameIndex(self.frame_index.unwrap_or(0)),
            layers,
            normalized: self.normalized,
            canvas_snapshot: self.canvas_image_uri.map(|u| strip_file_uri(&u).into()),
        })
    }
}

/// Strip a `file://` scheme, leaving plain paths untouched.
pub fn strip_file_uri(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

#[cfg(test)]
#[path = "../../tests/unit/overlay/spec.rs"]
mod tests;
