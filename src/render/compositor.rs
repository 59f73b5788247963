//! Draws one output frame: background, canvas snapshot, layers, then the top-level overlay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use vello_cpu::kurbo::{Affine, BezPath, Circle, Point, Rect, RoundedRect, Shape as _, Stroke};

use crate::foundation::core::{Canvas, FrameIndex, Fps};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::premultiply_rgba8_in_place;
use crate::media::codec::DecodedFrame;
use crate::overlay::color::ColorDef;
use crate::overlay::spec::{OverlayKind, OverlaySpec, ShapeKind, clamp_anchor, strip_file_uri};
use crate::render::context::{RenderContext, premul_bytes_to_image};
use crate::render::surface::{FrameRGBA, InputSurface};
use crate::render::text::TextShaper;

pub const CIRCLE_RADIUS: f64 = 25.0;
pub const RECT_HALF_WIDTH: f64 = 30.0;
pub const RECT_HALF_HEIGHT: f64 = 20.0;
pub const TRIANGLE_HALF: f64 = 25.0;
pub const SHAPE_STROKE_WIDTH: f64 = 2.0;
pub const SHADOW_OFFSET: f64 = 2.0;
pub const PLACEHOLDER_SIZE: f64 = 100.0;
pub const PLACEHOLDER_COLOR: ColorDef = ColorDef::rgba(76.0 / 255.0, 175.0 / 255.0, 80.0 / 255.0, 1.0);
const PLACEHOLDER_BORDER: f64 = 3.0;
const PLACEHOLDER_LABEL_SIZE: f64 = 16.0;

/// What sits underneath the overlay for one frame.
#[derive(Clone, Copy, Debug)]
pub enum Background<'a> {
    /// A decoded source picture, scaled to the output size. Its timestamp is reused.
    Decoded(&'a DecodedFrame),
    /// A color cycle for runs without a source picture; timestamps follow `fps`.
    Animated { fps: Fps },
}

impl Background<'_> {
    pub fn presentation_time_micros(&self, idx: FrameIndex) -> i64 {
        match self {
            Self::Decoded(f) => f.presentation_time_micros,
            Self::Animated { fps } => fps.pts_for_frame(idx),
        }
    }
}

/// Background color of a synthesized frame: `0.5 + 0.5 * sin(2t + phase)` per channel.
pub fn animated_background_color(idx: FrameIndex, fps: Fps) -> ColorDef {
    let t = idx.0 as f64 / fps.as_f64();
    let channel = |phase: f64| 0.5 + 0.5 * (2.0 * t + phase).sin();
    ColorDef::rgba(channel(0.0), channel(2.0), channel(4.0), 1.0)
}

#[derive(Clone)]
struct LoadedImage {
    paint: vello_cpu::Image,
    width: f64,
    height: f64,
}

pub struct Compositor {
    target: Option<RenderContext>,
    shaper: Box<dyn TextShaper>,
    images: HashMap<PathBuf, Option<LoadedImage>>,
    frames: u64,
}

impl Compositor {
    pub fn new(shaper: Box<dyn TextShaper>) -> Self {
        Self {
            target: None,
            shaper,
            images: HashMap::new(),
            frames: 0,
        }
    }

    /// Render into `surface` from now on.
    pub fn bind_target_surface(&mut self, surface: InputSurface) -> ExportResult<()> {
        if let Some(old) = self.target.take() {
            old.release();
        }
        self.target = Some(RenderContext::bind(surface)?);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.target.is_some()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    /// Composite frame `idx` and commit it to the bound surface; returns its timestamp.
    pub fn render_frame(
        &mut self,
        idx: FrameIndex,
        background: Background<'_>,
        overlay: &OverlaySpec,
    ) -> ExportResult<i64> {
        let pts = background.presentation_time_micros(idx);
        let ctx = self.compose(idx, background, overlay)?;
        let Some(target) = self.target.as_mut() else {
            return Err(ExportError::internal("compositor has no target surface"));
        };
        target.commit(ctx, pts)?;
        self.frames += 1;
        Ok(pts)
    }

    /// Composite frame `idx` and read it back instead of committing it.
    pub fn render_still(
        &mut self,
        idx: FrameIndex,
        background: Background<'_>,
        overlay: &OverlaySpec,
    ) -> ExportResult<FrameRGBA> {
        let ctx = self.compose(idx, background, overlay)?;
        let Some(target) = self.target.as_mut() else {
            return Err(ExportError::internal("compositor has no target surface"));
        };
        Ok(target.read_back(ctx))
    }

    /// Drop the render context. Idempotent.
    pub fn release_surface(&mut self) {
        if let Some(target) = self.target.take() {
            target.release();
        }
    }

    fn compose(
        &mut self,
        idx: FrameIndex,
        background: Background<'_>,
        overlay: &OverlaySpec,
    ) -> ExportResult<vello_cpu::RenderContext> {
        let Some(target) = self.target.as_ref() else {
            return Err(ExportError::internal("compositor has no target surface"));
        };
        let canvas = target.canvas();
        let mut ctx = target.begin();

        draw_background(&mut ctx, canvas, overlay.animation_frame(idx), background)?;
        self.draw_overlay(&mut ctx, canvas, overlay, false);
        Ok(ctx)
    }

    fn draw_overlay(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        canvas: Canvas,
        spec: &OverlaySpec,
        is_layer: bool,
    ) {
        let faded = spec.opacity < 1.0;
        if faded {
            ctx.push_opacity_layer(spec.opacity as f32);
        }

        if let Some(snapshot) = spec.canvas_snapshot.as_deref() {
            self.draw_snapshot(ctx, canvas, snapshot);
        }
        for layer in &spec.layers {
            self.draw_overlay(ctx, canvas, layer, true);
        }
        match spec.kind {
            OverlayKind::Text => self.draw_text(ctx, canvas, spec, is_layer),
            OverlayKind::Shape => draw_shape(ctx, canvas, spec, is_layer),
            OverlayKind::Image => self.draw_image(ctx, canvas, spec, is_layer),
            OverlayKind::LayerStack => {}
        }

        if faded {
            ctx.pop_layer();
        }
        ctx.set_transform(Affine::IDENTITY);
    }

    fn draw_text(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        canvas: Canvas,
        spec: &OverlaySpec,
        is_layer: bool,
    ) {
        if spec.value.is_empty() {
            return;
        }
        let size = spec.size;
        let metrics = self.shaper.measure(&spec.value, size);
        let pad = if spec.background_color.is_some() {
            size / 3.0
        } else {
            0.0
        };

        let mut anchor = spec.anchor(canvas);
        if is_layer {
            anchor = clamp_anchor(
                anchor,
                canvas,
                metrics.width + 2.0 * pad,
                metrics.height() + 2.0 * pad,
            );
        }
        let origin = metrics.origin_for_center(cpu_point(anchor));

        if let Some(bg) = spec.background_color {
            let rect = Rect::new(
                origin.x - pad,
                origin.y - metrics.ascent - pad,
                origin.x + metrics.width + pad,
                origin.y + metrics.descent + pad,
            );
            ctx.set_transform(Affine::IDENTITY);
            ctx.set_paint(bg.to_paint());
            ctx.fill_path(&RoundedRect::from_rect(rect, pad).to_path(0.1));
        }

        let shadow = ColorDef::BLACK.with_opacity(spec.color.a);
        let shadow_origin = Point::new(origin.x + SHADOW_OFFSET, origin.y + SHADOW_OFFSET);
        self.shaper
            .draw(ctx, &spec.value, size, shadow_origin, shadow);
        self.shaper.draw(ctx, &spec.value, size, origin, spec.color);
    }

    fn draw_image(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        canvas: Canvas,
        spec: &OverlaySpec,
        is_layer: bool,
    ) {
        let path = PathBuf::from(strip_file_uri(&spec.value));
        let Some(image) = self.image(&path) else {
            self.draw_image_placeholder(ctx, canvas, spec, is_layer);
            return;
        };

        let (w, h) = spec
            .box_size(canvas)
            .unwrap_or_else(|| fit_within(image.width, image.height, canvas));
        let mut anchor = spec.anchor(canvas);
        if is_layer {
            anchor = clamp_anchor(anchor, canvas, w, h);
        }

        ctx.set_transform(
            Affine::translate((anchor.x - w / 2.0, anchor.y - h / 2.0))
                * Affine::scale_non_uniform(w / image.width, h / image.height),
        );
        ctx.set_paint(image.paint);
        ctx.fill_rect(&Rect::new(0.0, 0.0, image.width, image.height));
        ctx.set_transform(Affine::IDENTITY);
    }

    fn draw_image_placeholder(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        canvas: Canvas,
        spec: &OverlaySpec,
        is_layer: bool,
    ) {
        let mut anchor = spec.anchor(canvas);
        if is_layer {
            anchor = clamp_anchor(anchor, canvas, PLACEHOLDER_SIZE, PLACEHOLDER_SIZE);
        }
        let half = PLACEHOLDER_SIZE / 2.0;
        let rect = Rect::new(
            anchor.x - half,
            anchor.y - half,
            anchor.x + half,
            anchor.y + half,
        );
        ctx.set_transform(Affine::IDENTITY);
        ctx.set_paint(PLACEHOLDER_COLOR.to_paint());
        ctx.fill_rect(&rect);
        ctx.set_stroke(Stroke::new(PLACEHOLDER_BORDER));
        ctx.set_paint(ColorDef::WHITE.to_paint());
        ctx.stroke_path(&rect.to_path(0.1));

        let label = "IMAGE";
        let m = self.shaper.measure(label, PLACEHOLDER_LABEL_SIZE);
        self.shaper.draw(
            ctx,
            label,
            PLACEHOLDER_LABEL_SIZE,
            m.origin_for_center(cpu_point(anchor)),
            ColorDef::WHITE,
        );
    }

    fn draw_snapshot(&mut self, ctx: &mut vello_cpu::RenderContext, canvas: Canvas, path: &Path) {
        let Some(image) = self.image(path) else {
            return;
        };
        ctx.set_transform(Affine::scale_non_uniform(
            f64::from(canvas.width) / image.width,
            f64::from(canvas.height) / image.height,
        ));
        ctx.set_paint(image.paint);
        ctx.fill_rect(&Rect::new(0.0, 0.0, image.width, image.height));
        ctx.set_transform(Affine::IDENTITY);
    }

    /// Decoded image for `path`; failures are cached and logged once.
    fn image(&mut self, path: &Path) -> Option<LoadedImage> {
        if let Some(cached) = self.images.get(path) {
            return cached.clone();
        }
        let loaded = match load_image(path) {
            Ok(img) => Some(img),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "image overlay could not be decoded");
                None
            }
        };
        self.images.insert(path.to_path_buf(), loaded.clone());
        loaded
    }
}

fn draw_background(
    ctx: &mut vello_cpu::RenderContext,
    canvas: Canvas,
    idx: FrameIndex,
    background: Background<'_>,
) -> ExportResult<()> {
    let full = Rect::new(0.0, 0.0, f64::from(canvas.width), f64::from(canvas.height));
    ctx.set_transform(Affine::IDENTITY);
    match background {
        Background::Animated { fps } => {
            ctx.set_paint(animated_background_color(idx, fps).to_paint());
            ctx.fill_rect(&full);
        }
        Background::Decoded(frame) => {
            let img = frame.image();
            let paint = premul_bytes_to_image(&img.data, img.width, img.height)?;
            let (fw, fh) = (f64::from(img.width), f64::from(img.height));
            ctx.set_transform(Affine::scale_non_uniform(
                f64::from(canvas.width) / fw,
                f64::from(canvas.height) / fh,
            ));
            ctx.set_paint(paint);
            ctx.fill_rect(&Rect::new(0.0, 0.0, fw, fh));
            ctx.set_transform(Affine::IDENTITY);
        }
    }
    Ok(())
}

fn draw_shape(
    ctx: &mut vello_cpu::RenderContext,
    canvas: Canvas,
    spec: &OverlaySpec,
    is_layer: bool,
) {
    let kind = spec.shape_kind();
    let (bw, bh) = match kind {
        ShapeKind::Circle => (2.0 * CIRCLE_RADIUS, 2.0 * CIRCLE_RADIUS),
        ShapeKind::Rectangle => (2.0 * RECT_HALF_WIDTH, 2.0 * RECT_HALF_HEIGHT),
        ShapeKind::Triangle => (2.0 * TRIANGLE_HALF, 2.0 * TRIANGLE_HALF),
    };
    let mut anchor = spec.anchor(canvas);
    if is_layer {
        anchor = clamp_anchor(anchor, canvas, bw + SHAPE_STROKE_WIDTH, bh + SHAPE_STROKE_WIDTH);
    }
    let path = shape_path(kind, cpu_point(anchor));

    ctx.set_transform(Affine::IDENTITY);
    ctx.set_paint(spec.color.to_paint());
    ctx.fill_path(&path);
    ctx.set_stroke(Stroke::new(SHAPE_STROKE_WIDTH));
    ctx.set_paint(ColorDef::WHITE.to_paint());
    ctx.stroke_path(&path);
}

pub(crate) fn shape_path(kind: ShapeKind, c: Point) -> BezPath {
    match kind {
        ShapeKind::Circle => Circle::new(c, CIRCLE_RADIUS).to_path(0.1),
        ShapeKind::Rectangle => Rect::new(
            c.x - RECT_HALF_WIDTH,
            c.y - RECT_HALF_HEIGHT,
            c.x + RECT_HALF_WIDTH,
            c.y + RECT_HALF_HEIGHT,
        )
        .to_path(0.1),
        ShapeKind::Triangle => {
            let mut p = BezPath::new();
            p.move_to((c.x, c.y - TRIANGLE_HALF));
            p.line_to((c.x + TRIANGLE_HALF, c.y + TRIANGLE_HALF));
            p.line_to((c.x - TRIANGLE_HALF, c.y + TRIANGLE_HALF));
            p.close_path();
            p
        }
    }
}

fn cpu_point(p: crate::foundation::core::Point) -> Point {
    Point::new(p.x, p.y)
}

/// Natural size, scaled down (never up) to fit the frame.
fn fit_within(w: f64, h: f64, canvas: Canvas) -> (f64, f64) {
    let scale = (f64::from(canvas.width) / w)
        .min(f64::from(canvas.height) / h)
        .min(1.0);
    (w * scale, h * scale)
}

fn load_image(path: &Path) -> ExportResult<LoadedImage> {
    let is_svg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("svg"));
    let bytes = std::fs::read(path)?;
    let (rgba8_premul, width, height) = if is_svg {
        rasterize_svg(&bytes)?
    } else {
        let rgba = image::load_from_memory(&bytes)
            .map_err(|e| ExportError::internal(format!("decode image: {e}")))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut data = rgba.into_raw();
        premultiply_rgba8_in_place(&mut data);
        (data, width, height)
    };
    if width == 0 || height == 0 {
        return Err(ExportError::internal("image has zero size"));
    }
    Ok(LoadedImage {
        paint: premul_bytes_to_image(&rgba8_premul, width, height)?,
        width: f64::from(width),
        height: f64::from(height),
    })
}

fn rasterize_svg(bytes: &[u8]) -> ExportResult<(Vec<u8>, u32, u32)> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_data(bytes, &opts)
        .map_err(|e| ExportError::internal(format!("parse svg tree: {e}")))?;
    let size = tree.size();
    let (w, h) = (size.width().ceil(), size.height().ceil());
    if !w.is_finite() || !h.is_finite() || w < 1.0 || h < 1.0 {
        return Err(ExportError::internal("svg has invalid width/height"));
    }
    let (w, h) = (w as u32, h as u32);
    let mut pixmap = resvg::tiny_skia::Pixmap::new(w, h)
        .ok_or_else(|| ExportError::internal("failed to allocate svg pixmap"))?;
    resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    Ok((pixmap.data().to_vec(), w, h))
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
