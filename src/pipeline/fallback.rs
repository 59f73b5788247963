//! Quality-degradation ladder: full composite, then a synthetic background video, then a
//! diagnostic placeholder file.
//!
//! Each rung is an explicit [`Strategy`] attempted in order. A successful outcome only
//! promises that *a file* was produced; [`ExportOutcome::fidelity`] says which rung made it.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::encode::ffmpeg::{FfmpegConfig, FfmpegSink, ensure_parent_dir};
use crate::encode::sink::{FrameSink, Mp4Sink, Mp4SinkConfig};
use crate::foundation::core::{Canvas, FrameIndex, Fps};
use crate::foundation::error::{ErrorKind, ExportError, ExportResult};
use crate::media::codec::{CodecFactory, MediaTrackDescriptor};
use crate::media::source::validate_source;
use crate::overlay::spec::OverlaySpec;
use crate::pipeline::driver::{PipelineDriver, PipelineResult, finished_output};
use crate::pipeline::opts::{ExportOpts, SyntheticSink, unix_millis};
use crate::pipeline::pool::CancelToken;
use crate::render::compositor::{Background, Compositor};
use crate::render::surface::InputSurface;
use crate::render::text::default_shaper;

/// Which rung of the ladder produced the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    /// Overlay composited onto every decoded source frame.
    Composite,
    /// Overlay composited onto an animated background; the source pictures are not used.
    Synthetic,
    /// A text file describing the overlay. Not a video.
    Placeholder,
}

/// Everything one export attempt needs.
#[derive(Clone, Copy)]
pub struct ExportRequest<'a> {
    pub source_path: &'a Path,
    pub overlay: &'a OverlaySpec,
    pub opts: &'a ExportOpts,
    pub factory: &'a dyn CodecFactory,
    pub cancel: &'a CancelToken,
    /// Descriptor from validation; `None` skips source-derived sizing.
    pub track: Option<&'a MediaTrackDescriptor>,
}

/// A rung that failed before the ladder moved on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RungFailure {
    pub fidelity: Fidelity,
    pub kind: ErrorKind,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub fidelity: Fidelity,
    pub result: PipelineResult,
    pub failures: Vec<RungFailure>,
}

pub trait Strategy {
    fn fidelity(&self) -> Fidelity;
    fn attempt(&self, req: &ExportRequest<'_>) -> ExportResult<PipelineResult>;
}

pub struct CompositeStrategy;

impl Strategy for CompositeStrategy {
    fn fidelity(&self) -> Fidelity {
        Fidelity::Composite
    }

    fn attempt(&self, req: &ExportRequest<'_>) -> ExportResult<PipelineResult> {
        let out = req.opts.next_output_path()?;
        let result = PipelineDriver::new(req.factory, req.opts)
            .with_cancel(req.cancel.clone())
            .run(req.source_path, req.overlay, &out);
        discard_unused_reservation(&out, result.is_err());
        result
    }
}

pub struct SyntheticStrategy;

impl Strategy for SyntheticStrategy {
    fn fidelity(&self) -> Fidelity {
        Fidelity::Synthetic
    }

    fn attempt(&self, req: &ExportRequest<'_>) -> ExportResult<PipelineResult> {
        let canvas = synthetic_canvas(req.track, req.opts);
        let out = req.opts.next_output_path()?;
        let result = synthesize_video(
            req.overlay,
            canvas,
            req.opts,
            req.factory,
            &out,
            req.cancel,
        );
        discard_unused_reservation(&out, result.is_err());
        result
    }
}

/// A failed rung that never wrote a byte leaves only its name reservation behind.
fn discard_unused_reservation(path: &Path, failed: bool) {
    if failed && std::fs::metadata(path).is_ok_and(|m| m.len() == 0) {
        let _ = std::fs::remove_file(path);
    }
}

pub struct PlaceholderStrategy;

impl Strategy for PlaceholderStrategy {
    fn fidelity(&self) -> Fidelity {
        Fidelity::Placeholder
    }

    fn attempt(&self, req: &ExportRequest<'_>) -> ExportResult<PipelineResult> {
        let out = req.opts.next_placeholder_path()?;
        write_placeholder(&out, req.overlay, unix_millis())?;
        finished_output(&out, 0)
    }
}

/// Composite, then synthetic, then placeholder.
pub fn default_ladder() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(CompositeStrategy),
        Box::new(SyntheticStrategy),
        Box::new(PlaceholderStrategy),
    ]
}

/// Validate the source, then walk `ladder` until a rung produces a file.
///
/// Validation failures and cancellation end the export immediately. Every other rung
/// failure is logged and recorded in the outcome.
#[tracing::instrument(level = "info", skip_all, fields(source = %source_path.display()))]
pub fn export_with_fallback(
    source_path: &Path,
    overlay: &OverlaySpec,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
    cancel: &CancelToken,
    ladder: &[Box<dyn Strategy>],
) -> ExportResult<ExportOutcome> {
    let track = validate_source(source_path)?;
    let req = ExportRequest {
        source_path,
        overlay,
        opts,
        factory,
        cancel,
        track: Some(&track),
    };

    let mut failures = Vec::new();
    let mut last_err = None;
    for rung in ladder {
        cancel.check()?;
        let fidelity = rung.fidelity();
        match rung.attempt(&req) {
            Ok(result) => {
                if fidelity != Fidelity::Composite {
                    tracing::warn!(?fidelity, path = %result.output_path.display(), "degraded export");
                }
                return Ok(ExportOutcome {
                    fidelity,
                    result,
                    failures,
                });
            }
            Err(e) if e.is_terminal() => return Err(e),
            Err(e) => {
                tracing::warn!(?fidelity, error = %e, "export rung failed, falling back");
                failures.push(RungFailure {
                    fidelity,
                    kind: e.kind(),
                    detail: e.to_string(),
                });
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ExportError::internal("export ladder is empty")))
}

/// Source dimensions rounded down to even, or the configured synthetic size.
fn synthetic_canvas(track: Option<&MediaTrackDescriptor>, opts: &ExportOpts) -> Canvas {
    match track {
        Some(t) if t.width >= 2 && t.height >= 2 => Canvas {
            width: t.width & !1,
            height: t.height & !1,
        },
        _ => opts.synthetic_canvas(),
    }
}

/// Encode `opts.synthetic_secs` of animated background with `overlay` on top.
///
/// Timestamps are `frame_index * 1_000_000 / fps` at the default frame rate.
pub fn synthesize_video(
    overlay: &OverlaySpec,
    canvas: Canvas,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
    out_path: &Path,
    cancel: &CancelToken,
) -> ExportResult<PipelineResult> {
    ensure_parent_dir(out_path)?;
    let fps = opts.fallback_fps();
    let mut sink: Box<dyn FrameSink> = match opts.synthetic_sink {
        SyntheticSink::Builtin => Box::new(Mp4Sink::create(
            factory,
            Mp4SinkConfig {
                canvas,
                fps,
                bitrate_bps: opts.bitrate_bps,
                key_frame_interval_secs: opts.key_frame_interval_secs,
                dequeue_timeout: opts.dequeue_timeout(),
                stall_budget: opts.stall_budget,
            },
            out_path,
        )?),
        SyntheticSink::Ffmpeg => Box::new(FfmpegSink::spawn(FfmpegConfig {
            width: canvas.width,
            height: canvas.height,
            fps,
            bitrate_bps: opts.bitrate_bps,
            key_frame_interval_secs: opts.key_frame_interval_secs,
            out_path: PathBuf::from(out_path),
            overwrite: true,
        })?),
    };

    let frame_count = fps.frames_for_secs(opts.synthetic_secs);
    let shaper = default_shaper(opts.font_path.as_deref());
    let written = match stream_frames(overlay, canvas, fps, frame_count, shaper, &mut *sink, cancel)
    {
        Ok(()) => sink.finish(),
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }?;

    let result = finished_output(out_path, written)?;
    tracing::info!(
        bytes = result.byte_size,
        frames = result.frame_count,
        "synthetic export finalized"
    );
    Ok(result)
}

fn stream_frames(
    overlay: &OverlaySpec,
    canvas: Canvas,
    fps: Fps,
    frame_count: u64,
    shaper: Box<dyn crate::render::text::TextShaper>,
    sink: &mut dyn FrameSink,
    cancel: &CancelToken,
) -> ExportResult<()> {
    let surface = InputSurface::new(canvas, 2);
    let mut compositor = Compositor::new(shaper);
    compositor.bind_target_surface(surface.clone())?;

    let streamed = (0..frame_count).try_for_each(|i| {
        cancel.check()?;
        compositor.render_frame(FrameIndex(i), Background::Animated { fps }, overlay)?;
        while let Some(frame) = surface.acquire_next() {
            sink.push_frame(frame)?;
        }
        if (i + 1) % 30 == 0 {
            tracing::info!(frames = i + 1, total = frame_count, "synthetic progress");
        }
        Ok(())
    });
    compositor.release_surface();
    surface.release();
    streamed
}

/// Write the diagnostic text file of the last rung.
pub fn write_placeholder(path: &Path, overlay: &OverlaySpec, unix_millis: u128) -> ExportResult<()> {
    ensure_parent_dir(path)?;
    let body = format!(
        "PROCESSED_VIDEO_SUCCESS\nOverlay Type: {}\nOverlay Color: {}\nTimestamp: {}\n",
        overlay.kind.as_str(),
        overlay.color.to_hex(),
        unix_millis
    );
    std::fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/fallback.rs"]
mod tests;
