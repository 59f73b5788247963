use std::path::Path;

use crate::encode::ffmpeg::ensure_parent_dir;
use crate::foundation::core::{Canvas, FrameIndex};
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::unpremultiply_rgba8_in_place;
use crate::media::codec::{CodecFactory, DecodedFrame, DecoderOutput, VideoDecoder};
use crate::media::source::Mp4SampleSource;
use crate::overlay::spec::OverlaySpec;
use crate::pipeline::opts::ExportOpts;
use crate::render::compositor::{Background, Compositor};
use crate::render::surface::{FrameRGBA, InputSurface};
use crate::render::text::default_shaper;

/// Composite a single frame without encoding anything.
///
/// With a source, frame `idx` is decoded (or the last frame, if the source is shorter);
/// without one the animated synthetic background is used at the configured size.
pub fn render_preview(
    source: Option<&Path>,
    overlay: &OverlaySpec,
    idx: FrameIndex,
    opts: &ExportOpts,
    factory: &dyn CodecFactory,
) -> ExportResult<FrameRGBA> {
    let shaper = default_shaper(opts.font_path.as_deref());
    let Some(path) = source else {
        return still(opts.synthetic_canvas(), shaper, |c| {
            c.render_still(
                idx,
                Background::Animated {
                    fps: opts.fallback_fps(),
                },
                overlay,
            )
        });
    };

    let mut src = Mp4SampleSource::open(path)?;
    let track = src.descriptor().clone();
    let mut decoder = factory.create_decoder(&track.codec_mime)?;
    let decoded = decoder
        .configure(&track)
        .and_then(|()| decoder.start())
        .and_then(|()| decode_nth(&mut src, decoder.as_mut(), idx.0, opts));

    let result = decoded.and_then(|frame| {
        let out = still(track.canvas(), shaper, |c| {
            c.render_still(idx, Background::Decoded(&frame), overlay)
        });
        decoder.release_frame(frame, out.is_ok());
        out
    });

    for r in [decoder.stop(), decoder.release(), src.close()] {
        if let Err(e) = r {
            tracing::warn!(error = %e, "preview teardown");
        }
    }
    result
}

fn still(
    canvas: Canvas,
    shaper: Box<dyn crate::render::text::TextShaper>,
    draw: impl FnOnce(&mut Compositor) -> ExportResult<FrameRGBA>,
) -> ExportResult<FrameRGBA> {
    let mut compositor = Compositor::new(shaper);
    compositor.bind_target_surface(InputSurface::new(canvas, 1))?;
    let out = draw(&mut compositor);
    compositor.release_surface();
    out
}

/// Decode up to frame `n`, releasing every earlier frame unrendered.
fn decode_nth(
    src: &mut Mp4SampleSource,
    decoder: &mut dyn VideoDecoder,
    n: u64,
    opts: &ExportOpts,
) -> ExportResult<DecodedFrame> {
    let timeout = opts.dequeue_timeout();
    let mut input_done = false;
    let mut seen = 0u64;
    let mut last: Option<DecodedFrame> = None;
    let mut idle = 0u32;

    loop {
        let mut progressed = false;
        if !input_done && let Some(slot) = decoder.dequeue_input_slot(timeout)? {
            let sample = src.read_next()?;
            input_done = sample.is_end_of_stream;
            decoder.submit(slot, sample)?;
            progressed = true;
        }
        match decoder.dequeue_output(timeout)? {
            DecoderOutput::Frame(frame) => {
                if seen == n {
                    if let Some(prev) = last.take() {
                        decoder.release_frame(prev, false);
                    }
                    return Ok(frame);
                }
                seen += 1;
                if let Some(prev) = last.replace(frame) {
                    decoder.release_frame(prev, false);
                }
                progressed = true;
            }
            DecoderOutput::EndOfStream => {
                return last.ok_or_else(|| {
                    ExportError::empty_output("source decoded to zero frames")
                });
            }
            DecoderOutput::FormatChanged(_) => progressed = true,
            DecoderOutput::TryAgainLater => {}
        }
        if progressed {
            idle = 0;
        } else {
            idle += 1;
            if idle > opts.stall_budget {
                if let Some(prev) = last.take() {
                    decoder.release_frame(prev, false);
                }
                return Err(ExportError::decoder_stalled(format!(
                    "no frame after {idle} polls"
                )));
            }
        }
    }
}

/// Write `frame` as a straight-alpha PNG.
pub fn save_png(frame: &FrameRGBA, path: &Path) -> ExportResult<()> {
    ensure_parent_dir(path)?;
    let mut data = frame.data.clone();
    if frame.premultiplied {
        unpremultiply_rgba8_in_place(&mut data);
    }
    image::save_buffer_with_format(
        path,
        &data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| ExportError::internal(format!("write png '{}': {e}", path.display())))
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/preview.rs"]
mod tests;
