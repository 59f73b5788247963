//! Decode → composite → encode → mux run over one source file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::encode::sink::{Pumped, pump_encoder};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::codec::{
    CodecFactory, DecoderOutput, EncoderConfig, MIME_AVC, VideoDecoder, VideoEncoder,
    VideoFormat,
};
use crate::media::muxer::Mp4Muxer;
use crate::media::source::Mp4SampleSource;
use crate::overlay::spec::OverlaySpec;
use crate::pipeline::opts::ExportOpts;
use crate::pipeline::pool::CancelToken;
use crate::pipeline::state::{PipelineState, StateMachine};
use crate::render::compositor::{Background, Compositor};
use crate::render::surface::InputSurface;
use crate::render::text::default_shaper;

const PROGRESS_EVERY: u64 = 30;

/// Outcome of a finalized run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub output_path: PathBuf,
    pub byte_size: i64,
    pub frame_count: u64,
}

/// Verify that `path` exists and is non-empty, and describe it.
pub(crate) fn finished_output(path: &Path, frame_count: u64) -> ExportResult<PipelineResult> {
    let len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(ExportError::empty_output(format!(
            "'{}' is missing or empty",
            path.display()
        )));
    }
    Ok(PipelineResult {
        output_path: path.to_path_buf(),
        byte_size: i64::try_from(len).unwrap_or(i64::MAX),
        frame_count,
    })
}

/// Everything a run acquires, torn down in one fixed order.
#[derive(Default)]
struct Stages {
    source: Option<Mp4SampleSource>,
    decoder: Option<Box<dyn VideoDecoder>>,
    encoder: Option<Box<dyn VideoEncoder>>,
    surface: Option<InputSurface>,
    compositor: Option<Compositor>,
    muxer: Option<Mp4Muxer>,
}

impl Stages {
    /// Release every stage: surface, decoder, encoder, muxer, source.
    ///
    /// Each failure is logged and collected; none stops the remaining releases.
    fn teardown(&mut self) -> Vec<ExportError> {
        let mut failures = Vec::new();
        let mut note = |stage: &'static str, r: ExportResult<()>| {
            if let Err(e) = r {
                let e = ExportError::release_failure(format!("{stage}: {e}"));
                tracing::warn!(error = %e, "teardown");
                failures.push(e);
            }
        };

        if let Some(mut compositor) = self.compositor.take() {
            compositor.release_surface();
        }
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        if let Some(mut decoder) = self.decoder.take() {
            note("decoder stop", decoder.stop());
            note("decoder release", decoder.release());
        }
        if let Some(mut encoder) = self.encoder.take() {
            note("encoder stop", encoder.stop());
            note("encoder release", encoder.release());
        }
        if let Some(mut muxer) = self.muxer.take() {
            if muxer.is_started() {
                note("muxer stop", muxer.stop());
            }
            note("muxer release", muxer.release());
        }
        if let Some(mut source) = self.source.take() {
            note("source close", source.close());
        }
        failures
    }
}

/// Drives one export through the [`PipelineState`] machine.
pub struct PipelineDriver<'a> {
    factory: &'a dyn CodecFactory,
    opts: &'a ExportOpts,
    cancel: CancelToken,
    state: StateMachine,
    frames: u64,
    teardown_failures: Vec<ExportError>,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(factory: &'a dyn CodecFactory, opts: &'a ExportOpts) -> Self {
        Self {
            factory,
            opts,
            cancel: CancelToken::new(),
            state: StateMachine::new(),
            frames: 0,
            teardown_failures: Vec::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    pub fn history(&self) -> &[PipelineState] {
        self.state.history()
    }

    /// Frames composited so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Release failures collected by the last teardown. Never part of the returned error.
    pub fn teardown_failures(&self) -> &[ExportError] {
        &self.teardown_failures
    }

    /// Composite `overlay` onto every frame of `source_path` and write `output_path`.
    ///
    /// Every acquired resource is released before this returns, on success, failure and
    /// cancellation alike. A partial output file from a failed run is left in place.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(source = %source_path.display(), output = %output_path.display())
    )]
    pub fn run(
        &mut self,
        source_path: &Path,
        overlay: &OverlaySpec,
        output_path: &Path,
    ) -> ExportResult<PipelineResult> {
        let mut stages = Stages::default();
        let outcome = self.drive(&mut stages, source_path, overlay, output_path);
        self.teardown_failures = stages.teardown();

        let result = outcome.and_then(|()| finished_output(output_path, self.frames));
        match result {
            Ok(result) => {
                self.state.advance(PipelineState::Finalized)?;
                tracing::info!(
                    bytes = result.byte_size,
                    frames = result.frame_count,
                    "export finalized"
                );
                Ok(result)
            }
            Err(e) => {
                self.state.fail();
                tracing::debug!(error = %e, kind = ?e.kind(), "export failed");
                Err(e)
            }
        }
    }

    fn drive(
        &mut self,
        stages: &mut Stages,
        source_path: &Path,
        overlay: &OverlaySpec,
        output_path: &Path,
    ) -> ExportResult<()> {
        self.cancel.check()?;

        // Init -> SourceOpened. No codec exists until a video track is found.
        let source = stages.source.insert(Mp4SampleSource::open(source_path)?);
        let track = source.descriptor().clone();
        self.state.advance(PipelineState::SourceOpened)?;

        // SourceOpened -> CodecsConfigured.
        let fps = track.fps_or(self.opts.fallback_fps());
        let canvas = track.canvas();

        let decoder = stages
            .decoder
            .insert(self.factory.create_decoder(&track.codec_mime)?);
        decoder.configure(&track)?;
        decoder.start()?;

        let encoder = stages.encoder.insert(self.factory.create_encoder(MIME_AVC)?);
        encoder.configure(&EncoderConfig {
            width: canvas.width,
            height: canvas.height,
            bitrate_bps: self.opts.bitrate_bps,
            fps,
            key_frame_interval_secs: self.opts.key_frame_interval_secs,
        })?;
        let surface = stages.surface.insert(encoder.create_input_surface()?).clone();

        let compositor = stages
            .compositor
            .insert(Compositor::new(default_shaper(self.opts.font_path.as_deref())));
        compositor.bind_target_surface(surface.clone())?;

        let muxer = stages
            .muxer
            .insert(Mp4Muxer::new(output_path, fps.frame_duration_micros()));
        let out_track = muxer.add_track(&VideoFormat::provisional(
            MIME_AVC,
            canvas.width,
            canvas.height,
        ))?;
        encoder.start()?;
        self.state.advance(PipelineState::CodecsConfigured)?;

        tracing::debug!(
            mime = %track.codec_mime,
            width = canvas.width,
            height = canvas.height,
            fps = fps.as_f64(),
            samples = track.sample_count,
            "codecs configured"
        );

        // CodecsConfigured -> Running -> Draining.
        self.state.advance(PipelineState::Running)?;
        let (
            Some(source),
            Some(decoder),
            Some(encoder),
            Some(compositor),
            Some(muxer),
        ) = (
            stages.source.as_mut(),
            stages.decoder.as_deref_mut(),
            stages.encoder.as_deref_mut(),
            stages.compositor.as_mut(),
            stages.muxer.as_mut(),
        )
        else {
            return Err(ExportError::internal("pipeline stages missing after setup"));
        };
        let mut run = RunLoop {
            source,
            decoder,
            encoder,
            compositor,
            muxer,
            surface: &surface,
            track: out_track,
            timeout: self.opts.dequeue_timeout(),
            stall_budget: self.opts.stall_budget,
            cancel: &self.cancel,
        };
        let frames = run.execute(overlay, &mut self.state)?;
        self.frames = frames;

        // Draining -> (Finalized after teardown and output verification).
        if !run.muxer.is_started() {
            return Err(ExportError::empty_output(
                "encoder produced no samples for the muxer",
            ));
        }
        run.muxer.stop()?;
        Ok(())
    }
}

/// Borrowed view of the running stages.
struct RunLoop<'s> {
    source: &'s mut Mp4SampleSource,
    decoder: &'s mut dyn VideoDecoder,
    encoder: &'s mut dyn VideoEncoder,
    compositor: &'s mut Compositor,
    muxer: &'s mut Mp4Muxer,
    surface: &'s InputSurface,
    track: usize,
    timeout: Duration,
    stall_budget: u32,
    cancel: &'s CancelToken,
}

impl RunLoop<'_> {
    /// Iterate steps (a) feed, (b) composite, (c) mux until the encoder reports end of
    /// stream. Returns the number of composited frames.
    fn execute(&mut self, overlay: &OverlaySpec, state: &mut StateMachine) -> ExportResult<u64> {
        let mut input_done = false;
        let mut decoder_done = false;
        let mut frames = 0u64;
        let mut idle = 0u32;

        loop {
            self.cancel.check()?;
            let mut progressed = false;

            // (a) one compressed sample into the decoder.
            if !input_done && let Some(slot) = self.decoder.dequeue_input_slot(self.timeout)? {
                let sample = self.source.read_next()?;
                input_done = sample.is_end_of_stream;
                self.decoder.submit(slot, sample)?;
                progressed = true;
            }

            // (b) one decoded frame through the compositor onto the encoder surface.
            if !decoder_done && self.surface.has_capacity() {
                match self.decoder.dequeue_output(self.timeout)? {
                    DecoderOutput::Frame(frame) => {
                        let rendered = self.compositor.render_frame(
                            FrameIndex(frames),
                            Background::Decoded(&frame),
                            overlay,
                        );
                        self.decoder.release_frame(frame, rendered.is_ok());
                        let pts = rendered?;
                        frames += 1;
                        progressed = true;
                        if frames % PROGRESS_EVERY == 0 {
                            tracing::info!(frames, pts, "progress");
                        }
                    }
                    DecoderOutput::FormatChanged(format) => {
                        tracing::debug!(?format, "decoder output format");
                        progressed = true;
                    }
                    DecoderOutput::EndOfStream => {
                        self.encoder.signal_end_of_input()?;
                        decoder_done = true;
                        progressed = true;
                        state.advance(PipelineState::Draining)?;
                    }
                    DecoderOutput::TryAgainLater => {}
                }
            }

            // (c) one encoded sample into the muxer.
            match pump_encoder(self.encoder, self.muxer, self.track, self.timeout)? {
                Pumped::EndOfStream if decoder_done => return Ok(frames),
                Pumped::EndOfStream => {
                    return Err(ExportError::internal(
                        "encoder ended before end of input was signalled",
                    ));
                }
                Pumped::FormatApplied | Pumped::Wrote => progressed = true,
                Pumped::Idle => {}
            }

            if progressed {
                idle = 0;
                continue;
            }
            idle += 1;
            if idle > self.stall_budget {
                let detail = format!("no progress after {idle} polls ({frames} frames done)");
                return Err(if decoder_done || !self.surface.has_capacity() {
                    ExportError::encoder_stalled(detail)
                } else {
                    ExportError::decoder_stalled(detail)
                });
            }
        }
    }
}

/// One-shot convenience wrapper around [`PipelineDriver::run`].
pub fn run(
    source_path: &Path,
    overlay: &OverlaySpec,
    output_path: &Path,
    factory: &dyn CodecFactory,
    opts: &ExportOpts,
    cancel: CancelToken,
) -> ExportResult<PipelineResult> {
    PipelineDriver::new(factory, opts)
        .with_cancel(cancel)
        .run(source_path, overlay, output_path)
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/driver.rs"]
mod tests;
