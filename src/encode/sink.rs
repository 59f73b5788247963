use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::codec::{
    CodecFactory, EncoderConfig, EncoderOutput, MIME_AVC, VideoEncoder, VideoFormat,
};
use crate::media::muxer::Mp4Muxer;
use crate::render::surface::{InputSurface, SurfaceFrame};

/// Destination for fully composited frames outside the decode-driven path.
pub trait FrameSink {
    fn canvas(&self) -> Canvas;
    /// Surface frames must be pushed in non-decreasing timestamp order.
    fn push_frame(&mut self, frame: SurfaceFrame) -> ExportResult<()>;
    /// Flush and finalize the output; returns the number of frames written.
    fn finish(&mut self) -> ExportResult<u64>;
    /// Release everything without finalizing. Idempotent.
    fn abort(&mut self);
}

/// Outcome of one encoder drain step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pumped {
    Idle,
    FormatApplied,
    Wrote,
    EndOfStream,
}

/// Drain at most one encoder output into `muxer`, starting it on the format change.
pub(crate) fn pump_encoder(
    encoder: &mut dyn VideoEncoder,
    muxer: &mut Mp4Muxer,
    track: usize,
    timeout: Duration,
) -> ExportResult<Pumped> {
    match encoder.drain(timeout)? {
        EncoderOutput::TryAgainLater => Ok(Pumped::Idle),
        EncoderOutput::FormatChanged(format) => {
            if muxer.is_started() {
                tracing::warn!(?format, "encoder format changed after muxer start; ignored");
                return Ok(Pumped::Idle);
            }
            muxer.set_track_format(track, &format)?;
            muxer.start()?;
            Ok(Pumped::FormatApplied)
        }
        EncoderOutput::Sample(sample) => {
            let eos = sample.flags.is_end_of_stream;
            let written = if sample.data.is_empty() {
                Ok(())
            } else {
                muxer.write_sample(track, &sample)
            };
            encoder.release_output(sample);
            written?;
            Ok(if eos { Pumped::EndOfStream } else { Pumped::Wrote })
        }
        EncoderOutput::EndOfStream => Ok(Pumped::EndOfStream),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Mp4SinkConfig {
    pub canvas: Canvas,
    pub fps: Fps,
    pub bitrate_bps: u32,
    pub key_frame_interval_secs: u32,
    pub dequeue_timeout: Duration,
    pub stall_budget: u32,
}

/// Built-in H.264 encoder feeding an [`Mp4Muxer`].
pub struct Mp4Sink {
    cfg: Mp4SinkConfig,
    encoder: Option<Box<dyn VideoEncoder>>,
    surface: InputSurface,
    muxer: Mp4Muxer,
    track: usize,
    frames: u64,
}

impl Mp4Sink {
    pub fn create(
        factory: &dyn CodecFactory,
        cfg: Mp4SinkConfig,
        out_path: impl Into<PathBuf>,
    ) -> ExportResult<Self> {
        let mut encoder = factory.create_encoder(MIME_AVC)?;
        let setup = (|| {
            encoder.configure(&EncoderConfig {
                width: cfg.canvas.width,
                height: cfg.canvas.height,
                bitrate_bps: cfg.bitrate_bps,
                fps: cfg.fps,
                key_frame_interval_secs: cfg.key_frame_interval_secs,
            })?;
            let surface = encoder.create_input_surface()?;
            encoder.start()?;
            Ok::<_, ExportError>(surface)
        })();
        let surface = match setup {
            Ok(s) => s,
            Err(e) => {
                if let Err(re) = encoder.release() {
                    tracing::warn!(error = %re, "encoder release failed");
                }
                return Err(e);
            }
        };

        let mut muxer = Mp4Muxer::new(out_path, cfg.fps.frame_duration_micros());
        let track = muxer.add_track(&VideoFormat::provisional(
            MIME_AVC,
            cfg.canvas.width,
            cfg.canvas.height,
        ))?;
        Ok(Self {
            cfg,
            encoder: Some(encoder),
            surface,
            muxer,
            track,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.muxer.path()
    }

    fn pump(&mut self) -> ExportResult<Pumped> {
        let Some(encoder) = self.encoder.as_deref_mut() else {
            return Err(ExportError::internal("sink already closed"));
        };
        pump_encoder(encoder, &mut self.muxer, self.track, self.cfg.dequeue_timeout)
    }
}

impl FrameSink for Mp4Sink {
    fn canvas(&self) -> Canvas {
        self.cfg.canvas
    }

    fn push_frame(&mut self, frame: SurfaceFrame) -> ExportResult<()> {
        let mut idle = 0;
        while !self.surface.has_capacity() {
            if self.pump()? == Pumped::Idle {
                idle += 1;
                if idle > self.cfg.stall_budget {
                    return Err(ExportError::encoder_stalled(format!(
                        "no encoder progress after {idle} polls"
                    )));
                }
            }
        }
        self.surface.swap_buffers(frame)?;
        self.frames += 1;
        // Keep the encoder moving so the surface rarely fills.
        while self.pump()? != Pumped::Idle {}
        Ok(())
    }

    fn finish(&mut self) -> ExportResult<u64> {
        let Some(encoder) = self.encoder.as_deref_mut() else {
            return Err(ExportError::internal("sink already closed"));
        };
        encoder.signal_end_of_input()?;
        let mut idle = 0;
        loop {
            let Some(encoder) = self.encoder.as_deref_mut() else {
                return Err(ExportError::internal("sink already closed"));
            };
            match pump_encoder(encoder, &mut self.muxer, self.track, self.cfg.dequeue_timeout)? {
                Pumped::EndOfStream => break,
                Pumped::Idle => {
                    idle += 1;
                    if idle > self.cfg.stall_budget {
                        return Err(ExportError::encoder_stalled(
                            "encoder never signalled end of stream",
                        ));
                    }
                }
                Pumped::FormatApplied | Pumped::Wrote => idle = 0,
            }
        }

        if !self.muxer.is_started() {
            return Err(ExportError::empty_output("encoder produced no samples"));
        }
        self.muxer.stop()?;
        self.abort();
        Ok(self.frames)
    }

    fn abort(&mut self) {
        self.surface.release();
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.stop() {
                tracing::warn!(error = %e, "encoder stop failed");
            }
            if let Err(e) = encoder.release() {
                tracing::warn!(error = %e, "encoder release failed");
            }
        }
        if let Err(e) = self.muxer.release() {
            tracing::warn!(error = %e, "muxer release failed");
        }
    }
}

impl Drop for Mp4Sink {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;
