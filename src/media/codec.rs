//! Codec contracts shared by the decoder and encoder stages.
//!
//! The shape follows a buffer-queue codec: inputs are submitted into slots, outputs are
//! polled with a bounded timeout, and every checked-out buffer is explicitly handed back.
//! Handles that must be returned ([`DecodedFrame`], [`EncodedSample`]) are not `Clone`, and
//! returning one consumes it.

use std::time::Duration;

use serde::Serialize;

use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::ExportResult;
use crate::render::surface::{FrameRGBA, InputSurface};

pub const MIME_AVC: &str = "video/avc";
pub const MIME_HEVC: &str = "video/hevc";
pub const MIME_VP9: &str = "video/x-vnd.on2.vp9";

/// Immutable description of the selected video track.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaTrackDescriptor {
    pub codec_mime: String,
    pub width: u32,
    pub height: u32,
    pub duration_micros: i64,
    /// Frames per second as reported by the container; `0.0` when unknown.
    pub frame_rate: f64,
    /// 1-based container track id.
    pub track_id: u32,
    pub sample_count: u32,
    #[serde(skip)]
    pub sps: Option<Vec<u8>>,
    #[serde(skip)]
    pub pps: Option<Vec<u8>>,
}

impl MediaTrackDescriptor {
    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
        }
    }

    /// The container's frame rate, or `fallback` when it reports none.
    pub fn fps_or(&self, fallback: Fps) -> Fps {
        Fps::from_hz(self.frame_rate).unwrap_or(fallback)
    }
}

/// One demuxed access unit in Annex-B form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedSample {
    pub data: Vec<u8>,
    pub presentation_time_micros: i64,
    pub is_end_of_stream: bool,
    pub is_key_frame: bool,
}

impl CompressedSample {
    pub fn end_of_stream(presentation_time_micros: i64) -> Self {
        Self {
            data: Vec::new(),
            presentation_time_micros,
            is_end_of_stream: true,
            is_key_frame: false,
        }
    }
}

/// Output format announced by a codec; the parameter sets finalize a muxer track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl VideoFormat {
    pub fn provisional(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: mime.to_owned(),
            width,
            height,
            sps: None,
            pps: None,
        }
    }

    pub fn has_parameter_sets(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }
}

/// Opaque input buffer reservation handed out by [`VideoDecoder::dequeue_input_slot`].
#[derive(Debug, PartialEq, Eq)]
pub struct InputSlot(pub(crate) u32);

/// A decoded picture checked out from the decoder.
#[derive(Debug)]
pub struct DecodedFrame {
    pub(crate) image: FrameRGBA,
    pub presentation_time_micros: i64,
}

impl DecodedFrame {
    pub fn new(image: FrameRGBA, presentation_time_micros: i64) -> Self {
        Self {
            image,
            presentation_time_micros,
        }
    }

    pub fn image(&self) -> &FrameRGBA {
        &self.image
    }
}

#[derive(Debug)]
pub enum DecoderOutput {
    Frame(DecodedFrame),
    TryAgainLater,
    FormatChanged(VideoFormat),
    EndOfStream,
}

pub trait VideoDecoder {
    fn configure(&mut self, track: &MediaTrackDescriptor) -> ExportResult<()>;
    fn start(&mut self) -> ExportResult<()>;
    fn dequeue_input_slot(&mut self, timeout: Duration) -> ExportResult<Option<InputSlot>>;
    fn submit(&mut self, slot: InputSlot, sample: CompressedSample) -> ExportResult<()>;
    fn dequeue_output(&mut self, timeout: Duration) -> ExportResult<DecoderOutput>;
    /// Hand a frame back. `render` records whether it reached the output surface.
    fn release_frame(&mut self, frame: DecodedFrame, render: bool);
    fn stop(&mut self) -> ExportResult<()>;
    fn release(&mut self) -> ExportResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub fps: Fps,
    pub key_frame_interval_secs: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub is_key_frame: bool,
    pub is_end_of_stream: bool,
}

/// Encoded access unit in Annex-B form, checked out from the encoder.
#[derive(Debug)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub presentation_time_micros: i64,
    pub flags: SampleFlags,
}

#[derive(Debug)]
pub enum EncoderOutput {
    Sample(EncodedSample),
    TryAgainLater,
    FormatChanged(VideoFormat),
    /// Returned by drains after the end-of-stream sample was already delivered.
    EndOfStream,
}

pub trait VideoEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> ExportResult<()>;
    /// Surface the compositor renders into. Only valid after `configure`.
    fn create_input_surface(&mut self) -> ExportResult<InputSurface>;
    fn start(&mut self) -> ExportResult<()>;
    fn drain(&mut self, timeout: Duration) -> ExportResult<EncoderOutput>;
    fn release_output(&mut self, sample: EncodedSample);
    fn signal_end_of_input(&mut self) -> ExportResult<()>;
    fn stop(&mut self) -> ExportResult<()>;
    fn release(&mut self) -> ExportResult<()>;
}

/// Constructs codec instances for a MIME type.
///
/// The pipeline never names a concrete codec; tests substitute resource-tracking doubles
/// through this seam.
pub trait CodecFactory: Send + Sync {
    fn create_decoder(&self, mime: &str) -> ExportResult<Box<dyn VideoDecoder>>;
    fn create_encoder(&self, mime: &str) -> ExportResult<Box<dyn VideoEncoder>>;
}
