//! Software H.264 codecs backed by the `openh264` crate.
//!
//! `openh264` is synchronous, so "timeouts" never block: a poll that finds no work returns
//! `TryAgainLater` immediately and the driver's retry budget decides when that is a stall.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use ::openh264::formats::YUVSource as _;

use crate::foundation::core::Canvas;
use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::flatten_premul_to_rgb8;
use crate::media::codec::{
    CodecFactory, CompressedSample, DecodedFrame, DecoderOutput, EncodedSample, EncoderConfig,
    EncoderOutput, InputSlot, MIME_AVC, MediaTrackDescriptor, SampleFlags, VideoDecoder,
    VideoEncoder, VideoFormat,
};
use crate::media::nal;
use crate::render::surface::{FrameRGBA, InputSurface};

/// Frames the encoder input surface buffers before the compositor must wait.
const SURFACE_CAPACITY: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CodecState {
    Created,
    Configured,
    Started,
    Stopped,
    Released,
}

fn require(state: CodecState, want: CodecState, op: &str) -> ExportResult<()> {
    if state != want {
        return Err(ExportError::internal(format!(
            "{op} requires codec state {want:?}, found {state:?}"
        )));
    }
    Ok(())
}

/// Builds [`OpenH264Decoder`] and [`OpenH264Encoder`] for `video/avc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenH264Factory;

impl CodecFactory for OpenH264Factory {
    fn create_decoder(&self, mime: &str) -> ExportResult<Box<dyn VideoDecoder>> {
        if mime != MIME_AVC {
            return Err(ExportError::unsupported_codec(format!(
                "no software decoder for '{mime}'"
            )));
        }
        Ok(Box::new(OpenH264Decoder::new()))
    }

    fn create_encoder(&self, mime: &str) -> ExportResult<Box<dyn VideoEncoder>> {
        if mime != MIME_AVC {
            return Err(ExportError::unsupported_codec(format!(
                "no software encoder for '{mime}'"
            )));
        }
        Ok(Box::new(OpenH264Encoder::new()))
    }
}

pub struct OpenH264Decoder {
    decoder: Option<::openh264::decoder::Decoder>,
    state: CodecState,
    next_slot: u32,
    outstanding_slot: Option<u32>,
    /// Presentation times of submitted samples; decoded pictures come out in display order,
    /// so each one takes the smallest pending timestamp.
    pending_pts: BinaryHeap<Reverse<i64>>,
    ready: VecDeque<DecodedFrame>,
    format: Option<VideoFormat>,
    format_announced: bool,
    input_eos: bool,
    spare: Vec<Vec<u8>>,
    rendered: u64,
    dropped: u64,
    corrupt: u64,
}

impl Default for OpenH264Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenH264Decoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            state: CodecState::Created,
            next_slot: 0,
            outstanding_slot: None,
            pending_pts: BinaryHeap::new(),
            ready: VecDeque::new(),
            format: None,
            format_announced: false,
            input_eos: false,
            spare: Vec::new(),
            rendered: 0,
            dropped: 0,
            corrupt: 0,
        }
    }

    /// Decode one access unit whose timestamp is `pts`.
    ///
    /// A corrupt access unit fails the run: the picture would silently go missing and every
    /// later picture would inherit the wrong timestamp.
    fn decode_access_unit(&mut self, data: &[u8], pts: i64) -> ExportResult<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(ExportError::internal("decoder released"));
        };
        self.pending_pts.push(Reverse(pts));
        let picture = match decoder.decode(data) {
            Ok(Some(yuv)) => Some(to_rgba(&yuv, &mut self.spare)),
            Ok(None) => None,
            Err(e) => {
                forget_pts(&mut self.pending_pts, pts);
                self.corrupt += 1;
                return Err(ExportError::decoder_stalled(format!(
                    "access unit at {pts} us ({} bytes) could not be decoded: {e}",
                    data.len()
                )));
            }
        };
        if let Some(picture) = picture {
            self.enqueue(picture);
        }
        Ok(())
    }

    /// Collect pictures the decoder still buffers once input has ended.
    fn flush(&mut self) -> ExportResult<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(ExportError::internal("decoder released"));
        };
        let pictures: Vec<Picture> = decoder
            .flush_remaining()
            .map_err(|e| ExportError::decoder_stalled(format!("flush at end of stream: {e}")))?
            .iter()
            .map(|yuv| to_rgba(yuv, &mut self.spare))
            .collect();
        for picture in pictures {
            self.enqueue(picture);
        }
        if !self.pending_pts.is_empty() {
            return Err(ExportError::decoder_stalled(format!(
                "{} submitted access unit(s) never produced a picture",
                self.pending_pts.len()
            )));
        }
        Ok(())
    }

    fn enqueue(&mut self, picture: Picture) {
        let Picture {
            width,
            height,
            data,
        } = picture;
        if self
            .format
            .as_ref()
            .is_none_or(|f| f.width != width || f.height != height)
        {
            self.format = Some(VideoFormat::provisional(MIME_AVC, width, height));
            self.format_announced = false;
        }

        let pts = self.pending_pts.pop().map(|Reverse(p)| p).unwrap_or(0);
        self.ready.push_back(DecodedFrame::new(
            FrameRGBA {
                width,
                height,
                data,
                premultiplied: true,
            },
            pts,
        ));
    }
}

struct Picture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

fn to_rgba(yuv: &::openh264::decoder::DecodedYUV<'_>, spare: &mut Vec<Vec<u8>>) -> Picture {
    let (w, h) = yuv.dimensions();
    let mut data = spare.pop().unwrap_or_default();
    data.clear();
    data.resize(w * h * 4, 0);
    yuv.write_rgba8(&mut data);
    Picture {
        width: w as u32,
        height: h as u32,
        data,
    }
}

/// Drop one pending occurrence of `pts`.
fn forget_pts(pending: &mut BinaryHeap<Reverse<i64>>, pts: i64) {
    let mut removed = false;
    pending.retain(|Reverse(p)| {
        if !removed && *p == pts {
            removed = true;
            return false;
        }
        true
    });
}

impl VideoDecoder for OpenH264Decoder {
    fn configure(&mut self, track: &MediaTrackDescriptor) -> ExportResult<()> {
        require(self.state, CodecState::Created, "configure")?;
        if track.codec_mime != MIME_AVC {
            return Err(ExportError::unsupported_codec(format!(
                "openh264 cannot decode '{}'",
                track.codec_mime
            )));
        }
        let decoder = ::openh264::decoder::Decoder::new()
            .map_err(|e| ExportError::unsupported_codec(format!("openh264 decoder init: {e}")))?;
        self.decoder = Some(decoder);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn start(&mut self) -> ExportResult<()> {
        require(self.state, CodecState::Configured, "start")?;
        self.state = CodecState::Started;
        Ok(())
    }

    fn dequeue_input_slot(&mut self, _timeout: Duration) -> ExportResult<Option<InputSlot>> {
        require(self.state, CodecState::Started, "dequeue_input_slot")?;
        if self.input_eos || self.outstanding_slot.is_some() {
            return Ok(None);
        }
        let id = self.next_slot;
        self.next_slot = self.next_slot.wrapping_add(1);
        self.outstanding_slot = Some(id);
        Ok(Some(InputSlot(id)))
    }

    fn submit(&mut self, slot: InputSlot, sample: CompressedSample) -> ExportResult<()> {
        require(self.state, CodecState::Started, "submit")?;
        if self.outstanding_slot != Some(slot.0) {
            return Err(ExportError::internal(format!(
                "input slot {} was not handed out by this decoder",
                slot.0
            )));
        }
        self.outstanding_slot = None;

        if sample.is_end_of_stream {
            self.input_eos = true;
            if !sample.data.is_empty() {
                self.decode_access_unit(&sample.data, sample.presentation_time_micros)?;
            }
            return self.flush();
        }
        self.decode_access_unit(&sample.data, sample.presentation_time_micros)
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> ExportResult<DecoderOutput> {
        require(self.state, CodecState::Started, "dequeue_output")?;
        if !self.format_announced
            && let Some(format) = self.format.clone()
        {
            self.format_announced = true;
            return Ok(DecoderOutput::FormatChanged(format));
        }
        if let Some(frame) = self.ready.pop_front() {
            return Ok(DecoderOutput::Frame(frame));
        }
        if self.input_eos {
            return Ok(DecoderOutput::EndOfStream);
        }
        Ok(DecoderOutput::TryAgainLater)
    }

    fn release_frame(&mut self, frame: DecodedFrame, render: bool) {
        if render {
            self.rendered += 1;
        } else {
            self.dropped += 1;
        }
        if self.spare.len() < 4 {
            self.spare.push(frame.image.data);
        }
    }

    fn stop(&mut self) -> ExportResult<()> {
        match self.state {
            CodecState::Started | CodecState::Configured => {
                self.ready.clear();
                self.pending_pts.clear();
                self.state = CodecState::Stopped;
                tracing::debug!(
                    rendered = self.rendered,
                    dropped = self.dropped,
                    corrupt = self.corrupt,
                    "decoder stopped"
                );
                Ok(())
            }
            CodecState::Created | CodecState::Stopped | CodecState::Released => Ok(()),
        }
    }

    fn release(&mut self) -> ExportResult<()> {
        self.decoder = None;
        self.ready.clear();
        self.spare.clear();
        self.state = CodecState::Released;
        Ok(())
    }
}

pub struct OpenH264Encoder {
    encoder: Option<::openh264::encoder::Encoder>,
    config: Option<EncoderConfig>,
    surface: Option<InputSurface>,
    state: CodecState,
    key_interval_frames: u64,
    frames_encoded: u64,
    format_announced: bool,
    held: VecDeque<EncodedSample>,
    input_eos: bool,
    eos_delivered: bool,
    last_pts: i64,
    rgb: Vec<u8>,
}

impl Default for OpenH264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenH264Encoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            config: None,
            surface: None,
            state: CodecState::Created,
            key_interval_frames: 1,
            frames_encoded: 0,
            format_announced: false,
            held: VecDeque::new(),
            input_eos: false,
            eos_delivered: false,
            last_pts: 0,
            rgb: Vec::new(),
        }
    }

    fn encode_next(&mut self) -> ExportResult<Option<EncodedSample>> {
        let Some(surface) = self.surface.as_ref() else {
            return Err(ExportError::internal("encoder has no input surface"));
        };
        let Some(frame) = surface.acquire_next() else {
            return Ok(None);
        };
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(ExportError::internal("encoder released"));
        };

        let canvas = surface.canvas();
        flatten_premul_to_rgb8(&mut self.rgb, &frame.frame.data, [0, 0, 0]);
        surface.recycle(frame.frame.data);

        if self.frames_encoded % self.key_interval_frames == 0 {
            encoder.force_intra_frame();
        }
        let yuv = ::openh264::formats::YUVBuffer::from_rgb_source(::openh264::formats::RgbSliceU8::new(
            &self.rgb,
            (canvas.width as usize, canvas.height as usize),
        ));
        let data = encoder
            .encode(&yuv)
            .map_err(|e| ExportError::internal(format!("openh264 encode: {e}")))?
            .to_vec();
        self.frames_encoded += 1;
        self.last_pts = frame.presentation_time_micros;

        if data.is_empty() {
            tracing::debug!(
                pts = frame.presentation_time_micros,
                "encoder skipped frame"
            );
            return Ok(None);
        }

        let is_last = self.input_eos && surface.pending() == 0;
        Ok(Some(EncodedSample {
            flags: SampleFlags {
                is_key_frame: nal::contains_idr(&data),
                is_end_of_stream: is_last,
            },
            data,
            presentation_time_micros: frame.presentation_time_micros,
        }))
    }
}

impl VideoEncoder for OpenH264Encoder {
    fn configure(&mut self, config: &EncoderConfig) -> ExportResult<()> {
        require(self.state, CodecState::Created, "configure")?;
        if config.width == 0 || config.height == 0 {
            return Err(ExportError::unsupported_codec(
                "encoder width/height must be non-zero",
            ));
        }
        if !config.width.is_multiple_of(2) || !config.height.is_multiple_of(2) {
            return Err(ExportError::unsupported_codec(format!(
                "encoder needs even dimensions for yuv420, got {}x{}",
                config.width, config.height
            )));
        }

        let api = ::openh264::OpenH264API::from_source();
        let enc_config = ::openh264::encoder::EncoderConfig::new()
            .bitrate(::openh264::encoder::BitRate::from_bps(config.bitrate_bps))
            .max_frame_rate(::openh264::encoder::FrameRate::from_hz(
                config.fps.as_f64() as f32,
            ));
        let encoder = ::openh264::encoder::Encoder::with_api_config(api, enc_config)
            .map_err(|e| ExportError::unsupported_codec(format!("openh264 encoder init: {e}")))?;

        let fps = config.fps.as_f64().round().max(1.0) as u64;
        self.key_interval_frames = (fps * u64::from(config.key_frame_interval_secs)).max(1);
        self.encoder = Some(encoder);
        self.config = Some(*config);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> ExportResult<InputSurface> {
        require(self.state, CodecState::Configured, "create_input_surface")?;
        let Some(config) = self.config else {
            return Err(ExportError::internal("encoder not configured"));
        };
        let surface = InputSurface::new(
            Canvas {
                width: config.width,
                height: config.height,
            },
            SURFACE_CAPACITY,
        );
        self.surface = Some(surface.clone());
        Ok(surface)
    }

    fn start(&mut self) -> ExportResult<()> {
        require(self.state, CodecState::Configured, "start")?;
        if self.surface.is_none() {
            return Err(ExportError::internal(
                "encoder started without an input surface",
            ));
        }
        self.state = CodecState::Started;
        Ok(())
    }

    fn drain(&mut self, _timeout: Duration) -> ExportResult<EncoderOutput> {
        require(self.state, CodecState::Started, "drain")?;
        if let Some(sample) = self.held.pop_front() {
            return Ok(EncoderOutput::Sample(sample));
        }

        if let Some(sample) = self.encode_next()? {
            if sample.flags.is_end_of_stream {
                self.eos_delivered = true;
            }
            if !self.format_announced {
                let (sps, pps) = nal::find_parameter_sets(&sample.data);
                let Some(config) = self.config else {
                    return Err(ExportError::internal("encoder not configured"));
                };
                self.format_announced = true;
                self.held.push_back(sample);
                return Ok(EncoderOutput::FormatChanged(VideoFormat {
                    mime: MIME_AVC.to_owned(),
                    width: config.width,
                    height: config.height,
                    sps,
                    pps,
                }));
            }
            return Ok(EncoderOutput::Sample(sample));
        }

        let queue_empty = self.surface.as_ref().is_none_or(|s| s.pending() == 0);
        if self.input_eos && queue_empty {
            if self.eos_delivered {
                return Ok(EncoderOutput::EndOfStream);
            }
            self.eos_delivered = true;
            return Ok(EncoderOutput::Sample(EncodedSample {
                data: Vec::new(),
                presentation_time_micros: self.last_pts,
                flags: SampleFlags {
                    is_key_frame: false,
                    is_end_of_stream: true,
                },
            }));
        }
        Ok(EncoderOutput::TryAgainLater)
    }

    fn release_output(&mut self, sample: EncodedSample) {
        drop(sample);
    }

    fn signal_end_of_input(&mut self) -> ExportResult<()> {
        require(self.state, CodecState::Started, "signal_end_of_input")?;
        self.input_eos = true;
        Ok(())
    }

    fn stop(&mut self) -> ExportResult<()> {
        match self.state {
            CodecState::Started | CodecState::Configured => {
                self.held.clear();
                self.state = CodecState::Stopped;
                tracing::debug!(frames = self.frames_encoded, "encoder stopped");
                Ok(())
            }
            CodecState::Created | CodecState::Stopped | CodecState::Released => Ok(()),
        }
    }

    fn release(&mut self) -> ExportResult<()> {
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        self.encoder = None;
        self.held.clear();
        self.state = CodecState::Released;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/openh264.rs"]
mod tests;
