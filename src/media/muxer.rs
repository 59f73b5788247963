use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use crate::foundation::core::MICROS_PER_SEC;
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::codec::{EncodedSample, MIME_AVC, VideoFormat};
use crate::media::nal;

/// Media timescale of the written video track (the MPEG 90 kHz clock).
pub const TRACK_TIMESCALE: u32 = 90_000;
const MOVIE_TIMESCALE: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuxerState {
    Created,
    Started,
    Stopped,
    Released,
}

fn micros_to_ticks(us: i64) -> u64 {
    let ticks = (i128::from(us.max(0)) * i128::from(TRACK_TIMESCALE)
        + i128::from(MICROS_PER_SEC / 2))
        / i128::from(MICROS_PER_SEC);
    ticks as u64
}

struct PendingSample {
    data: Vec<u8>,
    pts_ticks: u64,
    is_sync: bool,
}

/// Single-video-track MP4 writer.
///
/// Samples arrive in Annex-B form and are stored length-prefixed. Sample durations come from
/// the next sample's timestamp, so one sample is held back until its successor (or `stop`).
pub struct Mp4Muxer {
    path: PathBuf,
    state: MuxerState,
    format: Option<VideoFormat>,
    writer: Option<mp4::Mp4Writer<BufWriter<File>>>,
    pending: Option<PendingSample>,
    last_pts: Option<i64>,
    last_duration_ticks: u32,
    default_duration_ticks: u32,
    samples_written: u64,
}

impl std::fmt::Debug for Mp4Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4Muxer")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("samples_written", &self.samples_written)
            .finish()
    }
}

impl Mp4Muxer {
    /// A muxer targeting `path`. Nothing touches the filesystem until [`Mp4Muxer::start`].
    ///
    /// `frame_duration_micros` is the duration given to the final sample, which has no
    /// successor to measure against.
    pub fn new(path: impl Into<PathBuf>, frame_duration_micros: i64) -> Self {
        let default_duration_ticks = u32::try_from(micros_to_ticks(frame_duration_micros))
            .unwrap_or(u32::MAX)
            .max(1);
        Self {
            path: path.into(),
            state: MuxerState::Created,
            format: None,
            writer: None,
            pending: None,
            last_pts: None,
            last_duration_ticks: default_duration_ticks,
            default_duration_ticks,
            samples_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == MuxerState::Started
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn expect_state(&self, want: MuxerState, op: &str) -> ExportResult<()> {
        if self.state != want {
            return Err(ExportError::muxer_protocol(format!(
                "{op} called in state {:?}, expected {want:?}",
                self.state
            )));
        }
        Ok(())
    }

    /// Register the video track. Only one track is supported; its index is always 0.
    pub fn add_track(&mut self, format: &VideoFormat) -> ExportResult<usize> {
        self.expect_state(MuxerState::Created, "add_track")?;
        if self.format.is_some() {
            return Err(ExportError::muxer_protocol(
                "only a single video track is supported",
            ));
        }
        if format.mime != MIME_AVC {
            return Err(ExportError::muxer_protocol(format!(
                "cannot mux '{}' into an avc1 track",
                format.mime
            )));
        }
        self.format = Some(format.clone());
        Ok(0)
    }

    /// Replace the provisional track format (the encoder's post-start SPS/PPS).
    pub fn set_track_format(&mut self, track: usize, format: &VideoFormat) -> ExportResult<()> {
        self.expect_state(MuxerState::Created, "set_track_format")?;
        if track != 0 || self.format.is_none() {
            return Err(ExportError::muxer_protocol(format!(
                "unknown track index {track}"
            )));
        }
        self.format = Some(format.clone());
        Ok(())
    }

    /// Create the output file and write the track header. Valid exactly once.
    pub fn start(&mut self) -> ExportResult<()> {
        self.expect_state(MuxerState::Created, "start")?;
        let Some(format) = self.format.as_ref() else {
            return Err(ExportError::muxer_protocol("start called before add_track"));
        };
        let (Some(sps), Some(pps)) = (format.sps.clone(), format.pps.clone()) else {
            return Err(ExportError::muxer_protocol(
                "track format has no SPS/PPS; the encoder format change was not applied",
            ));
        };
        let width = u16::try_from(format.width)
            .map_err(|_| ExportError::muxer_protocol(format!("width {} too large", format.width)))?;
        let height = u16::try_from(format.height).map_err(|_| {
            ExportError::muxer_protocol(format!("height {} too large", format.height))
        })?;

        let file = File::create(&self.path)?;
        let brand = |s: &str| {
            s.parse::<mp4::FourCC>()
                .map_err(|e| ExportError::internal(format!("fourcc '{s}': {e}")))
        };
        let config = mp4::Mp4Config {
            major_brand: brand("isom")?,
            minor_version: 512,
            compatible_brands: vec![brand("isom")?, brand("iso2")?, brand("avc1")?, brand("mp41")?],
            timescale: MOVIE_TIMESCALE,
        };
        let mut writer = mp4::Mp4Writer::write_start(BufWriter::new(file), &config)
            .map_err(|e| ExportError::internal(format!("mp4 header: {e}")))?;
        writer
            .add_track(&mp4::TrackConfig {
                track_type: mp4::TrackType::Video,
                timescale: TRACK_TIMESCALE,
                language: "und".to_owned(),
                media_conf: mp4::MediaConfig::AvcConfig(mp4::AvcConfig {
                    width,
                    height,
                    seq_param_set: sps,
                    pic_param_set: pps,
                }),
            })
            .map_err(|e| ExportError::internal(format!("mp4 track: {e}")))?;

        self.writer = Some(writer);
        self.state = MuxerState::Started;
        tracing::debug!(path = %self.path.display(), width, height, "muxer started");
        Ok(())
    }

    /// Append one encoded sample. Timestamps must not decrease.
    pub fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> ExportResult<()> {
        self.expect_state(MuxerState::Started, "write_sample")?;
        if track != 0 {
            return Err(ExportError::muxer_protocol(format!(
                "unknown track index {track}"
            )));
        }
        let pts = sample.presentation_time_micros;
        if let Some(last) = self.last_pts
            && pts < last
        {
            return Err(ExportError::muxer_protocol(format!(
                "presentation time went backwards: {pts} < {last}"
            )));
        }

        let data = nal::annexb_to_avcc(&sample.data);
        if data.is_empty() {
            // End-of-stream markers and parameter-set-only buffers carry no picture.
            return Ok(());
        }
        self.last_pts = Some(pts);

        let next = PendingSample {
            data,
            pts_ticks: micros_to_ticks(pts),
            is_sync: sample.flags.is_key_frame,
        };
        if let Some(prev) = self.pending.take() {
            let delta = next.pts_ticks.saturating_sub(prev.pts_ticks);
            let duration = u32::try_from(delta).unwrap_or(u32::MAX);
            if duration > 0 {
                self.last_duration_ticks = duration;
            }
            self.flush_sample(prev, duration)?;
        }
        self.pending = Some(next);
        Ok(())
    }

    fn flush_sample(&mut self, s: PendingSample, duration: u32) -> ExportResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ExportError::muxer_protocol("writer is gone"));
        };
        writer
            .write_sample(
                1,
                &mp4::Mp4Sample {
                    start_time: s.pts_ticks,
                    duration,
                    rendering_offset: 0,
                    is_sync: s.is_sync,
                    bytes: bytes::Bytes::from(s.data),
                },
            )
            .map_err(|e| ExportError::internal(format!("mp4 write sample: {e}")))?;
        self.samples_written += 1;
        Ok(())
    }

    /// Flush the held sample and write the index. Valid once, after `start`.
    pub fn stop(&mut self) -> ExportResult<()> {
        self.expect_state(MuxerState::Started, "stop")?;
        self.state = MuxerState::Stopped;

        if let Some(last) = self.pending.take() {
            let duration = if self.samples_written == 0 {
                self.default_duration_ticks
            } else {
                self.last_duration_ticks
            };
            self.flush_sample(last, duration)?;
        }
        let Some(mut writer) = self.writer.take() else {
            return Err(ExportError::muxer_protocol("writer is gone"));
        };
        writer
            .write_end()
            .map_err(|e| ExportError::internal(format!("mp4 finalize: {e}")))?;
        writer.into_writer().flush()?;
        tracing::debug!(samples = self.samples_written, "muxer finalized");
        Ok(())
    }

    /// Drop every resource. An unstopped muxer leaves a partial file behind. Idempotent.
    pub fn release(&mut self) -> ExportResult<()> {
        if self.state == MuxerState::Started {
            tracing::debug!(path = %self.path.display(), "muxer released without stop");
        }
        self.writer = None;
        self.pending = None;
        self.state = MuxerState::Released;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/muxer.rs"]
mod tests;
