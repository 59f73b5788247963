use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::foundation::core::MICROS_PER_SEC;
use crate::foundation::error::{ErrorKind, ExportError, ExportResult};
use crate::media::codec::{CompressedSample, MIME_AVC, MIME_HEVC, MIME_VP9, MediaTrackDescriptor};
use crate::media::nal;

/// Map an ISO-BMFF sample entry type to a codec MIME type.
pub fn mime_for_sample_entry(fourcc: &str) -> String {
    match fourcc {
        "avc1" | "avc3" => MIME_AVC.to_owned(),
        "hev1" | "hvc1" => MIME_HEVC.to_owned(),
        "vp09" => MIME_VP9.to_owned(),
        "mp4a" => "audio/mp4a-latm".to_owned(),
        "tx3g" | "wvtt" | "stpp" => format!("text/{fourcc}"),
        other => format!("application/x-{other}"),
    }
}

fn track_mime(track: &mp4::Mp4Track) -> String {
    if let Ok(fourcc) = track.box_type() {
        return mime_for_sample_entry(&fourcc.to_string());
    }
    match track.track_type() {
        Ok(mp4::TrackType::Video) => "video/unknown".to_owned(),
        Ok(mp4::TrackType::Audio) => "audio/unknown".to_owned(),
        Ok(mp4::TrackType::Subtitle) => "text/unknown".to_owned(),
        Err(_) => "application/octet-stream".to_owned(),
    }
}

/// Demuxes the first video track of an MP4 file into Annex-B access units.
///
/// The file handle and parser stay open until [`Mp4SampleSource::close`] (or drop).
pub struct Mp4SampleSource {
    path: PathBuf,
    reader: Option<mp4::Mp4Reader<BufReader<File>>>,
    track: MediaTrackDescriptor,
    timescale: u32,
    length_size: usize,
    next_sample: u32,
    last_pts: i64,
}

impl std::fmt::Debug for Mp4SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4SampleSource")
            .field("path", &self.path)
            .field("track", &self.track)
            .field("next_sample", &self.next_sample)
            .field("open", &self.reader.is_some())
            .finish()
    }
}

impl Mp4SampleSource {
    /// Open `path` and select the first track whose MIME type starts with `video/`.
    #[tracing::instrument(level = "debug")]
    pub fn open(path: &Path) -> ExportResult<Self> {
        let file = File::open(path).map_err(|e| {
            ExportError::unreadable_container(format!("open '{}': {e}", path.display()))
        })?;
        let size = file
            .metadata()
            .map_err(|e| ExportError::unreadable_container(format!("stat: {e}")))?
            .len();
        let reader = mp4::Mp4Reader::read_header(BufReader::new(file), size).map_err(|e| {
            ExportError::unreadable_container(format!("parse '{}': {e}", path.display()))
        })?;

        let mut ids: Vec<u32> = reader.tracks().keys().copied().collect();
        ids.sort_unstable();

        let mut selected = None;
        for id in ids {
            let Some(track) = reader.tracks().get(&id) else {
                continue;
            };
            let mime = track_mime(track);
            tracing::debug!(track_id = id, mime = %mime, "container track");
            if mime.starts_with("video/") {
                selected = Some((track, mime));
                break;
            }
        }
        let Some((track, mime)) = selected else {
            return Err(ExportError::no_video_track(format!(
                "'{}' has {} track(s), none with a video/ MIME type",
                path.display(),
                reader.tracks().len()
            )));
        };

        let length_size = track
            .trak
            .mdia
            .minf
            .stbl
            .stsd
            .avc1
            .as_ref()
            .map(|avc1| usize::from(avc1.avcc.length_size_minus_one & 0x03) + 1)
            .unwrap_or(4);
        let frame_rate = track.frame_rate();
        let descriptor = MediaTrackDescriptor {
            codec_mime: mime,
            width: u32::from(track.width()),
            height: u32::from(track.height()),
            duration_micros: i64::try_from(track.duration().as_micros()).unwrap_or(i64::MAX),
            frame_rate: if frame_rate.is_finite() { frame_rate } else { 0.0 },
            track_id: track.track_id(),
            sample_count: track.sample_count(),
            sps: track.sequence_parameter_set().ok().map(<[u8]>::to_vec),
            pps: track.picture_parameter_set().ok().map(<[u8]>::to_vec),
        };
        let timescale = track.timescale().max(1);

        tracing::debug!(?descriptor, "selected video track");
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            track: descriptor,
            timescale,
            length_size,
            next_sample: 1,
            last_pts: 0,
        })
    }

    pub fn descriptor(&self) -> &MediaTrackDescriptor {
        &self.track
    }

    /// Next access unit in file order, or an end-of-stream sample once exhausted.
    pub fn read_next(&mut self) -> ExportResult<CompressedSample> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(ExportError::internal("sample source is closed"));
        };
        if self.next_sample > self.track.sample_count {
            return Ok(CompressedSample::end_of_stream(self.last_pts));
        }

        let id = self.next_sample;
        self.next_sample += 1;
        let sample = reader.read_sample(self.track.track_id, id).map_err(|e| {
            ExportError::unreadable_container(format!("read sample {id}: {e}"))
        })?;
        let Some(sample) = sample else {
            self.next_sample = self.track.sample_count + 1;
            return Ok(CompressedSample::end_of_stream(self.last_pts));
        };

        let ticks = i128::from(sample.start_time) + i128::from(sample.rendering_offset);
        let pts = (ticks * i128::from(MICROS_PER_SEC) / i128::from(self.timescale)) as i64;
        self.last_pts = self.last_pts.max(pts);

        let mut data = nal::avcc_to_annexb(&sample.bytes, self.length_size);
        if sample.is_sync
            && let (Some(sps), Some(pps)) = (self.track.sps.as_deref(), self.track.pps.as_deref())
        {
            data = nal::prepend_sps_pps(sps, pps, &data);
        }

        Ok(CompressedSample {
            data,
            presentation_time_micros: pts,
            is_end_of_stream: false,
            is_key_frame: sample.is_sync,
        })
    }

    /// Release the file handle and parser. Idempotent.
    pub fn close(&mut self) -> ExportResult<()> {
        if self.reader.take().is_some() {
            tracing::debug!(path = %self.path.display(), "sample source closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

/// Check that `path` is a playable video before any codec resource is allocated.
///
/// Accepts only an existing, non-empty file whose container parses, has a `video/` track,
/// and reports a positive duration. Repeated calls on an unchanged file give the same answer.
pub fn validate_source(path: &Path) -> ExportResult<MediaTrackDescriptor> {
    let meta = std::fs::metadata(path).map_err(|e| {
        ExportError::validation(format!("'{}' is not accessible: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(ExportError::validation(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(ExportError::validation(format!(
            "'{}' is empty",
            path.display()
        )));
    }

    let mut source = Mp4SampleSource::open(path).map_err(|e| match e.kind() {
        ErrorKind::NoVideoTrack | ErrorKind::UnreadableContainer => {
            ExportError::validation(e.to_string())
        }
        _ => e,
    })?;
    let descriptor = source.descriptor().clone();
    source.close()?;

    if descriptor.duration_micros <= 0 {
        return Err(ExportError::validation(format!(
            "'{}' reports a zero duration",
            path.display()
        )));
    }
    Ok(descriptor)
}

#[cfg(test)]
#[path = "../../tests/unit/media/source.rs"]
mod tests;
