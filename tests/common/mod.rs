#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vidoverlay::media::codec::{
    CompressedSample, DecodedFrame, DecoderOutput, EncodedSample, EncoderConfig, EncoderOutput,
    InputSlot, MediaTrackDescriptor,
};
use vidoverlay::media::nal::{NalType, START_CODE, split_annexb};
use vidoverlay::pipeline::fallback::synthesize_video;
use vidoverlay::render::surface::InputSurface;
use vidoverlay::{
    CancelToken, CodecFactory, ExportError, ExportOpts, ExportResult, OpenH264Factory,
    OverlaySpec, VideoDecoder, VideoEncoder,
};

pub fn scratch(dir: &str) -> PathBuf {
    let p = PathBuf::from("target").join(dir);
    std::fs::create_dir_all(&p).unwrap();
    p
}

pub fn small_opts(dir: &str) -> ExportOpts {
    ExportOpts {
        dequeue_timeout_ms: 1,
        stall_budget: 200,
        synthetic_secs: 1.0,
        synthetic_width: 64,
        synthetic_height: 48,
        output_dir: scratch(dir),
        ..ExportOpts::default()
    }
}

/// A 64x48, 30 fps H.264 MP4 made by the crate's own encoder and muxer.
pub fn video_fixture(opts: &ExportOpts, name: &str) -> PathBuf {
    let path = opts.output_dir.join(name);
    synthesize_video(
        &OverlaySpec::shape("circle"),
        opts.synthetic_canvas(),
        opts,
        &OpenH264Factory,
        &path,
        &CancelToken::new(),
    )
    .unwrap();
    path
}

/// An MP4 with a single AAC track and no video.
pub fn audio_only_fixture(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let config = mp4::Mp4Config {
        major_brand: "isom".parse().unwrap(),
        minor_version: 512,
        compatible_brands: vec!["isom".parse().unwrap(), "mp41".parse().unwrap()],
        timescale: 1000,
    };
    let mut writer = mp4::Mp4Writer::write_start(std::io::BufWriter::new(file), &config).unwrap();
    writer
        .add_track(&mp4::TrackConfig {
            track_type: mp4::TrackType::Audio,
            timescale: 48_000,
            language: "und".to_owned(),
            media_conf: mp4::MediaConfig::AacConfig(mp4::AacConfig::default()),
        })
        .unwrap();
    for n in 0..4u64 {
        writer
            .write_sample(
                1,
                &mp4::Mp4Sample {
                    start_time: n * 1024,
                    duration: 1024,
                    rendering_offset: 0,
                    is_sync: true,
                    bytes: bytes::Bytes::from(vec![0x21, 0x10, n as u8]),
                },
            )
            .unwrap();
    }
    writer.write_end().unwrap();
}

/// Sample start times of track 1, in file order.
pub fn sample_starts(path: &Path) -> Vec<u64> {
    let file = std::fs::File::open(path).unwrap();
    let size = file.metadata().unwrap().len();
    let mut reader = mp4::Mp4Reader::read_header(std::io::BufReader::new(file), size).unwrap();
    let count = reader.tracks().get(&1).unwrap().sample_count();
    (1..=count)
        .map(|i| reader.read_sample(1, i).unwrap().unwrap().start_time)
        .collect()
}

#[derive(Debug, Default)]
pub struct Counters {
    pub decoders_created: AtomicUsize,
    pub decoder_starts: AtomicUsize,
    pub decoder_stops: AtomicUsize,
    pub decoder_releases: AtomicUsize,
    pub encoders_created: AtomicUsize,
    pub encoder_stops: AtomicUsize,
    pub encoder_releases: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Wraps the OpenH264 codecs and counts lifecycle calls.
#[derive(Default)]
pub struct TrackingFactory {
    pub counters: Arc<Counters>,
    pub fail_encoder_configure: bool,
    pub refuse_encoders: bool,
    pub refuse_decoders: bool,
    /// Strip SPS/PPS from key frames before they reach the decoder.
    pub strip_parameter_sets: bool,
}

impl CodecFactory for TrackingFactory {
    fn create_decoder(&self, mime: &str) -> ExportResult<Box<dyn VideoDecoder>> {
        if self.refuse_decoders {
            return Err(ExportError::unsupported_codec(format!(
                "no decoder for {mime}"
            )));
        }
        let inner = OpenH264Factory.create_decoder(mime)?;
        bump(&self.counters.decoders_created);
        Ok(Box::new(TrackingDecoder {
            inner,
            counters: Arc::clone(&self.counters),
            strip_parameter_sets: self.strip_parameter_sets,
        }))
    }

    fn create_encoder(&self, mime: &str) -> ExportResult<Box<dyn VideoEncoder>> {
        if self.refuse_encoders {
            return Err(ExportError::unsupported_codec(format!(
                "no encoder for {mime}"
            )));
        }
        let inner = OpenH264Factory.create_encoder(mime)?;
        bump(&self.counters.encoders_created);
        Ok(Box::new(TrackingEncoder {
            inner,
            counters: Arc::clone(&self.counters),
            fail_configure: self.fail_encoder_configure,
        }))
    }
}

struct TrackingDecoder {
    inner: Box<dyn VideoDecoder>,
    counters: Arc<Counters>,
    strip_parameter_sets: bool,
}

fn without_parameter_sets(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for nal in split_annexb(data) {
        if !matches!(NalType::from(nal[0]), NalType::Sps | NalType::Pps) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
    }
    out
}

impl VideoDecoder for TrackingDecoder {
    fn configure(&mut self, track: &MediaTrackDescriptor) -> ExportResult<()> {
        self.inner.configure(track)
    }

    fn start(&mut self) -> ExportResult<()> {
        bump(&self.counters.decoder_starts);
        self.inner.start()
    }

    fn dequeue_input_slot(&mut self, timeout: Duration) -> ExportResult<Option<InputSlot>> {
        self.inner.dequeue_input_slot(timeout)
    }

    fn submit(&mut self, slot: InputSlot, mut sample: CompressedSample) -> ExportResult<()> {
        if self.strip_parameter_sets && sample.is_key_frame {
            sample.data = without_parameter_sets(&sample.data);
        }
        self.inner.submit(slot, sample)
    }

    fn dequeue_output(&mut self, timeout: Duration) -> ExportResult<DecoderOutput> {
        self.inner.dequeue_output(timeout)
    }

    fn release_frame(&mut self, frame: DecodedFrame, render: bool) {
        self.inner.release_frame(frame, render);
    }

    fn stop(&mut self) -> ExportResult<()> {
        bump(&self.counters.decoder_stops);
        self.inner.stop()
    }

    fn release(&mut self) -> ExportResult<()> {
        bump(&self.counters.decoder_releases);
        self.inner.release()
    }
}

struct TrackingEncoder {
    inner: Box<dyn VideoEncoder>,
    counters: Arc<Counters>,
    fail_configure: bool,
}

impl VideoEncoder for TrackingEncoder {
    fn configure(&mut self, config: &EncoderConfig) -> ExportResult<()> {
        if self.fail_configure {
            return Err(ExportError::unsupported_codec("forced configure failure"));
        }
        self.inner.configure(config)
    }

    fn create_input_surface(&mut self) -> ExportResult<InputSurface> {
        self.inner.create_input_surface()
    }

    fn start(&mut self) -> ExportResult<()> {
        self.inner.start()
    }

    fn drain(&mut self, timeout: Duration) -> ExportResult<EncoderOutput> {
        self.inner.drain(timeout)
    }

    fn release_output(&mut self, sample: EncodedSample) {
        self.inner.release_output(sample);
    }

    fn signal_end_of_input(&mut self) -> ExportResult<()> {
        self.inner.signal_end_of_input()
    }

    fn stop(&mut self) -> ExportResult<()> {
        bump(&self.counters.encoder_stops);
        self.inner.stop()
    }

    fn release(&mut self) -> ExportResult<()> {
        bump(&self.counters.encoder_releases);
        self.inner.release()
    }
}
