use super::*;
use crate::foundation::core::Fps;
use crate::render::surface::SurfaceFrame;

const W: u32 = 64;
const H: u32 = 64;

fn config() -> EncoderConfig {
    EncoderConfig {
        width: W,
        height: H,
        bitrate_bps: 500_000,
        fps: Fps::new(30, 1).unwrap(),
        key_frame_interval_secs: 1,
    }
}

fn solid(shade: u8) -> FrameRGBA {
    let mut data = Vec::with_capacity((W * H * 4) as usize);
    for _ in 0..W * H {
        data.extend_from_slice(&[shade, 64, 255 - shade, 255]);
    }
    FrameRGBA {
        width: W,
        height: H,
        data,
        premultiplied: true,
    }
}

/// Encode `n` frames and collect everything the encoder emits.
fn encode_frames(n: i64) -> (VideoFormat, Vec<EncodedSample>) {
    let mut enc = OpenH264Encoder::new();
    enc.configure(&config()).unwrap();
    let surface = enc.create_input_surface().unwrap();
    enc.start().unwrap();

    let mut format = None;
    let mut samples = Vec::new();
    for i in 0..n {
        surface
            .swap_buffers(SurfaceFrame {
                frame: solid((i * 40) as u8),
                presentation_time_micros: i * 33_333,
            })
            .unwrap();
        if i == n - 1 {
            enc.signal_end_of_input().unwrap();
        }
        loop {
            match enc.drain(Duration::ZERO).unwrap() {
                EncoderOutput::FormatChanged(f) => format = Some(f),
                EncoderOutput::Sample(s) => samples.push(s),
                EncoderOutput::TryAgainLater => break,
                EncoderOutput::EndOfStream => break,
            }
        }
    }
    loop {
        match enc.drain(Duration::ZERO).unwrap() {
            EncoderOutput::EndOfStream => break,
            EncoderOutput::Sample(s) => samples.push(s),
            other => panic!("unexpected {other:?}"),
        }
    }
    enc.stop().unwrap();
    enc.release().unwrap();
    assert!(surface.is_released());
    (format.expect("format announced"), samples)
}

#[test]
fn factory_only_builds_avc() {
    let f = OpenH264Factory;
    assert!(f.create_decoder(MIME_AVC).is_ok());
    assert!(f.create_encoder(MIME_AVC).is_ok());
    let err = f.create_decoder("video/hevc").err().unwrap();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::UnsupportedCodec);
}

#[test]
fn encoder_rejects_odd_dimensions() {
    let mut enc = OpenH264Encoder::new();
    let mut cfg = config();
    cfg.width = 63;
    let err = enc.configure(&cfg).unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::UnsupportedCodec);
}

#[test]
fn encoder_requires_configure_before_surface() {
    let mut enc = OpenH264Encoder::new();
    assert!(enc.create_input_surface().is_err());
    assert!(enc.start().is_err());
}

#[test]
fn encoder_announces_parameter_sets_then_samples() {
    let (format, samples) = encode_frames(3);
    assert!(format.has_parameter_sets());
    assert_eq!((format.width, format.height), (W, H));

    let with_data: Vec<_> = samples.iter().filter(|s| !s.data.is_empty()).collect();
    assert_eq!(with_data.len(), 3);
    assert!(with_data[0].flags.is_key_frame);
    assert!(
        with_data
            .windows(2)
            .all(|w| w[0].presentation_time_micros <= w[1].presentation_time_micros)
    );
    assert_eq!(
        samples.iter().filter(|s| s.flags.is_end_of_stream).count(),
        1
    );
}

#[test]
fn decoder_round_trips_encoded_frames() {
    let (_, samples) = encode_frames(3);

    let mut dec = OpenH264Decoder::new();
    let track = MediaTrackDescriptor {
        codec_mime: MIME_AVC.to_owned(),
        width: W,
        height: H,
        duration_micros: 100_000,
        frame_rate: 30.0,
        track_id: 1,
        sample_count: 3,
        sps: None,
        pps: None,
    };
    dec.configure(&track).unwrap();
    dec.start().unwrap();

    for s in samples.iter().filter(|s| !s.data.is_empty()) {
        let slot = dec.dequeue_input_slot(Duration::ZERO).unwrap().unwrap();
        // Only one slot is outstanding at a time.
        assert!(dec.dequeue_input_slot(Duration::ZERO).unwrap().is_none());
        dec.submit(
            slot,
            CompressedSample {
                data: s.data.clone(),
                presentation_time_micros: s.presentation_time_micros,
                is_end_of_stream: false,
                is_key_frame: s.flags.is_key_frame,
            },
        )
        .unwrap();
    }
    let slot = dec.dequeue_input_slot(Duration::ZERO).unwrap().unwrap();
    dec.submit(slot, CompressedSample::end_of_stream(66_666))
        .unwrap();

    let mut pts = Vec::new();
    let mut saw_format = false;
    loop {
        match dec.dequeue_output(Duration::ZERO).unwrap() {
            DecoderOutput::FormatChanged(f) => {
                assert_eq!((f.width, f.height), (W, H));
                saw_format = true;
            }
            DecoderOutput::Frame(frame) => {
                assert_eq!(frame.image().canvas(), Canvas { width: W, height: H });
                pts.push(frame.presentation_time_micros);
                dec.release_frame(frame, true);
            }
            DecoderOutput::EndOfStream => break,
            DecoderOutput::TryAgainLater => panic!("decoder idle after end of input"),
        }
    }
    assert!(saw_format);
    assert_eq!(pts, vec![0, 33_333, 66_666]);

    dec.stop().unwrap();
    dec.release().unwrap();
    dec.release().unwrap();
}

#[test]
fn undecodable_access_unit_fails_instead_of_vanishing() {
    let (_, samples) = encode_frames(3);
    let predicted = samples
        .iter()
        .find(|s| !s.data.is_empty() && !s.flags.is_key_frame)
        .unwrap();

    let mut dec = OpenH264Decoder::new();
    let track = MediaTrackDescriptor {
        codec_mime: MIME_AVC.to_owned(),
        width: W,
        height: H,
        duration_micros: 100_000,
        frame_rate: 30.0,
        track_id: 1,
        sample_count: 3,
        sps: None,
        pps: None,
    };
    dec.configure(&track).unwrap();
    dec.start().unwrap();

    // A predicted slice with no parameter sets or reference picture before it.
    let slot = dec.dequeue_input_slot(Duration::ZERO).unwrap().unwrap();
    let err = dec
        .submit(
            slot,
            CompressedSample {
                data: predicted.data.clone(),
                presentation_time_micros: predicted.presentation_time_micros,
                is_end_of_stream: false,
                is_key_frame: false,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::DecoderStalled);
    assert!(dec.pending_pts.is_empty());
    assert!(matches!(
        dec.dequeue_output(Duration::ZERO).unwrap(),
        DecoderOutput::TryAgainLater
    ));
}

#[test]
fn forgetting_a_timestamp_removes_one_occurrence() {
    let mut pending: BinaryHeap<Reverse<i64>> =
        [10, 20, 20, 30].into_iter().map(Reverse).collect();
    forget_pts(&mut pending, 20);
    let mut left: Vec<i64> = pending.into_iter().map(|Reverse(p)| p).collect();
    left.sort_unstable();
    assert_eq!(left, vec![10, 20, 30]);
}

#[test]
fn decoder_rejects_foreign_slot() {
    let mut dec = OpenH264Decoder::new();
    let track = MediaTrackDescriptor {
        codec_mime: MIME_AVC.to_owned(),
        width: W,
        height: H,
        duration_micros: 1,
        frame_rate: 30.0,
        track_id: 1,
        sample_count: 1,
        sps: None,
        pps: None,
    };
    dec.configure(&track).unwrap();
    dec.start().unwrap();
    let err = dec
        .submit(InputSlot(42), CompressedSample::end_of_stream(0))
        .unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Internal);
}
