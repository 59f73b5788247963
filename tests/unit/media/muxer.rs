use super::*;
use crate::foundation::error::ErrorKind;
use crate::media::codec::SampleFlags;

const SPS: [u8; 8] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xBF];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

fn scratch(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("unit_muxer");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn final_format() -> VideoFormat {
    VideoFormat {
        mime: MIME_AVC.to_owned(),
        width: 64,
        height: 48,
        sps: Some(SPS.to_vec()),
        pps: Some(PPS.to_vec()),
    }
}

fn sample(pts: i64, key: bool) -> EncodedSample {
    EncodedSample {
        data: vec![0, 0, 0, 1, if key { 0x65 } else { 0x41 }, 0xAA, 0xBB],
        presentation_time_micros: pts,
        flags: SampleFlags {
            is_key_frame: key,
            is_end_of_stream: false,
        },
    }
}

#[test]
fn write_before_start_is_a_protocol_violation() {
    let mut m = Mp4Muxer::new(scratch("early.mp4"), 33_333);
    let err = m.write_sample(0, &sample(0, true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MuxerProtocolViolation);
    assert_eq!(
        m.start().unwrap_err().kind(),
        ErrorKind::MuxerProtocolViolation
    );
}

#[test]
fn provisional_format_must_be_finalized_before_start() {
    let mut m = Mp4Muxer::new(scratch("provisional.mp4"), 33_333);
    let t = m
        .add_track(&VideoFormat::provisional(MIME_AVC, 64, 48))
        .unwrap();
    assert_eq!(t, 0);
    assert_eq!(
        m.start().unwrap_err().kind(),
        ErrorKind::MuxerProtocolViolation
    );
    m.set_track_format(t, &final_format()).unwrap();
    m.start().unwrap();
    assert!(m.is_started());
    assert_eq!(
        m.set_track_format(t, &final_format()).unwrap_err().kind(),
        ErrorKind::MuxerProtocolViolation
    );
    assert_eq!(
        m.start().unwrap_err().kind(),
        ErrorKind::MuxerProtocolViolation
    );
    m.release().unwrap();
}

#[test]
fn second_track_is_rejected() {
    let mut m = Mp4Muxer::new(scratch("two_tracks.mp4"), 33_333);
    m.add_track(&final_format()).unwrap();
    assert!(m.add_track(&final_format()).is_err());
}

#[test]
fn decreasing_pts_is_rejected() {
    let mut m = Mp4Muxer::new(scratch("backwards.mp4"), 33_333);
    m.add_track(&final_format()).unwrap();
    m.start().unwrap();
    m.write_sample(0, &sample(0, true)).unwrap();
    m.write_sample(0, &sample(33_333, false)).unwrap();
    m.write_sample(0, &sample(33_333, false)).unwrap();
    let err = m.write_sample(0, &sample(10, false)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MuxerProtocolViolation);
    m.release().unwrap();
    m.release().unwrap();
    assert_eq!(m.state(), MuxerState::Released);
}

#[test]
fn finalized_file_reads_back_with_timing() {
    let path = scratch("three.mp4");
    let mut m = Mp4Muxer::new(&path, 33_333);
    m.add_track(&final_format()).unwrap();
    m.start().unwrap();
    for i in 0..3 {
        m.write_sample(0, &sample(i * 33_333, i == 0)).unwrap();
    }
    // An empty end-of-stream buffer is accepted and writes nothing.
    m.write_sample(
        0,
        &EncodedSample {
            data: Vec::new(),
            presentation_time_micros: 66_666,
            flags: SampleFlags {
                is_key_frame: false,
                is_end_of_stream: true,
            },
        },
    )
    .unwrap();
    m.stop().unwrap();
    assert_eq!(m.samples_written(), 3);
    assert_eq!(
        m.write_sample(0, &sample(99_999, false)).unwrap_err().kind(),
        ErrorKind::MuxerProtocolViolation
    );
    m.release().unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let size = file.metadata().unwrap().len();
    assert!(size > 0);
    let mut reader = mp4::Mp4Reader::read_header(std::io::BufReader::new(file), size).unwrap();
    let track = reader.tracks().get(&1).unwrap();
    assert_eq!(track.sample_count(), 3);
    assert_eq!((track.width(), track.height()), (64, 48));
    assert_eq!(track.timescale(), TRACK_TIMESCALE);
    assert_eq!(track.sequence_parameter_set().unwrap(), &SPS[..]);

    let mut last = 0;
    for id in 1..=3 {
        let s = reader.read_sample(1, id).unwrap().unwrap();
        assert!(s.start_time >= last);
        last = s.start_time;
        assert_eq!(s.duration, 3000);
        // Stored length-prefixed.
        assert_eq!(&s.bytes[..4], &[0, 0, 0, 3]);
    }
}
