use super::*;
use std::collections::HashMap;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |k| map.get(k).cloned()
}

#[test]
fn defaults_match_documented_values() {
    let o = ExportOpts::default();
    assert_eq!(o.bitrate_bps, 2_000_000);
    assert_eq!(o.key_frame_interval_secs, 1);
    assert_eq!(o.dequeue_timeout(), Duration::from_millis(10));
    assert_eq!(o.fallback_fps(), Fps { num: 30, den: 1 });
    assert_eq!(o.synthetic_canvas().width, 640);
    assert_eq!(o.synthetic_canvas().height, 480);
    assert_eq!(o.output_prefix, "composed_video");
    o.validate().unwrap();
}

#[test]
fn overrides_replace_only_named_fields() {
    let o = ExportOpts::default()
        .with_overrides(lookup(&[
            ("VIDOVERLAY_BITRATE", "500000"),
            ("VIDOVERLAY_SYNTHETIC_SINK", "ffmpeg"),
            ("VIDOVERLAY_OUTPUT_DIR", "/tmp/out"),
        ]))
        .unwrap();
    assert_eq!(o.bitrate_bps, 500_000);
    assert_eq!(o.synthetic_sink, SyntheticSink::Ffmpeg);
    assert_eq!(o.output_dir, PathBuf::from("/tmp/out"));
    assert_eq!(o.stall_budget, 500);
}

#[test]
fn malformed_override_names_the_variable() {
    let err = ExportOpts::default()
        .with_overrides(lookup(&[("VIDOVERLAY_WORKERS", "many")]))
        .unwrap_err();
    assert!(err.to_string().contains("VIDOVERLAY_WORKERS"));
}

#[test]
fn zero_workers_fail_validation() {
    assert!(
        ExportOpts::default()
            .with_overrides(lookup(&[("VIDOVERLAY_WORKERS", "0")]))
            .is_err()
    );
}

fn fresh_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn output_name_uses_prefix_and_millis() {
    let o = ExportOpts {
        output_dir: fresh_dir("unit_opts_naming"),
        ..ExportOpts::default()
    };
    let p = o.output_path_at(1_700_000_000_123).unwrap();
    assert_eq!(
        p.file_name().and_then(|n| n.to_str()),
        Some("composed_video_1700000000123.mp4")
    );
    assert_eq!(std::fs::metadata(&p).unwrap().len(), 0);
}

#[test]
fn output_name_skips_existing_files() {
    let dir = fresh_dir("unit_opts_unique");
    std::fs::write(dir.join("composed_video_42.mp4"), b"x").unwrap();
    let o = ExportOpts {
        output_dir: dir.clone(),
        ..ExportOpts::default()
    };
    assert_eq!(
        o.output_path_at(42).unwrap(),
        dir.join("composed_video_42_1.mp4")
    );
}

#[test]
fn same_millisecond_reservations_are_distinct() {
    let o = ExportOpts {
        output_dir: fresh_dir("unit_opts_same_millis"),
        ..ExportOpts::default()
    };
    let first = o.output_path_at(42).unwrap();
    let second = o.output_path_at(42).unwrap();
    assert_ne!(first, second);
    assert_eq!(o.next_placeholder_path().unwrap().extension().unwrap(), "txt");
}

#[test]
fn concurrent_runs_never_share_an_output() {
    use std::sync::{Arc, Barrier};

    let o = Arc::new(ExportOpts {
        output_dir: fresh_dir("unit_opts_concurrent"),
        ..ExportOpts::default()
    });
    for _ in 0..50 {
        let barrier = Arc::new(Barrier::new(2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let o = Arc::clone(&o);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    o.next_output_path().unwrap()
                })
            })
            .collect();
        let paths: Vec<PathBuf> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_ne!(paths[0], paths[1]);
    }
}
