use super::*;
use crate::media::openh264::OpenH264Factory;
use crate::pipeline::fallback::synthesize_video;
use serde_json::json;

fn opts(dir: &str) -> ExportOpts {
    ExportOpts {
        dequeue_timeout_ms: 1,
        stall_budget: 200,
        synthetic_secs: 0.5,
        synthetic_width: 64,
        synthetic_height: 48,
        output_dir: PathBuf::from("target").join(dir),
        ..ExportOpts::default()
    }
}

#[test]
fn request_accepts_host_field_names() {
    let req: ComposeRequest = serde_json::from_value(json!({
        "sourceUri": "file:///tmp/in.mp4",
        "overlayConfig": {"type": "text", "text": "hi"}
    }))
    .unwrap();
    assert_eq!(req.source(), PathBuf::from("/tmp/in.mp4"));
    assert_eq!(req.overlay_spec().unwrap().value, "hi");
}

#[test]
fn malformed_body_maps_to_invalid_overlay() {
    let resp = compose_json(
        "{not json",
        &opts("unit_bridge_malformed"),
        &OpenH264Factory,
        &CancelToken::new(),
    );
    match resp {
        ComposeResponse::Error { code, .. } => assert_eq!(code, "INVALID_OVERLAY"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_kind_is_reported_not_degraded() {
    let req = ComposeRequest::new("/nowhere.mp4", json!({"kind": "hologram"}));
    let resp = compose(
        &req,
        &opts("unit_bridge_kind"),
        &OpenH264Factory,
        &CancelToken::new(),
    );
    assert_eq!(
        resp,
        ComposeResponse::from_error(&ExportError::invalid_overlay(
            "unknown overlay kind 'hologram'"
        ))
    );
}

#[test]
fn missing_source_is_a_validation_error() {
    let req = ComposeRequest::new("file:///definitely/missing.mp4", json!({"kind": "shape"}));
    let resp = compose(
        &req,
        &opts("unit_bridge_missing"),
        &OpenH264Factory,
        &CancelToken::new(),
    );
    match resp {
        ComposeResponse::Error { code, .. } => assert_eq!(code, "SOURCE_VALIDATION_FAILED"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn pooled_request_composites_source() {
    let o = opts("unit_bridge_pool");
    let src = o.output_dir.join("source.mp4");
    synthesize_video(
        &OverlaySpec::text("s"),
        o.synthetic_canvas(),
        &o,
        &OpenH264Factory,
        &src,
        &CancelToken::new(),
    )
    .unwrap();

    let pool = ExportPool::new(2).unwrap();
    let req = ComposeRequest::new(
        format!("file://{}", src.display()),
        json!({"kind": "text", "value": "pooled", "color": "#FF0000"}),
    );
    let handle = submit(&pool, req, o, Arc::new(OpenH264Factory));
    let resp = ComposeResponse::from_result(handle.wait());
    match resp {
        ComposeResponse::Ok {
            fidelity,
            frame_count,
            byte_size,
            ..
        } => {
            assert_eq!(fidelity, Fidelity::Composite);
            assert_eq!(frame_count, 15);
            assert!(byte_size > 0);
        }
        other => panic!("unexpected {other:?}"),
    }
}
