use super::*;

fn surface() -> InputSurface {
    InputSurface::new(
        Canvas {
            width: 16,
            height: 8,
        },
        2,
    )
}

#[test]
fn commit_hands_rasterized_frame_to_surface() {
    let s = surface();
    let mut rc = RenderContext::bind(s.clone()).unwrap();
    let mut ctx = rc.begin();
    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 0, 0, 255));
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, 16.0, 8.0));
    rc.commit(ctx, 1234).unwrap();

    let f = s.acquire_next().unwrap();
    assert_eq!(f.presentation_time_micros, 1234);
    assert_eq!(f.frame.pixel(3, 3), [255, 0, 0, 255]);
    rc.release();
}

#[test]
fn commit_on_full_surface_is_an_encoder_stall() {
    let s = surface();
    let mut rc = RenderContext::bind(s.clone()).unwrap();
    rc.commit(rc.begin(), 0).unwrap();
    rc.commit(rc.begin(), 1).unwrap();
    let err = rc.commit(rc.begin(), 2).unwrap_err();
    assert_eq!(
        err.kind(),
        crate::foundation::error::ErrorKind::EncoderStalled
    );
}

#[test]
fn read_back_starts_from_transparent() {
    let mut rc = RenderContext::bind(surface()).unwrap();
    let mut ctx = rc.begin();
    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(0, 0, 255, 255));
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, 8.0, 8.0));
    let _ = rc.read_back(ctx);

    let frame = rc.read_back(rc.begin());
    assert!(frame.data.iter().all(|&b| b == 0));
}

#[test]
fn released_surface_cannot_be_bound() {
    let s = surface();
    s.release();
    assert!(RenderContext::bind(s).is_err());
}

#[test]
fn image_paint_checks_length() {
    assert!(premul_bytes_to_image(&[0; 15], 2, 2).is_err());
    assert!(premul_bytes_to_image(&[255; 16], 2, 2).is_ok());
}
