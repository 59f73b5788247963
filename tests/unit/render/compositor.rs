use super::*;
use crate::render::text::BitmapShaper;

const W: u32 = 640;
const H: u32 = 480;

fn bound() -> (Compositor, InputSurface) {
    let surface = InputSurface::new(
        Canvas {
            width: W,
            height: H,
        },
        2,
    );
    let mut c = Compositor::new(Box::new(BitmapShaper));
    c.bind_target_surface(surface.clone()).unwrap();
    (c, surface)
}

fn black_frame(pts: i64) -> DecodedFrame {
    let mut data = vec![0u8; (W * H * 4) as usize];
    for px in data.chunks_exact_mut(4) {
        px[3] = 255;
    }
    DecodedFrame::new(
        FrameRGBA {
            width: W,
            height: H,
            data,
            premultiplied: true,
        },
        pts,
    )
}

fn render(c: &mut Compositor, s: &InputSurface, overlay: &OverlaySpec) -> FrameRGBA {
    let bg = black_frame(0);
    c.render_frame(FrameIndex(0), Background::Decoded(&bg), overlay)
        .unwrap();
    s.acquire_next().unwrap().frame
}

fn scratch(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("unit_compositor");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn render_without_target_fails() {
    let mut c = Compositor::new(Box::new(BitmapShaper));
    let bg = black_frame(0);
    assert!(
        c.render_frame(FrameIndex(0), Background::Decoded(&bg), &OverlaySpec::text("x"))
            .is_err()
    );
}

#[test]
fn decoded_frame_timestamp_is_reused() {
    let (mut c, s) = bound();
    let bg = black_frame(41_000);
    let pts = c
        .render_frame(FrameIndex(7), Background::Decoded(&bg), &OverlaySpec::text(""))
        .unwrap();
    assert_eq!(pts, 41_000);
    assert_eq!(s.acquire_next().unwrap().presentation_time_micros, 41_000);
    assert_eq!(c.frames_rendered(), 1);
}

#[test]
fn text_is_centered_on_anchor() {
    let (mut c, s) = bound();
    let overlay = OverlaySpec::text("HELLO").at(320.0, 240.0).sized(24.0);
    let frame = render(&mut c, &s, &overlay);

    // White glyphs on black; the black shadow leaves the background unchanged.
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (u32::MAX, 0, u32::MAX, 0);
    for y in 0..H {
        for x in 0..W {
            if frame.pixel(x, y)[0] > 0 {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }
    }
    assert!(min_x < max_x, "no text pixels found");
    let center_x = f64::from(min_x + max_x) / 2.0;
    assert!((center_x - 320.0).abs() <= 1.0, "center_x = {center_x}");
    // Glyph ink sits in the ascent part of the centered box.
    assert!(min_y >= 240 - 13 && max_y <= 240 + 10, "rows {min_y}..{max_y}");
}

#[test]
fn layers_paint_in_declared_order() {
    let (mut c, s) = bound();
    let layer = |color| OverlaySpec::shape("rectangle").at(320.0, 240.0).colored(color);
    let overlay = OverlaySpec::layer_stack(vec![
        layer(ColorDef::rgba(1.0, 0.0, 0.0, 1.0)),
        layer(ColorDef::rgba(0.0, 1.0, 0.0, 1.0)),
        layer(ColorDef::rgba(0.0, 0.0, 1.0, 1.0)),
    ]);
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(320, 240), [0, 0, 255, 255]);

    let reversed = OverlaySpec::layer_stack(overlay.layers.iter().rev().cloned().collect());
    let frame = render(&mut c, &s, &reversed);
    assert_eq!(frame.pixel(320, 240), [255, 0, 0, 255]);
}

#[test]
fn top_level_overlay_paints_over_layers() {
    let (mut c, s) = bound();
    let mut overlay = OverlaySpec::shape("circle")
        .at(320.0, 240.0)
        .colored(ColorDef::rgba(0.0, 1.0, 0.0, 1.0));
    overlay.layers = vec![
        OverlaySpec::shape("rectangle")
            .at(320.0, 240.0)
            .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0)),
    ];
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(320, 240), [0, 255, 0, 255]);
    // Rectangle corner region lies outside the circle.
    assert_eq!(frame.pixel(320 - 27, 240 - 17), [255, 0, 0, 255]);
}

#[test]
fn shapes_get_white_outline() {
    let (mut c, s) = bound();
    let overlay = OverlaySpec::shape("rectangle")
        .at(320.0, 240.0)
        .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0));
    let frame = render(&mut c, &s, &overlay);
    // The stroke straddles the edge at x = 290.
    let edge = frame.pixel(290, 240);
    assert!(edge[1] > 200 && edge[2] > 200, "edge = {edge:?}");
    assert_eq!(frame.pixel(320, 240), [255, 0, 0, 255]);
    assert_eq!(frame.pixel(100, 100), [0, 0, 0, 255]);
}

#[test]
fn unknown_shape_draws_circle() {
    let (mut c, s) = bound();
    let overlay = OverlaySpec::shape("hexagon")
        .at(320.0, 240.0)
        .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0));
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(320, 240), [255, 0, 0, 255]);
    // Inside the bounding square but outside radius 25.
    assert_eq!(frame.pixel(320 - 23, 240 - 23), [0, 0, 0, 255]);
}

#[test]
fn missing_image_draws_placeholder() {
    let (mut c, s) = bound();
    let overlay = OverlaySpec::image("file:///definitely/missing.png").at(200.0, 200.0);
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(200 - 40, 200 - 40), [76, 175, 80, 255]);
    assert_eq!(frame.pixel(200 - 60, 200 - 60), [0, 0, 0, 255]);
}

#[test]
fn raster_image_is_drawn_centered() {
    let path = scratch("red.png");
    image::RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255]))
        .save(&path)
        .unwrap();
    let (mut c, s) = bound();
    let overlay = OverlaySpec::image(path.to_string_lossy()).at(100.0, 100.0);
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(100, 100), [255, 0, 0, 255]);
    assert_eq!(frame.pixel(96, 96), [255, 0, 0, 255]);
    assert_eq!(frame.pixel(90, 90), [0, 0, 0, 255]);
}

#[test]
fn snapshot_covers_the_frame_under_layers() {
    let path = scratch("snapshot.png");
    image::RgbaImage::from_pixel(8, 6, image::Rgba([0, 0, 255, 255]))
        .save(&path)
        .unwrap();
    let (mut c, s) = bound();
    let overlay = OverlaySpec::layer_stack(vec![
        OverlaySpec::shape("circle")
            .at(320.0, 240.0)
            .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0)),
    ])
    .with_snapshot(&path);
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(5, 5), [0, 0, 255, 255]);
    assert_eq!(frame.pixel(634, 474), [0, 0, 255, 255]);
    assert_eq!(frame.pixel(320, 240), [255, 0, 0, 255]);
}

#[test]
fn frame_index_never_hides_the_overlay() {
    let (mut c, s) = bound();
    let mut overlay = OverlaySpec::shape("circle")
        .at(320.0, 240.0)
        .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0));
    overlay.frame_index = FrameIndex(5);
    let frame = render(&mut c, &s, &overlay);
    assert_eq!(frame.pixel(320, 240), [255, 0, 0, 255]);
}

#[test]
fn frame_index_offsets_animation_time_only() {
    let fps = Fps::new(30, 1).unwrap();
    let (mut c, s) = bound();
    let mut overlay = OverlaySpec::text("");
    overlay.frame_index = FrameIndex(45);

    let pts = c
        .render_frame(FrameIndex(0), Background::Animated { fps }, &overlay)
        .unwrap();
    assert_eq!(pts, 0);
    let got = s.acquire_next().unwrap().frame.pixel(10, 10);
    let expect = animated_background_color(FrameIndex(45), fps).to_rgba8();
    for ch in 0..3 {
        assert!(
            (i16::from(got[ch]) - i16::from(expect[ch])).abs() <= 1,
            "{got:?} vs {expect:?}"
        );
    }
}

#[test]
fn opacity_fades_the_overlay() {
    let (mut c, s) = bound();
    let mut overlay = OverlaySpec::shape("rectangle")
        .at(320.0, 240.0)
        .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0));
    overlay.opacity = 0.5;
    let frame = render(&mut c, &s, &overlay);
    let px = frame.pixel(320, 240);
    assert!((120..=135).contains(&px[0]), "px = {px:?}");
    assert_eq!(px[3], 255);
}

#[test]
fn layers_are_clamped_inside_the_frame() {
    let (mut c, s) = bound();
    let overlay = OverlaySpec::layer_stack(vec![
        OverlaySpec::shape("rectangle")
            .at(0.0, 0.0)
            .colored(ColorDef::rgba(1.0, 0.0, 0.0, 1.0)),
    ]);
    let frame = render(&mut c, &s, &overlay);
    // Center moved to (31, 21): the whole 60x40 box is visible.
    assert_eq!(frame.pixel(31, 21), [255, 0, 0, 255]);
}

#[test]
fn animated_background_follows_sine_cycle() {
    let fps = Fps::new(30, 1).unwrap();
    let c0 = animated_background_color(FrameIndex(0), fps);
    assert!((c0.r - 0.5).abs() < 1e-9);
    assert!((c0.g - (0.5 + 0.5 * 2f64.sin())).abs() < 1e-9);
    assert!((c0.b - (0.5 + 0.5 * 4f64.sin())).abs() < 1e-9);

    let (mut c, s) = bound();
    let pts = c
        .render_frame(FrameIndex(30), Background::Animated { fps }, &OverlaySpec::text(""))
        .unwrap();
    assert_eq!(pts, 1_000_000);
    let frame = s.acquire_next().unwrap().frame;
    let expect = animated_background_color(FrameIndex(30), fps).to_rgba8();
    let got = frame.pixel(10, 10);
    for ch in 0..3 {
        assert!(
            (i16::from(got[ch]) - i16::from(expect[ch])).abs() <= 1,
            "{got:?} vs {expect:?}"
        );
    }
}

#[test]
fn shape_paths_match_fixed_geometry() {
    let tri = shape_path(ShapeKind::Triangle, Point::new(100.0, 100.0));
    let bb = tri.bounding_box();
    assert_eq!((bb.x0, bb.y0, bb.x1, bb.y1), (75.0, 75.0, 125.0, 125.0));
    let rect = shape_path(ShapeKind::Rectangle, Point::new(100.0, 100.0)).bounding_box();
    assert_eq!((rect.width(), rect.height()), (60.0, 40.0));
}

#[test]
fn render_still_does_not_commit() {
    let (mut c, s) = bound();
    let bg = black_frame(0);
    let frame = c
        .render_still(FrameIndex(0), Background::Decoded(&bg), &OverlaySpec::text(""))
        .unwrap();
    assert_eq!(frame.canvas(), Canvas { width: W, height: H });
    assert_eq!(s.pending(), 0);
    c.release_surface();
    c.release_surface();
    assert!(!c.is_bound());
}
