use image::{Rgba, RgbaImage};
use rpedit::classifier::parse_chat_log;
use rpedit::compositor::{compose, scaled_layout, CompositeRequest, FrameOptions, LayerPlacement};
use rpedit::encoding::{pixmap_to_rgba, rgba_to_pixmap};
use rpedit::font_assets::Typeface;
use rpedit::raster::{allocate_pixmap, draw_layout};
use rpedit::schema::{PreviewSize, StyleConfig};
use tiny_skia::{Color, PixmapPaint, Transform};

fn base(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 97) as u8 + 60, (y % 89) as u8 + 60, 90, 255])
    })
}

fn frame_hash(text: &str, style: &StyleConfig, frame: FrameOptions) -> u64 {
    let image = base(240, 120);
    let typeface = Typeface::block(&style.font_family);
    let lines = parse_chat_log(text);
    let request = CompositeRequest {
        base: &image,
        preview: PreviewSize {
            width: 240.0,
            height: 120.0,
        },
        frame,
        style,
        typeface: &typeface,
        layers: vec![LayerPlacement {
            lines: &lines,
            x: 12.0,
            y: 8.0,
            wrap_width: 200.0,
        }],
    };
    let canvas = compose(&request).expect("compose");
    fnv1a64(canvas.data())
}

#[test]
fn identical_inputs_render_identically() {
    let style = StyleConfig::default();
    let text = "* John looks around.\nJane says: [#ff8800]orange[/#] and ||hidden|| /soft/";
    let frame = FrameOptions {
        letterbox: true,
        gradient: true,
        ..FrameOptions::default()
    };
    assert_eq!(frame_hash(text, &style, frame), frame_hash(text, &style, frame));
    assert_ne!(
        frame_hash(text, &style, frame),
        frame_hash("Jane says: something else", &style, frame)
    );
}

#[test]
fn background_mode_ignores_stroke_width() {
    let thin = StyleConfig {
        background: true,
        stroke_width: 0.0,
        ..StyleConfig::default()
    };
    let thick = StyleConfig {
        stroke_width: 12.0,
        ..thin.clone()
    };
    let text = "Jane says: boxed words";
    assert_eq!(
        frame_hash(text, &thin, FrameOptions::default()),
        frame_hash(text, &thick, FrameOptions::default())
    );
}

#[test]
fn stroke_width_matters_without_background() {
    let thin = StyleConfig {
        stroke_width: 1.0,
        ..StyleConfig::default()
    };
    let thick = StyleConfig {
        stroke_width: 6.0,
        ..StyleConfig::default()
    };
    let text = "Jane says: outlined";
    assert_ne!(
        frame_hash(text, &thin, FrameOptions::default()),
        frame_hash(text, &thick, FrameOptions::default())
    );
}

#[test]
fn redacted_words_leave_no_glyph_pixels() {
    let image = RgbaImage::from_pixel(200, 60, Rgba([128, 128, 128, 255]));
    let typeface = Typeface::block("Helvetica");
    let style = StyleConfig {
        stroke_width: 0.0,
        ..StyleConfig::default()
    };
    let lines = parse_chat_log("||classified||");
    let request = CompositeRequest {
        base: &image,
        preview: PreviewSize {
            width: 200.0,
            height: 60.0,
        },
        frame: FrameOptions::default(),
        style: &style,
        typeface: &typeface,
        layers: vec![LayerPlacement {
            lines: &lines,
            x: 10.0,
            y: 10.0,
            wrap_width: 180.0,
        }],
    };
    let rgba = pixmap_to_rgba(&compose(&request).expect("compose"));
    let bright = rgba.pixels().filter(|px| px[0] > 128).count();
    let black = rgba.pixels().filter(|px| px.0 == [0, 0, 0, 255]).count();
    assert_eq!(bright, 0);
    assert!(black > 0);
}

#[test]
fn export_at_double_resolution_matches_a_direct_2x_draw() {
    let image = base(400, 200);
    let typeface = Typeface::block("Helvetica");
    let style = StyleConfig::default();
    let lines = parse_chat_log("* John looks around the room slowly.\nJane says: ok");

    let request = CompositeRequest {
        base: &image,
        preview: PreviewSize {
            width: 200.0,
            height: 100.0,
        },
        frame: FrameOptions::default(),
        style: &style,
        typeface: &typeface,
        layers: vec![LayerPlacement {
            lines: &lines,
            x: 10.0,
            y: 15.0,
            wrap_width: 150.0,
        }],
    };
    let exported = compose(&request).expect("compose");

    let mut direct = allocate_pixmap(400, 200).expect("pixmap");
    direct.fill(Color::BLACK);
    let base_pixmap = rgba_to_pixmap(&image).expect("pixmap");
    direct.draw_pixmap(
        0,
        0,
        base_pixmap.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    let (layout, scaled) = scaled_layout(&lines, &typeface, &style, 150.0, 2.0);
    assert_eq!(scaled.font_size, 30.0);
    assert_eq!(layout.max_width, 300.0);
    draw_layout(&mut direct, &layout, &typeface, &scaled, 20.0, 30.0);

    assert_eq!(fnv1a64(exported.data()), fnv1a64(direct.data()));
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0001_0000_01b3);
    }
    hash
}
