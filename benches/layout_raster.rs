//! Layout and export benchmarks on the block face.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgba, RgbaImage};
use rpedit::classifier::parse_chat_log;
use rpedit::compositor::{compose, CompositeRequest, FrameOptions, LayerPlacement};
use rpedit::font_assets::Typeface;
use rpedit::layout::layout_lines;
use rpedit::raster::{render_layer_bitmap, LAYER_PADDING};
use rpedit::schema::{PreviewSize, StyleConfig};

const TRANSCRIPT: &str = "\
* John Smith looks around the room, checking every corner before he speaks.
John Smith says: We need to [#ff8800]move[/#] before the *patrol* comes back.
Jane Doe says (low): ||the code is 4471||, don't forget it.
(( brb, phone ))
Jane Doe shouts: GO GO GO!";

fn bench_layout(c: &mut Criterion) {
    let typeface = Typeface::block("Helvetica");
    let style = StyleConfig::default();
    let lines = parse_chat_log(&TRANSCRIPT.repeat(8));

    let mut group = c.benchmark_group("layout_raster");
    group.bench_function("layout_40_lines", |b| {
        b.iter(|| black_box(layout_lines(&lines, &typeface, &style, 600.0)));
    });

    let layout = layout_lines(&lines, &typeface, &style, 600.0);
    group.bench_function("layer_bitmap_40_lines", |b| {
        b.iter(|| {
            black_box(
                render_layer_bitmap(&layout, &typeface, &style, LAYER_PADDING).expect("bitmap"),
            )
        });
    });
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let base = RgbaImage::from_pixel(1920, 1080, Rgba([40, 44, 52, 255]));
    let typeface = Typeface::block("Helvetica");
    let style = StyleConfig::default();
    let lines = parse_chat_log(TRANSCRIPT);

    let mut group = c.benchmark_group("export");
    group.sample_size(20);
    group.bench_function("compose_1080p_2x", |b| {
        b.iter(|| {
            let request = CompositeRequest {
                base: &base,
                preview: PreviewSize {
                    width: 960.0,
                    height: 540.0,
                },
                frame: FrameOptions {
                    letterbox: true,
                    gradient: true,
                    ..FrameOptions::default()
                },
                style: &style,
                typeface: &typeface,
                layers: vec![LayerPlacement {
                    lines: &lines,
                    x: 20.0,
                    y: 20.0,
                    wrap_width: 600.0,
                }],
            };
            black_box(compose(&request).expect("compose"))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_layout, bench_export);
criterion_main!(benches);
