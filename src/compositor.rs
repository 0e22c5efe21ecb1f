use anyhow::{Context, Result};
use image::RgbaImage;
use tiny_skia::{
    Color, GradientStop, LinearGradient, Paint, PixmapPaint, Point, Rect, SpreadMode, Transform,
};
use tracing::info;

use crate::adjust::apply_adjustments;
use crate::classifier::ChatLine;
use crate::encoding::{encode_image, pixmap_to_rgba, rgba_to_pixmap, EncodeOptions};
use crate::font_assets::Typeface;
use crate::layout::{layout_lines, TextLayout};
use crate::raster::{allocate_pixmap, draw_layout};
use crate::schema::{Adjustments, PreviewSize, StyleConfig};

/// Letterbox bar height as a fraction of the image height.
pub const LETTERBOX_RATIO: f32 = 0.10;
/// Vignette opacity at the bottom edge of the image.
pub const VIGNETTE_ALPHA: u8 = 204;

/// One text layer in preview coordinates.
#[derive(Debug, Clone, Copy)]
pub struct LayerPlacement<'a> {
    pub lines: &'a [ChatLine],
    pub x: f32,
    pub y: f32,
    pub wrap_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameOptions {
    pub adjustments: Adjustments,
    pub letterbox: bool,
    pub gradient: bool,
}

pub struct CompositeRequest<'a> {
    pub base: &'a RgbaImage,
    pub preview: PreviewSize,
    pub frame: FrameOptions,
    pub style: &'a StyleConfig,
    pub typeface: &'a Typeface,
    pub layers: Vec<LayerPlacement<'a>>,
}

pub fn letterbox_bar(image_height: u32) -> u32 {
    (image_height as f32 * LETTERBOX_RATIO).round() as u32
}

/// Natural-to-preview ratio applied to every text metric at export.
pub fn export_scale(natural_width: u32, preview: PreviewSize) -> f32 {
    if preview.width > 0.0 && preview.width.is_finite() {
        natural_width as f32 / preview.width
    } else {
        1.0
    }
}

/// Re-runs layout at `scale`: font size, line height, stroke width and wrap
/// width are multiplied, nothing is stretched.
pub fn scaled_layout(
    lines: &[ChatLine],
    typeface: &Typeface,
    style: &StyleConfig,
    wrap_width: f32,
    scale: f32,
) -> (TextLayout, StyleConfig) {
    let scaled = style.scaled(scale);
    let layout = layout_lines(lines, typeface, &scaled, wrap_width * scale);
    (layout, scaled)
}

/// Flattens base image, bars, vignette and text into one opaque surface.
pub fn compose(request: &CompositeRequest<'_>) -> Result<tiny_skia::Pixmap> {
    let (width, height) = request.base.dimensions();
    let bar = if request.frame.letterbox {
        letterbox_bar(height)
    } else {
        0
    };
    let canvas_height = height + bar * 2;
    let mut canvas = allocate_pixmap(width, canvas_height)?;
    canvas.fill(Color::BLACK);

    let adjusted = apply_adjustments(request.base, request.frame.adjustments);
    let base = rgba_to_pixmap(&adjusted).context("prepare base image")?;
    canvas.draw_pixmap(
        0,
        bar as i32,
        base.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );

    if request.frame.gradient {
        paint_vignette(&mut canvas, width, height, bar);
    }

    let scale_x = export_scale(width, request.preview);
    let scale_y = if request.preview.height > 0.0 && request.preview.height.is_finite() {
        height as f32 / request.preview.height
    } else {
        scale_x
    };
    for layer in &request.layers {
        let (layout, scaled_style) = scaled_layout(
            layer.lines,
            request.typeface,
            request.style,
            layer.wrap_width,
            scale_x,
        );
        draw_layout(
            &mut canvas,
            &layout,
            request.typeface,
            &scaled_style,
            layer.x * scale_x,
            layer.y * scale_y + bar as f32,
        );
    }
    Ok(canvas)
}

fn paint_vignette(canvas: &mut tiny_skia::Pixmap, width: u32, height: u32, bar: u32) {
    let bottom = (height + bar) as f32;
    let shader = LinearGradient::new(
        Point::from_xy(0.0, bottom),
        Point::from_xy(0.0, bottom * 0.5),
        vec![
            GradientStop::new(0.0, Color::from_rgba8(0, 0, 0, VIGNETTE_ALPHA)),
            GradientStop::new(1.0, Color::from_rgba8(0, 0, 0, 0)),
        ],
        SpreadMode::Pad,
        Transform::identity(),
    );
    let (Some(shader), Some(area)) = (
        shader,
        Rect::from_xywh(0.0, bar as f32, width as f32, height as f32),
    ) else {
        return;
    };
    let paint = Paint {
        shader,
        anti_alias: false,
        ..Paint::default()
    };
    canvas.fill_rect(area, &paint, Transform::identity(), None);
}

/// Composes and encodes in the requested format.
pub fn export(request: &CompositeRequest<'_>, options: EncodeOptions) -> Result<Vec<u8>> {
    let canvas = compose(request)?;
    let bytes = encode_image(&pixmap_to_rgba(&canvas), options)?;
    info!(
        width = canvas.width(),
        height = canvas.height(),
        format = options.format.keyword(),
        bytes = bytes.len(),
        layers = request.layers.len(),
        "exported image"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::classifier::parse_chat_log;

    fn grey(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
    }

    fn request<'a>(
        base: &'a RgbaImage,
        style: &'a StyleConfig,
        typeface: &'a Typeface,
        frame: FrameOptions,
    ) -> CompositeRequest<'a> {
        CompositeRequest {
            base,
            preview: PreviewSize {
                width: base.width() as f32,
                height: base.height() as f32,
            },
            frame,
            style,
            typeface,
            layers: Vec::new(),
        }
    }

    #[test]
    fn letterbox_adds_rounded_bars() {
        assert_eq!(letterbox_bar(600), 60);
        assert_eq!(letterbox_bar(105), 11);
        let base = grey(40, 100);
        let style = StyleConfig::default();
        let typeface = Typeface::block("Helvetica");
        let frame = FrameOptions {
            letterbox: true,
            ..FrameOptions::default()
        };
        let canvas = compose(&request(&base, &style, &typeface, frame)).expect("compose");
        assert_eq!((canvas.width(), canvas.height()), (40, 120));
        let top = canvas.pixel(20, 5).expect("pixel");
        assert_eq!((top.red(), top.alpha()), (0, 255));
        let middle = canvas.pixel(20, 60).expect("pixel");
        assert_eq!(middle.red(), 128);
    }

    #[test]
    fn vignette_darkens_bottom_only() {
        let base = grey(10, 100);
        let style = StyleConfig::default();
        let typeface = Typeface::block("Helvetica");
        let frame = FrameOptions {
            gradient: true,
            ..FrameOptions::default()
        };
        let canvas = compose(&request(&base, &style, &typeface, frame)).expect("compose");
        assert_eq!(canvas.pixel(5, 10).expect("pixel").red(), 128);
        let bottom = canvas.pixel(5, 99).expect("pixel").red();
        assert!(bottom < 40, "bottom row should be dark, got {bottom}");
    }

    #[test]
    fn adjustments_affect_base_but_not_text() {
        let base = grey(200, 60);
        let style = StyleConfig {
            stroke_width: 0.0,
            ..StyleConfig::default()
        };
        let typeface = Typeface::block("Helvetica");
        let lines = parse_chat_log("Jane says: hello");
        let mut req = request(
            &base,
            &style,
            &typeface,
            FrameOptions {
                adjustments: Adjustments {
                    brightness: 0.0,
                    ..Adjustments::default()
                },
                ..FrameOptions::default()
            },
        );
        req.layers.push(LayerPlacement {
            lines: &lines,
            x: 10.0,
            y: 10.0,
            wrap_width: 180.0,
        });
        let canvas = compose(&req).expect("compose");
        assert_eq!(canvas.pixel(199, 59).expect("pixel").red(), 0);
        let white_text = canvas
            .pixels()
            .iter()
            .filter(|px| px.red() == 255 && px.alpha() == 255)
            .count();
        assert!(white_text > 0);
    }

    #[test]
    fn export_scale_doubles_every_metric() {
        let typeface = Typeface::block("Helvetica");
        let style = StyleConfig::default();
        let lines = parse_chat_log("* a long emote line that will wrap a few times over\nJane says: ok");
        let (preview, _) = scaled_layout(&lines, &typeface, &style, 120.0, 1.0);
        let (export, scaled_style) = scaled_layout(&lines, &typeface, &style, 120.0, 2.0);

        assert_eq!(scaled_style.stroke_width, style.stroke_width * 2.0);
        assert_eq!(export.line_height, preview.line_height * 2.0);
        assert_eq!(export.lines.len(), preview.lines.len());
        for (small, big) in preview.lines.iter().zip(&export.lines) {
            assert!((big.y - small.y * 2.0).abs() < 1e-3);
            assert_eq!(big.tokens.len(), small.tokens.len());
            for (a, b) in small.tokens.iter().zip(&big.tokens) {
                assert!((b.x - a.x * 2.0).abs() < 1e-3);
                assert!((b.token.width - a.token.width * 2.0).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn export_encodes_requested_format() {
        let base = grey(16, 16);
        let style = StyleConfig::default();
        let typeface = Typeface::block("Helvetica");
        let bytes = export(
            &request(&base, &style, &typeface, FrameOptions::default()),
            EncodeOptions::new(crate::schema::ExportFormat::Png),
        )
        .expect("export");
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
