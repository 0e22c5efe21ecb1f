use anyhow::{anyhow, Result};
use tiny_skia::{Color, FillRule, LineJoin, Paint, Pixmap, Rect, Stroke, Transform};

use crate::error_codes::{CodedError, SURFACE_UNAVAILABLE};
use crate::font_assets::Typeface;
use crate::layout::{face_for, LayoutLine, TextLayout};
use crate::schema::StyleConfig;

/// Transparent margin around cached layer bitmaps so strokes are never cut.
pub const LAYER_PADDING: f32 = 50.0;
pub const STROKE_MITER_LIMIT: f32 = 2.0;

fn solid_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color);
    paint.anti_alias = true;
    paint
}

/// Paints one flushed line in three passes: background boxes, outline
/// strokes, then fills. `(x, y)` is the top-left of the layout.
pub fn draw_line(
    pixmap: &mut Pixmap,
    line: &LayoutLine,
    typeface: &Typeface,
    style: &StyleConfig,
    line_height: f32,
    x: f32,
    y: f32,
) {
    let top = y + line.y;
    let black = solid_paint(Color::BLACK);

    for placed in &line.tokens {
        let token = &placed.token;
        if !(style.background || token.redacted) {
            continue;
        }
        if let Some(rect) = Rect::from_xywh(x + placed.x, top, token.width, line_height) {
            pixmap.fill_rect(rect, &black, Transform::identity(), None);
        }
    }

    let outline = Stroke {
        width: style.stroke_width * 2.0,
        miter_limit: STROKE_MITER_LIMIT,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    for placed in &line.tokens {
        let token = &placed.token;
        if !token.stroke || token.redacted || token.is_whitespace() || style.background {
            continue;
        }
        let face = face_for(typeface, &token.font);
        let baseline = top + face.ascent(token.font.size_px);
        if let Some(path) = face.text_path(&token.text, x + placed.x, baseline, token.font.size_px)
        {
            pixmap.stroke_path(&path, &black, &outline, Transform::identity(), None);
        }
    }

    for placed in &line.tokens {
        let token = &placed.token;
        if token.redacted || token.is_whitespace() {
            continue;
        }
        let face = face_for(typeface, &token.font);
        let size = token.font.size_px;
        let baseline = top + face.ascent(size);
        let Some(path) = face.text_path(&token.text, x + placed.x, baseline, size) else {
            continue;
        };
        let paint = solid_paint(token.fill.to_skia());
        pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);

        let embolden = face.embolden_width(size);
        if embolden > 0.0 {
            let thicken = Stroke {
                width: embolden,
                line_join: LineJoin::Round,
                ..Stroke::default()
            };
            pixmap.stroke_path(&path, &paint, &thicken, Transform::identity(), None);
        }
    }
}

/// Draws a whole layout with its top-left at `(x, y)`; returns the y just
/// below the last line.
pub fn draw_layout(
    pixmap: &mut Pixmap,
    layout: &TextLayout,
    typeface: &Typeface,
    style: &StyleConfig,
    x: f32,
    y: f32,
) -> f32 {
    for line in &layout.lines {
        draw_line(pixmap, line, typeface, style, layout.line_height, x, y);
    }
    y + layout.height
}

pub fn allocate_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width, height).ok_or_else(|| {
        anyhow!(CodedError::resource(
            SURFACE_UNAVAILABLE,
            format!("cannot allocate a {width}x{height} drawing surface"),
        ))
    })
}

/// Renders a layout onto a transparent bitmap sized to the wrap width (or the
/// widest line, when an oversized word overflows it) plus padding on every
/// side.
pub fn render_layer_bitmap(
    layout: &TextLayout,
    typeface: &Typeface,
    style: &StyleConfig,
    padding: f32,
) -> Result<Pixmap> {
    let content_width = layout.width.max(layout.max_width);
    let width = (content_width + padding * 2.0).ceil().max(1.0) as u32;
    let height = (layout.height + padding * 2.0).ceil().max(1.0) as u32;
    let mut pixmap = allocate_pixmap(width, height)?;
    draw_layout(&mut pixmap, layout, typeface, style, padding, padding);
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::parse_chat_log;
    use crate::layout::layout_lines;

    fn style() -> StyleConfig {
        StyleConfig {
            font_size: 20.0,
            line_height: 24.0,
            stroke_width: 4.0,
            ..StyleConfig::default()
        }
    }

    fn render(text: &str, style: &StyleConfig) -> Pixmap {
        let typeface = Typeface::block("Helvetica");
        let layout = layout_lines(&parse_chat_log(text), &typeface, style, 400.0);
        render_layer_bitmap(&layout, &typeface, style, 10.0).expect("bitmap should allocate")
    }

    fn count(pixmap: &Pixmap, predicate: impl Fn(tiny_skia::PremultipliedColorU8) -> bool) -> usize {
        pixmap.pixels().iter().filter(|px| predicate(**px)).count()
    }

    #[test]
    fn redacted_text_paints_only_its_box() {
        let mut style = style();
        style.stroke_width = 0.0;
        let pixmap = render("||secret||", &style);
        assert_eq!(count(&pixmap, |px| px.red() > 0), 0);
        let opaque_black = count(&pixmap, |px| px.alpha() == 255 && px.red() == 0);
        let expected = (6.0 * 0.55 * 20.0 * 24.0) as usize;
        assert!(opaque_black + 60 >= expected, "box too small: {opaque_black}");
    }

    #[test]
    fn fill_uses_token_color() {
        let pixmap = render("Jane says: hi", &style());
        assert!(count(&pixmap, |px| px.alpha() == 255 && px.red() == 255) > 0);
    }

    #[test]
    fn stroke_extends_beyond_glyphs_and_background_mode_suppresses_it() {
        let stroked = render("word", &style());
        let mut boxed_style = style();
        boxed_style.background = true;
        let boxed = render("word", &boxed_style);

        // Line box starts at y = padding; only the stroke can reach above it.
        let above_line = |pixmap: &Pixmap| {
            (0..10u32)
                .flat_map(|y| (0..pixmap.width()).map(move |x| (x, y)))
                .filter(|(x, y)| pixmap.pixel(*x, *y).is_some_and(|px| px.alpha() > 0))
                .count()
        };
        assert!(above_line(&stroked) > 0);
        assert_eq!(above_line(&boxed), 0);
    }

    #[test]
    fn oversized_word_is_not_clipped_by_the_bitmap() {
        let typeface = Typeface::block("Helvetica");
        let style = StyleConfig {
            stroke_width: 0.0,
            ..StyleConfig::default()
        };
        let word = "x".repeat(60);
        let layout = layout_lines(&parse_chat_log(&word), &typeface, &style, 100.0);
        assert_eq!(layout.lines.len(), 1);
        assert!(layout.width > 100.0 + LAYER_PADDING);

        let pixmap =
            render_layer_bitmap(&layout, &typeface, &style, LAYER_PADDING).expect("bitmap");
        let needed = (layout.width + LAYER_PADDING * 2.0).ceil() as u32;
        assert_eq!(pixmap.width(), needed);

        // Last glyph column still carries fill.
        let last_column = (LAYER_PADDING + layout.width - 1.0) as u32;
        let painted = (0..pixmap.height())
            .filter(|y| pixmap.pixel(last_column - 2, *y).is_some_and(|px| px.alpha() > 0))
            .count();
        assert!(painted > 0, "right edge of the word was clipped");
    }

    #[test]
    fn draw_layout_returns_bottom_edge() {
        let typeface = Typeface::block("Helvetica");
        let style = style();
        let layout = layout_lines(&parse_chat_log("a\nb\nc"), &typeface, &style, 200.0);
        let mut pixmap = allocate_pixmap(200, 200).expect("pixmap");
        let bottom = draw_layout(&mut pixmap, &layout, &typeface, &style, 0.0, 5.0);
        assert_eq!(bottom, 5.0 + 72.0);
    }

    #[test]
    fn zero_sized_surface_is_a_resource_error() {
        let error = allocate_pixmap(0, 10).unwrap_err();
        let coded = crate::error_codes::find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, SURFACE_UNAVAILABLE);
    }
}
