use serde::Serialize;
use tracing::debug;

use crate::classifier::ChatLine;
use crate::font_assets::{FaceRef, FontSpec, Typeface};
use crate::markup::{tokenize, StyledToken};
use crate::schema::{ColorRgba, StyleConfig};

/// Narrowest wrap width accepted; smaller or non-finite widths clamp here.
pub const MIN_WRAP_WIDTH: f32 = 16.0;
pub const MIN_LINE_HEIGHT: f32 = 1.0;

/// A measured word or whitespace span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordToken {
    pub text: String,
    pub width: f32,
    pub fill: ColorRgba,
    #[serde(serialize_with = "serialize_font")]
    pub font: FontSpec,
    pub stroke: bool,
    pub redacted: bool,
}

impl WordToken {
    pub fn is_whitespace(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn serialize_font<S: serde::Serializer>(font: &FontSpec, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(font)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedToken {
    /// Offset from the layout's left edge.
    pub x: f32,
    #[serde(flatten)]
    pub token: WordToken,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutLine {
    /// Top of the line box.
    pub y: f32,
    pub width: f32,
    pub tokens: Vec<PositionedToken>,
}

/// Flushed lines of one layer plus the total vertical extent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextLayout {
    pub max_width: f32,
    pub line_height: f32,
    pub lines: Vec<LayoutLine>,
    /// Widest flushed line.
    pub width: f32,
    /// The y just below the last line.
    pub height: f32,
}

impl TextLayout {
    fn empty(max_width: f32, line_height: f32) -> Self {
        Self {
            max_width,
            line_height,
            lines: Vec::new(),
            width: 0.0,
            height: 0.0,
        }
    }
}

pub fn clamp_wrap_width(max_width: f32) -> f32 {
    if max_width.is_finite() {
        max_width.max(MIN_WRAP_WIDTH)
    } else {
        MIN_WRAP_WIDTH
    }
}

pub fn clamp_line_height(line_height: f32) -> f32 {
    if line_height.is_finite() {
        line_height.max(MIN_LINE_HEIGHT)
    } else {
        MIN_LINE_HEIGHT
    }
}

/// Font every token of a given style is drawn with.
pub fn font_for(style: &StyleConfig, italic: bool) -> FontSpec {
    FontSpec {
        family: style.font_family.clone(),
        size_px: style.font_size,
        bold: style.bold,
        italic,
    }
}

/// Measures styled tokens with the exact face the rasterizer will use.
pub fn measure_tokens(
    tokens: Vec<StyledToken>,
    typeface: &Typeface,
    style: &StyleConfig,
) -> Vec<WordToken> {
    let upright = typeface.resolve(style.bold, false);
    let slanted = typeface.resolve(style.bold, true);
    tokens
        .into_iter()
        .map(|token| {
            let face = if token.italic { &slanted } else { &upright };
            let width = face.measure(&token.text, style.font_size);
            WordToken {
                width,
                fill: token.fill,
                font: font_for(style, token.italic),
                stroke: style.stroke_enabled() && !token.redacted,
                redacted: token.redacted,
                text: token.text,
            }
        })
        .collect()
}

/// Greedy line breaking. A token that does not fit starts a new line unless
/// the current line is empty; tokens are never split.
pub fn wrap_tokens(words: Vec<WordToken>, max_width: f32, line_height: f32, top: f32) -> Vec<LayoutLine> {
    let max_width = clamp_wrap_width(max_width);
    let line_height = clamp_line_height(line_height);

    let mut lines = Vec::new();
    let mut current = LayoutLine {
        y: top,
        width: 0.0,
        tokens: Vec::new(),
    };
    for word in words {
        if current.width + word.width > max_width && !current.tokens.is_empty() {
            let next_y = current.y + line_height;
            lines.push(std::mem::replace(
                &mut current,
                LayoutLine {
                    y: next_y,
                    width: 0.0,
                    tokens: Vec::new(),
                },
            ));
        }
        current.tokens.push(PositionedToken {
            x: current.width,
            token: word,
        });
        current.width += current.tokens.last().map_or(0.0, |last| last.token.width);
    }
    if !current.tokens.is_empty() {
        lines.push(current);
    }
    lines
}

/// Lays out one display line starting at `top`.
pub fn layout_text(
    text: &str,
    base_color: ColorRgba,
    typeface: &Typeface,
    style: &StyleConfig,
    max_width: f32,
    top: f32,
) -> Vec<LayoutLine> {
    let words = measure_tokens(tokenize(text, base_color), typeface, style);
    wrap_tokens(words, max_width, style.line_height, top)
}

/// Stacks every chat line of a layer; each starts one line height below the
/// previous line's last row.
pub fn layout_lines(
    lines: &[ChatLine],
    typeface: &Typeface,
    style: &StyleConfig,
    max_width: f32,
) -> TextLayout {
    let max_width = clamp_wrap_width(max_width);
    let line_height = clamp_line_height(style.line_height);
    let mut layout = TextLayout::empty(max_width, line_height);

    let mut top = 0.0;
    for line in lines {
        let rows = layout_text(&line.text, line.color, typeface, style, max_width, top);
        if let Some(last) = rows.last() {
            top = last.y + line_height;
        }
        layout.lines.extend(rows);
    }
    layout.width = layout
        .lines
        .iter()
        .map(|line| line.width)
        .fold(0.0, f32::max);
    layout.height = top;

    debug!(
        chat_lines = lines.len(),
        rows = layout.lines.len(),
        width = layout.width,
        height = layout.height,
        "laid out text layer"
    );
    layout
}

/// Face for a positioned token; shared by layout and raster.
pub fn face_for(typeface: &Typeface, font: &FontSpec) -> FaceRef {
    typeface.resolve(font.bold, font.italic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::parse_chat_log;

    fn style(size: f32) -> StyleConfig {
        StyleConfig {
            font_size: size,
            line_height: size + 2.0,
            ..StyleConfig::default()
        }
    }

    fn word(text: &str, width: f32) -> WordToken {
        WordToken {
            text: text.to_owned(),
            width,
            fill: ColorRgba::WHITE,
            font: font_for(&StyleConfig::default(), false),
            stroke: true,
            redacted: false,
        }
    }

    #[test]
    fn greedy_wrap_breaks_before_overflow() {
        let words = vec![word("aa", 10.0), word(" ", 3.0), word("bb", 10.0), word(" ", 3.0), word("cc", 10.0)];
        let lines = wrap_tokens(words, 25.0, 18.0, 0.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].width, 23.0);
        assert_eq!(lines[1].y, 18.0);
        assert_eq!(lines[1].tokens[0].x, 0.0);
        assert_eq!(lines[1].tokens[1].token.text, "cc");
    }

    #[test]
    fn oversized_token_sits_alone() {
        let words = vec![word("a", 5.0), word("huge", 100.0), word("b", 5.0)];
        let lines = wrap_tokens(words, 20.0, 10.0, 0.0);
        let texts: Vec<Vec<&str>> = lines
            .iter()
            .map(|line| line.tokens.iter().map(|t| t.token.text.as_str()).collect())
            .collect();
        assert_eq!(texts, vec![vec!["a"], vec!["huge"], vec!["b"]]);
    }

    #[test]
    fn bad_widths_are_clamped() {
        assert_eq!(clamp_wrap_width(f32::NAN), MIN_WRAP_WIDTH);
        assert_eq!(clamp_wrap_width(-5.0), MIN_WRAP_WIDTH);
        assert_eq!(clamp_wrap_width(300.0), 300.0);
        assert_eq!(clamp_line_height(0.0), MIN_LINE_HEIGHT);
        let lines = wrap_tokens(vec![word("x", 4.0), word("y", 4.0)], f32::INFINITY, 0.0, 0.0);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn no_line_exceeds_width_when_tokens_fit() {
        let typeface = Typeface::block("Helvetica");
        let lines = parse_chat_log("Jane says: the quick brown fox jumps over the lazy dog again and again");
        let layout = layout_lines(&lines, &typeface, &style(10.0), 60.0);
        assert!(layout.lines.len() > 1);
        for line in &layout.lines {
            assert!(line.width <= 60.0 + 1e-3, "line too wide: {}", line.width);
        }
    }

    #[test]
    fn chat_lines_stack_on_line_height_boundaries() {
        let typeface = Typeface::block("Helvetica");
        let lines = parse_chat_log("* one\n* two");
        let layout = layout_lines(&lines, &typeface, &style(10.0), 500.0);
        assert_eq!(layout.lines.len(), 2);
        assert_eq!(layout.lines[1].y, 12.0);
        assert_eq!(layout.height, 24.0);
    }

    #[test]
    fn redacted_tokens_never_stroke() {
        let typeface = Typeface::block("Helvetica");
        let rows = layout_text("a ||b||", ColorRgba::WHITE, &typeface, &style(10.0), 500.0, 0.0);
        let tokens = &rows[0].tokens;
        assert!(tokens[0].token.stroke);
        assert!(tokens[2].token.redacted);
        assert!(!tokens[2].token.stroke);
    }

    #[test]
    fn background_mode_disables_stroke_flags() {
        let typeface = Typeface::block("Helvetica");
        let mut style = style(10.0);
        style.background = true;
        let rows = layout_text("plain words", ColorRgba::WHITE, &typeface, &style, 500.0, 0.0);
        assert!(rows[0].tokens.iter().all(|t| !t.token.stroke));
    }

    #[test]
    fn empty_layer_has_zero_extent() {
        let layout = layout_lines(&[], &Typeface::block("x"), &style(10.0), 100.0);
        assert!(layout.lines.is_empty());
        assert_eq!(layout.height, 0.0);
    }
}
