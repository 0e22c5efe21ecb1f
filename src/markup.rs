use std::sync::OnceLock;

use regex::Regex;

use crate::schema::{ColorRgba, PresetColor};

/// Style of one markup run. Forms never nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStyle {
    Plain,
    /// `[#RRGGBB]text[/#]`
    Color(ColorRgba),
    /// `||text||`
    Redacted,
    /// `*text*`, delimiters stay visible.
    Emphasis,
    /// `/text/`
    Italic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
}

/// A word or a whitespace span with its resolved paint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledToken {
    pub text: String,
    pub fill: ColorRgba,
    pub italic: bool,
    pub redacted: bool,
}

impl StyledToken {
    pub fn is_whitespace(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn markup_regex() -> &'static Regex {
    static MARKUP_RE: OnceLock<Regex> = OnceLock::new();
    MARKUP_RE.get_or_init(|| {
        Regex::new(r"\[#([0-9a-fA-F]{6})\](.*?)\[/#\]|\|\|(.*?)\|\||\*.*?\*|/(.*?)/")
            .expect("markup regex should compile")
    })
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex should compile"))
}

/// Leftmost, shortest-match scan of a line into runs. Empty runs are dropped;
/// unterminated delimiters stay in plain runs.
pub fn parse_runs(line: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut cursor = 0;
    for caps in markup_regex().captures_iter(line) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_run(&mut runs, &line[cursor..whole.start()], RunStyle::Plain);
        cursor = whole.end();

        if let (Some(hex), Some(body)) = (caps.get(1), caps.get(2)) {
            let color = ColorRgba::from_hex(&format!("#{}", hex.as_str()))
                .unwrap_or(ColorRgba::WHITE);
            push_run(&mut runs, body.as_str(), RunStyle::Color(color));
        } else if let Some(body) = caps.get(3) {
            push_run(&mut runs, body.as_str(), RunStyle::Redacted);
        } else if let Some(body) = caps.get(4) {
            push_run(&mut runs, body.as_str(), RunStyle::Italic);
        } else {
            push_run(&mut runs, whole.as_str(), RunStyle::Emphasis);
        }
    }
    push_run(&mut runs, &line[cursor..], RunStyle::Plain);
    runs
}

fn push_run(runs: &mut Vec<Run>, text: &str, style: RunStyle) {
    if !text.is_empty() {
        runs.push(Run {
            text: text.to_owned(),
            style,
        });
    }
}

/// Splits `text` into words and whitespace spans, keeping both.
pub fn split_words(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for space in whitespace_regex().find_iter(text) {
        if space.start() > cursor {
            pieces.push(&text[cursor..space.start()]);
        }
        pieces.push(space.as_str());
        cursor = space.end();
    }
    if cursor < text.len() {
        pieces.push(&text[cursor..]);
    }
    pieces
}

/// Runs then words: the full token stream for one display line.
pub fn tokenize(line: &str, base_color: ColorRgba) -> Vec<StyledToken> {
    let mut tokens = Vec::new();
    for run in parse_runs(line) {
        let (fill, italic, redacted) = match run.style {
            RunStyle::Plain => (base_color, false, false),
            RunStyle::Color(color) => (color, false, false),
            RunStyle::Redacted => (base_color, false, true),
            RunStyle::Emphasis => (PresetColor::Me.color(), false, false),
            RunStyle::Italic => (base_color, true, false),
        };
        tokens.extend(split_words(&run.text).into_iter().map(|word| StyledToken {
            text: word.to_owned(),
            fill,
            italic,
            redacted,
        }));
    }
    tokens
}
