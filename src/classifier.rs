use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{ColorRgba, PresetColor};

/// Which rule colored a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCategory {
    Emote,
    Action,
    Ooc,
    Say,
    Shout,
    LowVoice,
    Radio,
    Phone,
    Plain,
}

impl LineCategory {
    pub fn preset(self) -> PresetColor {
        match self {
            Self::Emote | Self::Action => PresetColor::Me,
            Self::Ooc => PresetColor::Ooc,
            Self::Shout => PresetColor::Shout,
            Self::Radio => PresetColor::Radio,
            Self::Phone => PresetColor::Phone,
            Self::Say | Self::LowVoice | Self::Plain => PresetColor::Chat,
        }
    }
}

/// One display line of a text layer. Never mutated; re-parsing replaces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatLine {
    pub id: String,
    pub text: String,
    pub color: ColorRgba,
    pub category: LineCategory,
}

/// Colors a single timestamp-free line. Pure: the same input always yields
/// the same text and color.
pub fn classify_line(content: &str) -> (String, ColorRgba, LineCategory) {
    let (text, category) = classify(content);
    (text, category.preset().color(), category)
}

fn classify(content: &str) -> (String, LineCategory) {
    if content.starts_with('*') {
        return (highlight_quotes(content), LineCategory::Emote);
    }
    if content.starts_with('>') {
        return (content.to_owned(), LineCategory::Action);
    }

    let category = if content.starts_with("((") || content.contains("(( ") {
        LineCategory::Ooc
    } else if content.contains("says:") {
        LineCategory::Say
    } else if content.contains("shouts:") {
        LineCategory::Shout
    } else if low_voice_regex().is_match(content) {
        LineCategory::LowVoice
    } else if is_radio(content) {
        LineCategory::Radio
    } else if is_phone(content) {
        LineCategory::Phone
    } else {
        LineCategory::Plain
    };
    (content.to_owned(), category)
}

/// Splits a transcript into colored lines. Blank lines are skipped and a
/// leading `[HH:MM:SS]` stamp is removed before classification.
pub fn parse_chat_log(text: &str) -> Vec<ChatLine> {
    let batch = Uuid::new_v4().simple().to_string();
    text.split('\n')
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .filter_map(|(index, line)| {
            let content = strip_timestamp(line).trim();
            if content.is_empty() {
                return None;
            }
            let (text, color, category) = classify_line(content);
            Some(ChatLine {
                id: format!("line-{index}-{}", &batch[..12]),
                text,
                color,
                category,
            })
        })
        .collect()
}

pub fn strip_timestamp(line: &str) -> &str {
    static TIMESTAMP_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIMESTAMP_RE.get_or_init(|| {
        Regex::new(r"^\[\d{2}:\d{2}:\d{2}\]\s*").expect("timestamp regex should compile")
    });
    match re.find(line) {
        Some(stamp) => &line[stamp.end()..],
        None => line,
    }
}

fn highlight_quotes(content: &str) -> String {
    static QUOTE_RE: OnceLock<Regex> = OnceLock::new();
    let re = QUOTE_RE
        .get_or_init(|| Regex::new(r#""([^"]+)""#).expect("quote regex should compile"));
    let replacement = format!("[{}]\"${{1}}\"[/#]", PresetColor::Chat.color().to_hex());
    re.replace_all(content, replacement.as_str()).into_owned()
}

fn low_voice_regex() -> &'static Regex {
    static LOW_VOICE_RE: OnceLock<Regex> = OnceLock::new();
    LOW_VOICE_RE.get_or_init(|| {
        Regex::new(r"(?i)fısıldar:|kısık sesle|algak ses|sessizce|seslenir")
            .expect("low voice regex should compile")
    })
}

fn is_radio(content: &str) -> bool {
    let lower = content.to_lowercase();
    lower.contains("(radio)") || lower.contains("[radio]") || content.starts_with("(Telsiz)")
}

fn is_phone(content: &str) -> bool {
    let lower = content.to_lowercase();
    lower.contains("(cellphone)") || lower.contains("(telefon)") || lower.contains("phone")
}
