use rpedit::classifier::{classify_line, parse_chat_log, LineCategory};
use rpedit::cleaner::{clean_chat_log, Cleaner, CleanerRules};
use rpedit::font_assets::Typeface;
use rpedit::layout::{layout_lines, layout_text};
use rpedit::markup::tokenize;
use rpedit::schema::{PresetColor, StyleConfig};

fn style(font_size: f32) -> StyleConfig {
    StyleConfig {
        font_size,
        line_height: font_size + 4.0,
        ..StyleConfig::default()
    }
}

#[test]
fn cleaner_keeps_story_lines_and_drops_noise() {
    let raw = "\
Jane Doe: Hello there
[BİLGİ] Oyuncu ID 12
> Jane Doe nods.
> Jane Doe nods.
Welcome to GTA World.
(( brb ))";
    let cleaned = clean_chat_log(raw).expect("builtin rules");
    assert_eq!(cleaned, "Jane Doe: Hello there\n> Jane Doe nods.");
}

#[test]
fn glued_names_are_repaired() {
    let raw = "Jane Doe says: hi\n> Jane Doewaves at the crowd.";
    let cleaned = clean_chat_log(raw).expect("builtin rules");
    assert!(
        cleaned.lines().any(|line| line == "> Jane Doe waves at the crowd."),
        "{cleaned}"
    );
}

#[test]
fn custom_rule_file_changes_what_is_dropped() {
    let rules = CleanerRules::from_yaml(
        r#"
system_substrings:
  - "SECRET"
speech_verbs:
  - "mumbles"
"#,
    )
    .expect("rules");
    let cleaner = Cleaner::new(rules).expect("cleaner");
    let raw = "John Smith mumbles something\nJohn Smith: the SECRET code\n[ooc] hi";
    assert_eq!(
        cleaner.discover_names(raw),
        vec!["John Smith".to_owned()]
    );
    assert_eq!(cleaner.clean(raw), "John Smith mumbles something");
}

#[test]
fn documented_lines_get_their_palette_colors() {
    let cases = [
        ("* John looks around.", PresetColor::Me),
        ("(( just OOC talk ))", PresetColor::Ooc),
        ("Jane shouts: Look out!", PresetColor::Shout),
        ("(Telsiz) Unit 2: Copy.", PresetColor::Radio),
        ("Jane Doe (cellphone): hello?", PresetColor::Phone),
    ];
    for (line, expected) in cases {
        let (_, color, _) = classify_line(line);
        assert_eq!(color, expected.color(), "{line}");
    }
}

#[test]
fn classification_is_pure() {
    let line = "* Jane says \"hello\" quietly";
    assert_eq!(classify_line(line), classify_line(line));
    let (text, _, category) = classify_line(line);
    assert_eq!(category, LineCategory::Emote);
    assert!(text.contains("[#ffffff]\"hello\"[/#]"), "{text}");
}

#[test]
fn timestamps_and_blank_lines_do_not_become_chat_lines() {
    let lines = parse_chat_log("[12:30:01] Jane says: hi\n\n   \n* waves");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text, "Jane says: hi");
    assert_ne!(lines[0].id, lines[1].id);
}

#[test]
fn emphasis_keeps_asterisks_and_other_forms_strip_delimiters() {
    let base = PresetColor::Chat.color();
    let words = |line: &str| -> Vec<String> {
        tokenize(line, base)
            .into_iter()
            .filter(|token| !token.is_whitespace())
            .map(|token| token.text)
            .collect()
    };
    assert_eq!(words("say *loudly* now"), vec!["say", "*loudly*", "now"]);
    assert_eq!(words("/soft/ ||hidden|| [#ff0000]red[/#]"), vec!["soft", "hidden", "red"]);
}

#[test]
fn no_line_exceeds_the_wrap_width_when_words_fit() {
    let typeface = Typeface::block("Helvetica");
    let style = style(20.0);
    let text = "the quick brown fox jumps over the lazy dog again and again";
    let rows = layout_text(text, PresetColor::Chat.color(), &typeface, &style, 120.0, 0.0);
    assert!(rows.len() > 1);
    for row in &rows {
        assert!(row.width <= 120.0 + 1e-3, "row too wide: {}", row.width);
    }
    for pair in rows.windows(2) {
        assert_eq!(pair[1].y - pair[0].y, style.line_height);
    }
}

#[test]
fn an_oversized_word_sits_alone() {
    let typeface = Typeface::block("Helvetica");
    let style = style(20.0);
    let rows = layout_text(
        "a supercalifragilistic b",
        PresetColor::Chat.color(),
        &typeface,
        &style,
        100.0,
        0.0,
    );
    let alone = rows
        .iter()
        .find(|row| row.tokens.iter().any(|placed| placed.token.text == "supercalifragilistic"))
        .expect("row with the long word");
    assert_eq!(alone.tokens.len(), 1);
    assert!(alone.width > 100.0);
    assert_eq!(alone.tokens[0].x, 0.0);
}

#[test]
fn chat_lines_stack_without_gaps() {
    let typeface = Typeface::block("Helvetica");
    let style = style(10.0);
    let lines = parse_chat_log("one\ntwo\nthree");
    let layout = layout_lines(&lines, &typeface, &style, 300.0);
    let tops: Vec<f32> = layout.lines.iter().map(|line| line.y).collect();
    assert_eq!(tops, vec![0.0, 14.0, 28.0]);
    assert_eq!(layout.height, 42.0);
}
