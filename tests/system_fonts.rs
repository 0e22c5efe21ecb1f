use std::path::PathBuf;

use rpedit::classifier::parse_chat_log;
use rpedit::font_assets::{discover_family, font_search_dirs, load_typeface, try_load_typeface};
use rpedit::layout::layout_lines;
use rpedit::raster::render_layer_bitmap;
use rpedit::schema::StyleConfig;

fn dejavu_regular() -> Option<PathBuf> {
    let found = discover_family("DejaVu Sans", &font_search_dirs())?;
    if found.family != "DejaVu Sans" {
        return None;
    }
    found.regular
}

#[tokio::test]
async fn renamed_font_file_is_discovered_and_measured() {
    let Some(source) = dejavu_regular() else {
        eprintln!("DejaVu Sans not installed; skipping");
        return;
    };
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::copy(&source, dir.path().join("StoryFace-Regular.ttf")).expect("copy font");
    let dirs = vec![dir.path().to_path_buf()];

    let files = discover_family("Story Face", &dirs).expect("family found");
    assert!(files.regular.is_some());
    assert!(files.bold.is_none());

    let typeface = try_load_typeface("Story Face", &dirs).await.expect("load");
    assert!(!typeface.is_block());
    let fingerprint = typeface.fingerprint();
    assert_ne!(fingerprint, rpedit::font_assets::Typeface::block("Story Face").fingerprint());

    let face = typeface.resolve(false, false);
    assert!(face.measure("iiii", 20.0) < face.measure("MMMM", 20.0));
    assert!(face.ascent(20.0) > 0.0);
    assert!(typeface.resolve(true, false).embolden_width(20.0) > 0.0);
}

#[tokio::test]
async fn unknown_family_without_substitutes_falls_back_to_block_face() {
    let empty = tempfile::tempdir().expect("tempdir");
    let dirs = vec![empty.path().to_path_buf()];
    assert!(try_load_typeface("Nope Sans", &dirs).await.is_err());
    let typeface = load_typeface("Nope Sans", &dirs).await;
    assert!(typeface.is_block());
    assert_eq!(typeface.family(), "Nope Sans");
}

#[tokio::test]
async fn real_glyphs_wrap_and_rasterize() {
    let Some(source) = dejavu_regular() else {
        eprintln!("DejaVu Sans not installed; skipping");
        return;
    };
    let dirs = vec![source.parent().expect("font dir").to_path_buf()];
    let typeface = try_load_typeface("DejaVu Sans", &dirs).await.expect("load");
    let style = StyleConfig {
        font_family: "DejaVu Sans".to_owned(),
        ..StyleConfig::default()
    };
    let lines = parse_chat_log("Jane Doe says: the quick brown fox jumps over the lazy dog");
    let layout = layout_lines(&lines, &typeface, &style, 150.0);
    assert!(layout.lines.len() > 1);
    assert!(layout.lines.iter().all(|line| line.width <= 150.0 + 1e-3));

    let bitmap = render_layer_bitmap(&layout, &typeface, &style, 10.0).expect("bitmap");
    let opaque = bitmap.pixels().iter().filter(|px| px.alpha() == 255).count();
    assert!(opaque > 0);
}
