use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ab_glyph::{Font as _, FontVec, OutlineCurve, Point};
use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use tiny_skia::PathBuilder;
use tracing::{debug, warn};

use crate::error_codes::{CodedError, FONT_UNAVAILABLE};

pub const FONT_LOAD_ATTEMPTS: u32 = 3;
pub const FONT_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const FONT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
pub const FONT_DIRS_ENV: &str = "RPEDIT_FONT_DIRS";

/// Shear applied to upright faces when no italic file exists.
pub const SYNTHETIC_ITALIC_SKEW: f32 = 0.2;
/// Extra outline width (in em) painted around fills when no bold file exists.
pub const SYNTHETIC_BOLD_EM: f32 = 0.04;

/// Resolved font of a token. Displays as a CSS-like font string.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub family: String,
    pub size_px: f32,
    pub bold: bool,
    pub italic: bool,
}

impl fmt::Display for FontSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.italic {
            f.write_str("italic ")?;
        }
        if self.bold {
            f.write_str("bold ")?;
        }
        write!(f, "{}px {}", self.size_px, self.family)
    }
}

/// Pen position for placing one glyph: `x` on the baseline, glyph-space
/// units already scaled to pixels.
#[derive(Debug, Clone, Copy)]
pub struct GlyphPen {
    pub x: f32,
    pub baseline: f32,
    pub skew: f32,
}

impl GlyphPen {
    /// Maps a y-up glyph-local pixel offset to y-down canvas space.
    fn place(&self, dx: f32, dy: f32) -> (f32, f32) {
        (self.x + dx + self.skew * dy, self.baseline - dy)
    }
}

/// Measurement and outlines for one concrete face.
pub trait GlyphFace: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Stable identity of the face data.
    fn fingerprint(&self) -> &str;

    fn advance(&self, ch: char, size_px: f32) -> f32;

    fn kern(&self, _left: char, _right: char, _size_px: f32) -> f32 {
        0.0
    }

    fn ascent(&self, size_px: f32) -> f32;

    fn append_outline(&self, ch: char, size_px: f32, pen: GlyphPen, builder: &mut PathBuilder);
}

/// A real font file: fontdue supplies metrics, ab_glyph the outlines.
pub struct LoadedFace {
    name: String,
    fingerprint: String,
    metrics: fontdue::Font,
    outlines: FontVec,
    units_per_em: f32,
}

impl LoadedFace {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let fingerprint = sha256_hex(&bytes);
        let metrics = fontdue::Font::from_bytes(bytes.as_slice(), fontdue::FontSettings::default())
            .map_err(|error| anyhow!("failed to parse font '{name}': {error}"))?;
        let outlines = FontVec::try_from_vec(bytes)
            .map_err(|error| anyhow!("failed to read outlines of font '{name}': {error}"))?;
        let units_per_em = outlines
            .units_per_em()
            .unwrap_or_else(|| metrics.units_per_em());
        Ok(Self {
            name,
            fingerprint,
            metrics,
            outlines,
            units_per_em,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read font file '{}'", path.display()))?;
        Self::from_bytes(face_name(path), bytes)
    }
}

impl fmt::Debug for LoadedFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedFace")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl GlyphFace for LoadedFace {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn advance(&self, ch: char, size_px: f32) -> f32 {
        self.metrics.metrics(ch, size_px).advance_width
    }

    fn kern(&self, left: char, right: char, size_px: f32) -> f32 {
        self.metrics
            .horizontal_kern(left, right, size_px)
            .unwrap_or(0.0)
    }

    fn ascent(&self, size_px: f32) -> f32 {
        self.metrics
            .horizontal_line_metrics(size_px)
            .map(|line| line.ascent)
            .unwrap_or(size_px * 0.8)
    }

    fn append_outline(&self, ch: char, size_px: f32, pen: GlyphPen, builder: &mut PathBuilder) {
        let Some(outline) = self.outlines.outline(self.outlines.glyph_id(ch)) else {
            return;
        };
        let scale = size_px / self.units_per_em;
        let at = |p: Point| pen.place(p.x * scale, p.y * scale);

        // Curves arrive as disjoint segments; contours are rebuilt from endpoint continuity.
        let mut current: Option<Point> = None;
        let mut start = Point { x: 0.0, y: 0.0 };
        for curve in &outline.curves {
            let (from, to) = match curve {
                OutlineCurve::Line(p0, p1) => (*p0, *p1),
                OutlineCurve::Quad(p0, _, p2) => (*p0, *p2),
                OutlineCurve::Cubic(p0, _, _, p3) => (*p0, *p3),
            };
            if !current.is_some_and(|point| same_point(point, from)) {
                if current.is_some() {
                    builder.close();
                }
                let (x, y) = at(from);
                builder.move_to(x, y);
                start = from;
            }
            match curve {
                OutlineCurve::Line(_, p1) => {
                    let (x, y) = at(*p1);
                    builder.line_to(x, y);
                }
                OutlineCurve::Quad(_, p1, p2) => {
                    let (x1, y1) = at(*p1);
                    let (x, y) = at(*p2);
                    builder.quad_to(x1, y1, x, y);
                }
                OutlineCurve::Cubic(_, p1, p2, p3) => {
                    let (x1, y1) = at(*p1);
                    let (x2, y2) = at(*p2);
                    let (x, y) = at(*p3);
                    builder.cubic_to(x1, y1, x2, y2, x, y);
                }
            }
            if same_point(to, start) {
                builder.close();
                current = None;
            } else {
                current = Some(to);
            }
        }
        if current.is_some() {
            builder.close();
        }
    }
}

fn same_point(a: Point, b: Point) -> bool {
    (a.x - b.x).abs() < f32::EPSILON && (a.y - b.y).abs() < f32::EPSILON
}

/// Built-in face with fixed per-character metrics and box glyphs. Used when
/// no font file can be loaded, and as a deterministic face in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockFace;

impl BlockFace {
    pub const ADVANCE_EM: f32 = 0.55;
    pub const SPACE_EM: f32 = 0.28;
    pub const ASCENT_EM: f32 = 0.8;
}

impl GlyphFace for BlockFace {
    fn name(&self) -> &str {
        "block"
    }

    fn fingerprint(&self) -> &str {
        "block"
    }

    fn advance(&self, ch: char, size_px: f32) -> f32 {
        if ch.is_whitespace() {
            size_px * Self::SPACE_EM
        } else {
            size_px * Self::ADVANCE_EM
        }
    }

    fn ascent(&self, size_px: f32) -> f32 {
        size_px * Self::ASCENT_EM
    }

    fn append_outline(&self, ch: char, size_px: f32, pen: GlyphPen, builder: &mut PathBuilder) {
        if ch.is_whitespace() {
            return;
        }
        let left = size_px * 0.08;
        let right = size_px * (Self::ADVANCE_EM - 0.08);
        let top = size_px * 0.7;
        let corners = [(left, 0.0), (right, 0.0), (right, top), (left, top)];
        for (index, (dx, dy)) in corners.into_iter().enumerate() {
            let (x, y) = pen.place(dx, dy);
            if index == 0 {
                builder.move_to(x, y);
            } else {
                builder.line_to(x, y);
            }
        }
        builder.close();
    }
}

/// A family with its style variants.
#[derive(Debug, Clone)]
pub struct Typeface {
    family: String,
    regular: Arc<dyn GlyphFace>,
    bold: Option<Arc<dyn GlyphFace>>,
    italic: Option<Arc<dyn GlyphFace>>,
    bold_italic: Option<Arc<dyn GlyphFace>>,
}

impl Typeface {
    pub fn new(family: impl Into<String>, regular: Arc<dyn GlyphFace>) -> Self {
        Self {
            family: family.into(),
            regular,
            bold: None,
            italic: None,
            bold_italic: None,
        }
    }

    pub fn block(family: impl Into<String>) -> Self {
        Self::new(family, Arc::new(BlockFace))
    }

    pub fn with_bold(mut self, face: Arc<dyn GlyphFace>) -> Self {
        self.bold = Some(face);
        self
    }

    pub fn with_italic(mut self, face: Arc<dyn GlyphFace>) -> Self {
        self.italic = Some(face);
        self
    }

    pub fn with_bold_italic(mut self, face: Arc<dyn GlyphFace>) -> Self {
        self.bold_italic = Some(face);
        self
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn is_block(&self) -> bool {
        self.regular.fingerprint() == BlockFace.fingerprint()
    }

    /// Identity of every loaded variant; changes whenever the face data does.
    pub fn fingerprint(&self) -> String {
        let mut parts = vec![self.regular.fingerprint()];
        for face in [&self.bold, &self.italic, &self.bold_italic]
            .into_iter()
            .flatten()
        {
            parts.push(face.fingerprint());
        }
        parts.join("+")
    }

    /// Picks the closest variant, synthesizing the missing style.
    pub fn resolve(&self, bold: bool, italic: bool) -> FaceRef {
        let pick = |face: &Option<Arc<dyn GlyphFace>>| face.clone();
        let (face, real_bold, real_italic) = match (bold, italic) {
            (false, false) => (Some(self.regular.clone()), false, false),
            (true, false) => match pick(&self.bold) {
                Some(face) => (Some(face), true, false),
                None => (None, false, false),
            },
            (false, true) => match pick(&self.italic) {
                Some(face) => (Some(face), false, true),
                None => (None, false, false),
            },
            (true, true) => match pick(&self.bold_italic) {
                Some(face) => (Some(face), true, true),
                None => match (pick(&self.bold), pick(&self.italic)) {
                    (Some(face), _) => (Some(face), true, false),
                    (None, Some(face)) => (Some(face), false, true),
                    (None, None) => (None, false, false),
                },
            },
        };
        FaceRef {
            face: face.unwrap_or_else(|| self.regular.clone()),
            skew: if italic && !real_italic {
                SYNTHETIC_ITALIC_SKEW
            } else {
                0.0
            },
            synthetic_bold: bold && !real_bold,
        }
    }
}

/// One styled face ready to measure and outline text.
#[derive(Debug, Clone)]
pub struct FaceRef {
    face: Arc<dyn GlyphFace>,
    skew: f32,
    synthetic_bold: bool,
}

impl FaceRef {
    pub fn face(&self) -> &dyn GlyphFace {
        self.face.as_ref()
    }

    /// Advance of `text` including pair kerning.
    pub fn measure(&self, text: &str, size_px: f32) -> f32 {
        let mut width = 0.0;
        let mut previous: Option<char> = None;
        for ch in text.chars() {
            if let Some(left) = previous {
                width += self.face.kern(left, ch, size_px);
            }
            width += self.face.advance(ch, size_px);
            previous = Some(ch);
        }
        width
    }

    pub fn ascent(&self, size_px: f32) -> f32 {
        self.face.ascent(size_px)
    }

    /// Width of the extra outline painted with the fill for synthetic bold.
    pub fn embolden_width(&self, size_px: f32) -> f32 {
        if self.synthetic_bold {
            size_px * SYNTHETIC_BOLD_EM
        } else {
            0.0
        }
    }

    /// Outline of `text` with the pen starting at `x` on `baseline`.
    /// Glyph positions follow exactly the advances used by [`FaceRef::measure`].
    pub fn text_path(&self, text: &str, x: f32, baseline: f32, size_px: f32) -> Option<tiny_skia::Path> {
        let mut builder = PathBuilder::new();
        let mut pen_x = x;
        let mut previous: Option<char> = None;
        for ch in text.chars() {
            if let Some(left) = previous {
                pen_x += self.face.kern(left, ch, size_px);
            }
            if !ch.is_whitespace() {
                let pen = GlyphPen {
                    x: pen_x,
                    baseline,
                    skew: self.skew,
                };
                self.face.append_outline(ch, size_px, pen, &mut builder);
            }
            pen_x += self.face.advance(ch, size_px);
            previous = Some(ch);
        }
        builder.finish()
    }
}

/// Search path: `RPEDIT_FONT_DIRS` entries first, then the usual system
/// font directories that exist.
pub fn font_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(raw) = env::var_os(FONT_DIRS_ENV) {
        dirs.extend(env::split_paths(&raw));
    }
    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
    }
    for system in [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/Library/Fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ] {
        dirs.push(PathBuf::from(system));
    }
    dirs.retain(|dir| dir.is_dir());
    dirs
}

/// Style variant files of one family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyFiles {
    pub family: String,
    pub regular: Option<PathBuf>,
    pub bold: Option<PathBuf>,
    pub italic: Option<PathBuf>,
    pub bold_italic: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

/// Finds the requested family, or the first available substitute.
pub fn discover_family(family: &str, dirs: &[PathBuf]) -> Option<FamilyFiles> {
    let mut files = Vec::new();
    for dir in dirs {
        match collect_files_recursively(dir) {
            Ok(found) => files.extend(found),
            Err(error) => debug!(dir = %dir.display(), "skipping font dir: {error:#}"),
        }
    }
    files.sort();

    for candidate in family_candidates(family) {
        let wanted = normalize_family(&candidate);
        let mut matched = FamilyFiles {
            family: candidate.clone(),
            ..FamilyFiles::default()
        };
        for path in &files {
            let Some((base, style)) = classify_font_file(path) else {
                continue;
            };
            if base != wanted {
                continue;
            }
            let slot = match style {
                FileStyle::Regular => &mut matched.regular,
                FileStyle::Bold => &mut matched.bold,
                FileStyle::Italic => &mut matched.italic,
                FileStyle::BoldItalic => &mut matched.bold_italic,
            };
            if slot.is_none() {
                *slot = Some(path.clone());
            }
        }
        if matched.regular.is_some() {
            return Some(matched);
        }
    }
    None
}

fn family_candidates(family: &str) -> Vec<String> {
    let mut candidates = vec![family.to_owned()];
    let aliases: &[&str] = match normalize_family(family).as_str() {
        "helvetica" | "arial" | "arimo" => &["Arimo", "Liberation Sans", "Arial", "Helvetica"],
        "couriernew" | "courier" => &["Liberation Mono", "Courier New", "DejaVu Sans Mono"],
        "georgia" | "timesnewroman" => &["Liberation Serif", "DejaVu Serif"],
        _ => &[],
    };
    for alias in aliases.iter().chain(["DejaVu Sans", "Liberation Sans", "Noto Sans"].iter()) {
        if !candidates
            .iter()
            .any(|existing| normalize_family(existing) == normalize_family(alias))
        {
            candidates.push((*alias).to_owned());
        }
    }
    candidates
}

fn normalize_family(family: &str) -> String {
    family
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

fn classify_font_file(path: &Path) -> Option<(String, FileStyle)> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    if extension != "ttf" && extension != "otf" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (base, suffix) = stem.rsplit_once('-').unwrap_or((stem, ""));
    let style = match normalize_family(suffix).as_str() {
        "" | "regular" | "roman" | "book" => FileStyle::Regular,
        "bold" => FileStyle::Bold,
        "italic" | "oblique" => FileStyle::Italic,
        "bolditalic" | "boldoblique" => FileStyle::BoldItalic,
        _ => return None,
    };
    Some((normalize_family(base), style))
}

/// Walks `root` without descending into symlinked directories. Symlinked
/// files are kept. Unreadable subdirectories are logged and skipped; only an
/// unreadable root is an error.
fn collect_files_recursively(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = fs::read_dir(root)
        .with_context(|| format!("failed to read directory {}", root.display()))?;
    let mut pending = vec![entries];
    while let Some(entries) = pending.pop() {
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(root = %root.display(), "skipping unreadable entry: {error}");
                    continue;
                }
            };
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                debug!(path = %path.display(), "skipping entry without metadata");
                continue;
            };
            if file_type.is_dir() {
                match fs::read_dir(&path) {
                    Ok(children) => pending.push(children),
                    Err(error) => debug!(dir = %path.display(), "skipping font dir: {error}"),
                }
            } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn face_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One load attempt: discovery plus parsing of every variant found.
pub async fn try_load_typeface(family: &str, dirs: &[PathBuf]) -> Result<Typeface> {
    // Blocking walk; must stay off the runtime thread for the attempt timeout.
    let wanted = family.to_owned();
    let search = dirs.to_vec();
    let discovered = tokio::task::spawn_blocking(move || discover_family(&wanted, &search))
        .await
        .context("font discovery task failed")?;
    let files = discovered.ok_or_else(|| {
        anyhow!(CodedError::resource(
            FONT_UNAVAILABLE,
            format!("no font file found for family '{family}'"),
        ))
    })?;
    let regular_path = files
        .regular
        .as_deref()
        .ok_or_else(|| anyhow!("family '{}' has no regular face", files.family))?;

    let mut typeface = Typeface::new(family, Arc::new(read_face(regular_path).await?));
    if let Some(path) = files.bold.as_deref() {
        typeface = typeface.with_bold(Arc::new(read_face(path).await?));
    }
    if let Some(path) = files.italic.as_deref() {
        typeface = typeface.with_italic(Arc::new(read_face(path).await?));
    }
    if let Some(path) = files.bold_italic.as_deref() {
        typeface = typeface.with_bold_italic(Arc::new(read_face(path).await?));
    }
    debug!(family, resolved = %files.family, "loaded typeface");
    Ok(typeface)
}

async fn read_face(path: &Path) -> Result<LoadedFace> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read font file '{}'", path.display()))?;
    LoadedFace::from_bytes(face_name(path), bytes)
}

/// Bounded font readiness: a few timed attempts, then the block face.
/// Never fails and never waits longer than the attempt budget.
pub async fn load_typeface(family: &str, dirs: &[PathBuf]) -> Typeface {
    for attempt in 1..=FONT_LOAD_ATTEMPTS {
        match tokio::time::timeout(FONT_ATTEMPT_TIMEOUT, try_load_typeface(family, dirs)).await {
            Ok(Ok(typeface)) => return typeface,
            Ok(Err(error)) => debug!(family, attempt, "font load failed: {error:#}"),
            Err(_) => debug!(family, attempt, "font load timed out"),
        }
        if attempt < FONT_LOAD_ATTEMPTS {
            tokio::time::sleep(FONT_RETRY_DELAY).await;
        }
    }
    warn!(family, "font unavailable, using block face metrics");
    Typeface::block(family)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
