use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use image::RgbaImage;
use tiny_skia::Pixmap;
use tracing::{debug, info};

use crate::classifier::{parse_chat_log, ChatLine};
use crate::cleaner::clean_chat_log;
use crate::compositor::{export, scaled_layout, CompositeRequest, FrameOptions, LayerPlacement};
use crate::crop::{apply_crop, CropTarget};
use crate::encoding::{export_file_name, EncodeOptions};
use crate::error_codes::{
    find_coded_error, CodedError, NO_BASE_IMAGE, OPERATION_IN_FLIGHT, UNKNOWN_LAYER,
};
use crate::font_assets::Typeface;
use crate::layout::{clamp_wrap_width, TextLayout};
use crate::raster::{render_layer_bitmap, LAYER_PADDING};
use crate::schema::{Adjustments, CropSelection, ExportFormat, PreviewSize, StyleConfig};
use crate::services::{CleanupMode, ImageHost, TextCleanupService, UploadedImage};

pub const REFRESH_DEBOUNCE: Duration = Duration::from_millis(100);
pub const EXPLICIT_LAYER_ORIGIN: (f32, f32) = (20.0, 20.0);
pub const PASTED_LAYER_ORIGIN: (f32, f32) = (50.0, 50.0);
/// Gap kept between a new layer's wrap edge and the right image edge.
const WRAP_MARGIN: f32 = 20.0;
const FALLBACK_WRAP_WIDTH: f32 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOrigin {
    /// "Add text" button.
    Explicit,
    /// Text pasted or dropped onto the canvas.
    Paste,
}

impl LayerOrigin {
    fn position(self) -> (f32, f32) {
        match self {
            Self::Explicit => EXPLICIT_LAYER_ORIGIN,
            Self::Paste => PASTED_LAYER_ORIGIN,
        }
    }
}

/// Memo key for a layer bitmap. Floats are compared by bit pattern so a key
/// is `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerCacheKey {
    text_hash: u64,
    wrap_width: u32,
    font_family: String,
    font_size: u32,
    line_height: u32,
    stroke_width: u32,
    bold: bool,
    background: bool,
    scale: u32,
    typeface: String,
}

impl LayerCacheKey {
    pub fn new(
        source: &str,
        wrap_width: f32,
        style: &StyleConfig,
        scale: f32,
        typeface: &Typeface,
    ) -> Self {
        Self {
            text_hash: fnv1a64(source.as_bytes()),
            wrap_width: wrap_width.to_bits(),
            font_family: style.font_family.clone(),
            font_size: style.font_size.to_bits(),
            line_height: style.line_height.to_bits(),
            stroke_width: style.stroke_width.to_bits(),
            bold: style.bold,
            background: style.background,
            scale: scale.to_bits(),
            typeface: typeface.fingerprint(),
        }
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Preview-scale raster of a layer, padded on every side.
#[derive(Debug, Clone)]
pub struct LayerCache {
    pub key: LayerCacheKey,
    pub layout: TextLayout,
    pub bitmap: Pixmap,
}

#[derive(Debug, Clone)]
pub struct TextLayer {
    pub id: String,
    pub source: String,
    pub lines: Vec<ChatLine>,
    pub x: f32,
    pub y: f32,
    pub wrap_width: f32,
    cache: Option<LayerCache>,
}

impl TextLayer {
    fn new(source: String, x: f32, y: f32, wrap_width: f32) -> Self {
        let id = format!("layer-{}", uuid::Uuid::new_v4().simple());
        Self {
            id,
            lines: parse_chat_log(&source),
            source,
            x,
            y,
            wrap_width,
            cache: None,
        }
    }

    pub fn cache(&self) -> Option<&LayerCache> {
        self.cache.as_ref()
    }

    fn set_source(&mut self, source: String) {
        self.lines = parse_chat_log(&source);
        self.source = source;
    }
}

#[derive(Debug, Clone)]
pub enum EditorCommand {
    LoadImage(RgbaImage),
    SetPreviewSize(PreviewSize),
    AddLayer { text: String, origin: LayerOrigin },
    UpdateLayerText { id: String, text: String },
    MoveLayer { id: String, x: f32, y: f32 },
    SetWrapWidth { id: String, width: f32 },
    RemoveLayer { id: String },
    SetStyle(StyleConfig),
    SetAdjustments(Adjustments),
    ResetAdjustments,
    ToggleLetterbox,
    ToggleGradient,
    SetExportFormat(ExportFormat),
    ApplyCrop {
        selection: CropSelection,
        target: Option<CropTarget>,
    },
    CleanLayerText { id: String },
    /// Text returned by the cleanup service.
    ReplaceLayerText { id: String, text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Set by `AddLayer`.
    pub layer_id: Option<String>,
    /// Layers whose cached raster was dropped by this command.
    pub invalidated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportedImage {
    pub file_name: String,
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Owner of everything the editor shows. All mutation goes through
/// [`EditorSession::apply`]; failed commands leave the state untouched and
/// only update the status line.
#[derive(Debug)]
pub struct EditorSession {
    base: Option<RgbaImage>,
    preview: Option<PreviewSize>,
    layers: Vec<TextLayer>,
    style: StyleConfig,
    typeface: Typeface,
    frame: FrameOptions,
    export_format: ExportFormat,
    pixel_ratio: f32,
    busy: Option<&'static str>,
    status: Option<String>,
}

impl EditorSession {
    pub fn new(style: StyleConfig, typeface: Typeface) -> Self {
        Self {
            base: None,
            preview: None,
            layers: Vec::new(),
            style,
            typeface,
            frame: FrameOptions::default(),
            export_format: ExportFormat::default(),
            pixel_ratio: 1.0,
            busy: None,
            status: None,
        }
    }

    /// Device pixel ratio used for cached layer bitmaps.
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        if ratio.is_finite() && ratio > 0.0 {
            self.pixel_ratio = ratio;
        }
        self
    }

    pub fn base_image(&self) -> Option<&RgbaImage> {
        self.base.as_ref()
    }

    pub fn preview(&self) -> Option<PreviewSize> {
        self.preview
    }

    pub fn layers(&self) -> &[TextLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&TextLayer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn style(&self) -> &StyleConfig {
        &self.style
    }

    pub fn typeface(&self) -> &Typeface {
        &self.typeface
    }

    pub fn frame(&self) -> FrameOptions {
        self.frame
    }

    pub fn export_format(&self) -> ExportFormat {
        self.export_format
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    /// True when the loaded typeface belongs to another family than the
    /// style asks for; the caller should load one and call `set_typeface`.
    pub fn needs_typeface(&self) -> bool {
        self.typeface.family() != self.style.font_family
    }

    pub fn set_typeface(&mut self, typeface: Typeface) -> Vec<String> {
        self.typeface = typeface;
        self.invalidate_stale_caches()
    }

    pub fn apply(&mut self, command: EditorCommand) -> Result<CommandOutcome> {
        match self.execute(command) {
            Ok(mut outcome) => {
                outcome.invalidated = self.invalidate_stale_caches();
                Ok(outcome)
            }
            Err(error) => {
                self.status = Some(status_line(&error));
                Err(error)
            }
        }
    }

    fn execute(&mut self, command: EditorCommand) -> Result<CommandOutcome> {
        let mut outcome = CommandOutcome::default();
        match command {
            EditorCommand::LoadImage(image) => {
                let (width, height) = image.dimensions();
                self.preview = Some(PreviewSize {
                    width: width as f32,
                    height: height as f32,
                });
                self.base = Some(image);
                self.status = Some(format!("loaded {width}x{height} image"));
            }
            EditorCommand::SetPreviewSize(preview) => {
                if !(preview.width > 0.0 && preview.height > 0.0) {
                    return Err(anyhow!("preview size must be positive"));
                }
                self.preview = Some(preview);
            }
            EditorCommand::AddLayer { text, origin } => {
                let (x, y) = origin.position();
                let wrap_width = self.default_wrap_width(x);
                let layer = TextLayer::new(text, x, y, wrap_width);
                debug!(id = %layer.id, lines = layer.lines.len(), "added text layer");
                outcome.layer_id = Some(layer.id.clone());
                self.layers.push(layer);
            }
            EditorCommand::UpdateLayerText { id, text } => {
                self.layer_mut(&id)?.set_source(text);
            }
            EditorCommand::MoveLayer { id, x, y } => {
                let layer = self.layer_mut(&id)?;
                layer.x = x;
                layer.y = y;
            }
            EditorCommand::SetWrapWidth { id, width } => {
                self.layer_mut(&id)?.wrap_width = clamp_wrap_width(width);
            }
            EditorCommand::RemoveLayer { id } => {
                let index = self.layer_index(&id)?;
                self.layers.remove(index);
            }
            EditorCommand::SetStyle(style) => {
                style.validate()?;
                self.style = style;
            }
            EditorCommand::SetAdjustments(adjustments) => {
                self.frame.adjustments = adjustments.clamped();
            }
            EditorCommand::ResetAdjustments => {
                self.frame.adjustments = Adjustments::default();
            }
            EditorCommand::ToggleLetterbox => self.frame.letterbox = !self.frame.letterbox,
            EditorCommand::ToggleGradient => self.frame.gradient = !self.frame.gradient,
            EditorCommand::SetExportFormat(format) => self.export_format = format,
            EditorCommand::ApplyCrop { selection, target } => {
                let base = self.base.as_ref().ok_or_else(no_base_image)?;
                let preview = self.preview_or_natural(base);
                let cropped = apply_crop(base, selection, preview, target)?;
                let (width, height) = cropped.dimensions();
                self.preview = Some(PreviewSize {
                    width: width as f32,
                    height: height as f32,
                });
                self.base = Some(cropped);
                self.status = Some(format!("cropped to {width}x{height}"));
            }
            EditorCommand::CleanLayerText { id } => {
                let layer = self.layer_mut(&id)?;
                let before = layer.source.lines().count();
                let cleaned = clean_chat_log(&layer.source)?;
                layer.set_source(cleaned);
                let after = layer.source.lines().count();
                self.status = Some(format!("cleaned chat log: {before} -> {after} lines"));
            }
            EditorCommand::ReplaceLayerText { id, text } => {
                self.layer_mut(&id)?.set_source(text);
                self.status = Some("layer text replaced".to_owned());
            }
        }
        Ok(outcome)
    }

    fn layer_index(&self, id: &str) -> Result<usize> {
        self.layers
            .iter()
            .position(|layer| layer.id == id)
            .ok_or_else(|| {
                anyhow!(CodedError::validation(
                    UNKNOWN_LAYER,
                    format!("no text layer with id '{id}'"),
                ))
            })
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut TextLayer> {
        let index = self.layer_index(id)?;
        Ok(&mut self.layers[index])
    }

    fn default_wrap_width(&self, x: f32) -> f32 {
        let width = match self.preview {
            Some(preview) => preview.width - x - WRAP_MARGIN,
            None => FALLBACK_WRAP_WIDTH,
        };
        clamp_wrap_width(width)
    }

    fn preview_or_natural(&self, base: &RgbaImage) -> PreviewSize {
        self.preview.unwrap_or(PreviewSize {
            width: base.width() as f32,
            height: base.height() as f32,
        })
    }

    fn cache_key(&self, layer: &TextLayer) -> LayerCacheKey {
        LayerCacheKey::new(
            &layer.source,
            layer.wrap_width,
            &self.style,
            self.pixel_ratio,
            &self.typeface,
        )
    }

    /// Drops every cached raster whose key no longer matches the current
    /// text, wrap width, style, scale or typeface. Position is not part of
    /// the key.
    fn invalidate_stale_caches(&mut self) -> Vec<String> {
        let stale: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| {
                layer
                    .cache
                    .as_ref()
                    .is_some_and(|cache| cache.key != self.cache_key(layer))
            })
            .map(|(index, _)| index)
            .collect();
        let mut invalidated = Vec::with_capacity(stale.len());
        for index in stale {
            let layer = &mut self.layers[index];
            layer.cache = None;
            invalidated.push(layer.id.clone());
        }
        if !invalidated.is_empty() {
            debug!(count = invalidated.len(), "invalidated layer caches");
        }
        invalidated
    }

    /// Rasterizes a layer at preview scale unless its cached key still
    /// matches. Returns whether a new bitmap was produced.
    pub fn refresh_layer_cache(&mut self, id: &str) -> Result<bool> {
        let index = self.layer_index(id)?;
        let layer = &self.layers[index];
        let key = self.cache_key(layer);
        if layer.cache.as_ref().is_some_and(|cache| cache.key == key) {
            debug!(id, "layer cache hit");
            return Ok(false);
        }
        debug!(id, "layer cache miss");
        let (layout, style) = scaled_layout(
            &layer.lines,
            &self.typeface,
            &self.style,
            layer.wrap_width,
            self.pixel_ratio,
        );
        let bitmap = render_layer_bitmap(
            &layout,
            &self.typeface,
            &style,
            LAYER_PADDING * self.pixel_ratio,
        )?;
        self.layers[index].cache = Some(LayerCache {
            key,
            layout,
            bitmap,
        });
        Ok(true)
    }

    /// Returns how many layers were re-rendered.
    pub fn refresh_all(&mut self) -> Result<usize> {
        let ids: Vec<String> = self.layers.iter().map(|layer| layer.id.clone()).collect();
        let mut rendered = 0;
        for id in ids {
            if self.refresh_layer_cache(&id)? {
                rendered += 1;
            }
        }
        Ok(rendered)
    }

    pub fn begin_busy(&mut self, operation: &'static str) -> Result<()> {
        if let Some(running) = self.busy {
            return Err(anyhow!(CodedError::validation(
                OPERATION_IN_FLIGHT,
                format!("cannot start {operation} while {running} is running"),
            )));
        }
        self.busy = Some(operation);
        Ok(())
    }

    pub fn end_busy(&mut self) {
        self.busy = None;
    }

    pub fn export(&mut self) -> Result<ExportedImage> {
        self.export_with(EncodeOptions::new(self.export_format))
    }

    /// Flattens the session into an encoded image. Refused without a base
    /// image or while another export/upload runs.
    pub fn export_with(&mut self, options: EncodeOptions) -> Result<ExportedImage> {
        let result = self.begin_busy("export").and_then(|()| {
            let result = self.render_export(options);
            self.end_busy();
            result
        });
        match &result {
            Ok(exported) => self.status = Some(format!("exported {}", exported.file_name)),
            Err(error) => self.status = Some(status_line(error)),
        }
        result
    }

    fn render_export(&self, options: EncodeOptions) -> Result<ExportedImage> {
        let base = self.base.as_ref().ok_or_else(no_base_image)?;
        let request = CompositeRequest {
            base,
            preview: self.preview_or_natural(base),
            frame: self.frame,
            style: &self.style,
            typeface: &self.typeface,
            layers: self
                .layers
                .iter()
                .map(|layer| LayerPlacement {
                    lines: &layer.lines,
                    x: layer.x,
                    y: layer.y,
                    wrap_width: layer.wrap_width,
                })
                .collect(),
        };
        let bytes = export(&request, options)?;
        let bar = if self.frame.letterbox {
            crate::compositor::letterbox_bar(base.height())
        } else {
            0
        };
        Ok(ExportedImage {
            file_name: export_file_name(options.format, Utc::now()),
            format: options.format,
            width: base.width(),
            height: base.height() + bar * 2,
            bytes,
        })
    }

    /// Sends an exported image to the host. Failures keep the session as it
    /// was and land in the status line.
    pub async fn upload<H: ImageHost>(
        &mut self,
        host: &H,
        image: &ExportedImage,
        credential: Option<&str>,
    ) -> Result<UploadedImage> {
        self.begin_busy("upload").inspect_err(|error| {
            self.status = Some(status_line(error));
        })?;
        let result = host.upload(&image.bytes, credential).await;
        self.end_busy();
        match &result {
            Ok(uploaded) => {
                info!(id = %uploaded.id, url = %uploaded.url, "uploaded export");
                self.status = Some(format!("uploaded: {}", uploaded.url));
            }
            Err(error) => self.status = Some(status_line(error)),
        }
        result
    }

    /// Runs the cleanup service over a layer's text and swaps the result in.
    /// On any failure the layer text is untouched.
    pub async fn cleanup_layer<S: TextCleanupService>(
        &mut self,
        id: &str,
        service: &S,
        instruction: &str,
        mode: CleanupMode,
    ) -> Result<()> {
        let source = match self.layer_index(id) {
            Ok(index) => self.layers[index].source.clone(),
            Err(error) => {
                self.status = Some(status_line(&error));
                return Err(error);
            }
        };
        match service.cleanup(&source, instruction, mode).await {
            Ok(text) => {
                self.apply(EditorCommand::ReplaceLayerText {
                    id: id.to_owned(),
                    text,
                })?;
                Ok(())
            }
            Err(error) => {
                self.status = Some(status_line(&error));
                Err(error)
            }
        }
    }
}

fn no_base_image() -> anyhow::Error {
    anyhow!(CodedError::validation(NO_BASE_IMAGE, "load an image first"))
}

fn status_line(error: &anyhow::Error) -> String {
    match find_coded_error(error) {
        Some(coded) => coded.status_message(),
        None => format!("error: {error:#}"),
    }
}

/// Coalesces bursts of refresh requests. Each call to [`Debouncer::settle`]
/// starts a new generation and waits out the window; only the call that is
/// still the latest afterwards gets `true`.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    latest: Arc<AtomicU64>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(REFRESH_DEBOUNCE)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub async fn settle(&self) -> bool {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.window).await;
        let current = self.latest.load(Ordering::SeqCst);
        if current != generation {
            debug!(generation, current, "refresh superseded");
        }
        current == generation
    }
}
