use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use rpedit::classifier::parse_chat_log;
use rpedit::cleaner::{Cleaner, CleanerRules};
use rpedit::crop::CropTarget;
use rpedit::encoding::{decode_image, EncodeOptions, DEFAULT_JPEG_QUALITY};
use rpedit::error_codes::envelope_for;
use rpedit::font_assets::{font_search_dirs, load_typeface};
use rpedit::layout::layout_lines;
use rpedit::schema::{Adjustments, CropSelection, ExportFormat, PreviewSize, ResolutionPreset, StyleConfig};
use rpedit::services::{http_client, CleanupMode, GeminiCleanup, ImgBbHost};
use rpedit::session::{EditorCommand, EditorSession, LayerOrigin};
use rpedit::settings::{Credential, Language, SettingsStore, UploadRecord};

const GIT_HASH: &str = match option_env!("RPEDIT_GIT_HASH") {
    Some(hash) => hash,
    None => "unknown",
};

#[derive(Debug, Parser)]
#[command(name = "rpedit", version)]
#[command(about = "Roleplay screenshot annotator: clean chat logs, lay out colored text, export")]
struct Cli {
    /// Print machine-readable JSON, including error envelopes on stderr.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Filter a raw transcript down to story lines.
    Clean {
        input: Option<PathBuf>,
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Print every line with its category and color.
    Classify { input: Option<PathBuf> },
    /// Lay out a transcript and print the positioned tokens as JSON.
    Layout {
        input: Option<PathBuf>,
        #[arg(long, default_value_t = 400.0)]
        width: f32,
        #[command(flatten)]
        style: StyleArgs,
    },
    /// Overlay a transcript on an image and export it.
    Render(RenderArgs),
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Clean { .. } => "clean",
            Self::Classify { .. } => "classify",
            Self::Layout { .. } => "layout",
            Self::Render(_) => "render",
            Self::Settings { .. } => "settings",
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
struct StyleArgs {
    #[arg(long)]
    font: Option<String>,
    #[arg(long)]
    font_size: Option<f32>,
    #[arg(long)]
    line_height: Option<f32>,
    #[arg(long)]
    stroke: Option<f32>,
    #[arg(long)]
    bold: Option<bool>,
    #[arg(long)]
    background: Option<bool>,
}

impl StyleArgs {
    fn apply(&self, mut style: StyleConfig) -> StyleConfig {
        if let Some(font) = &self.font {
            style.font_family = font.clone();
        }
        if let Some(size) = self.font_size {
            style.font_size = size;
        }
        if let Some(line_height) = self.line_height {
            style.line_height = line_height;
        }
        if let Some(stroke) = self.stroke {
            style.stroke_width = stroke;
        }
        if let Some(bold) = self.bold {
            style.bold = bold;
        }
        if let Some(background) = self.background {
            style.background = background;
        }
        style
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AiMode {
    Filter,
    Summarize,
    Clean,
}

impl From<AiMode> for CleanupMode {
    fn from(mode: AiMode) -> Self {
        match mode {
            AiMode::Filter => Self::TopicFilter,
            AiMode::Summarize => Self::NarrativeSummary,
            AiMode::Clean => Self::GeneralClean,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ServiceArg {
    Gemini,
    Imgbb,
}

impl From<ServiceArg> for Credential {
    fn from(service: ServiceArg) -> Self {
        match service {
            ServiceArg::Gemini => Self::Gemini,
            ServiceArg::Imgbb => Self::ImgBb,
        }
    }
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long)]
    image: PathBuf,
    /// Transcript file; `-` reads stdin.
    #[arg(long)]
    text: Option<PathBuf>,
    /// Defaults to a timestamped name in the current directory.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = 20.0)]
    x: f32,
    #[arg(long, default_value_t = 20.0)]
    y: f32,
    /// Wrap width in preview pixels.
    #[arg(long)]
    wrap: Option<f32>,
    /// Preview size the coordinates refer to, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_size)]
    preview: Option<(u32, u32)>,
    #[arg(long)]
    format: Option<String>,
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    quality: u8,
    #[arg(long, default_value_t = false)]
    letterbox: bool,
    #[arg(long, default_value_t = false)]
    gradient: bool,
    #[arg(long, default_value_t = 100.0)]
    brightness: f32,
    #[arg(long, default_value_t = 100.0)]
    contrast: f32,
    #[arg(long, default_value_t = 100.0)]
    saturation: f32,
    /// Crop rectangle in preview pixels, as X,Y,W,H.
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropSelection>,
    /// Crop output size as WIDTHxHEIGHT; default is 1000 px wide.
    #[arg(long, value_parser = parse_size, requires = "crop")]
    crop_size: Option<(u32, u32)>,
    /// Run the built-in chat log cleaner over the text first.
    #[arg(long, default_value_t = false)]
    clean: bool,
    #[arg(long, value_enum)]
    ai: Option<AiMode>,
    #[arg(long, default_value = "")]
    instruction: String,
    #[arg(long, default_value_t = false)]
    upload: bool,
    #[command(flatten)]
    style: StyleArgs,
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    /// Persist style and export defaults.
    SetStyle {
        #[command(flatten)]
        style: StyleArgs,
        #[arg(long)]
        format: Option<String>,
    },
    SetKey {
        #[arg(value_enum)]
        service: ServiceArg,
        key: String,
    },
    SetLang { lang: String },
    AddPreset {
        width: u32,
        height: u32,
        label: String,
    },
    History,
    ClearHistory,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    debug!(version = env!("CARGO_PKG_VERSION"), git = GIT_HASH, "starting");

    let command_name = cli.command.name();
    let json_output = cli.json;
    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json_output {
                let envelope = envelope_for(&error);
                match serde_json::to_string_pretty(&envelope) {
                    Ok(text) => eprintln!("{text}"),
                    Err(_) => eprintln!("rpedit {command_name}: {error:#}"),
                }
            } else {
                eprintln!("rpedit {command_name}: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "rpedit=debug" } else { "rpedit=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let json_output = cli.json;
    match cli.command {
        Commands::Clean { input, rules } => run_clean(input.as_deref(), rules.as_deref(), json_output),
        Commands::Classify { input } => run_classify(input.as_deref(), json_output),
        Commands::Layout {
            input,
            width,
            style,
        } => run_layout(input.as_deref(), width, &style).await,
        Commands::Render(args) => run_render(args, json_output).await,
        Commands::Settings { action } => run_settings(action, json_output),
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}

fn run_clean(input: Option<&Path>, rules: Option<&Path>, json_output: bool) -> Result<()> {
    let raw = read_input(input)?;
    let rules = match rules {
        Some(path) => CleanerRules::load(path)?,
        None => CleanerRules::builtin()?,
    };
    let cleaner = Cleaner::new(rules)?;
    let cleaned = cleaner.clean(&raw);
    if json_output {
        print_json(&json!({
            "ok": true,
            "names": cleaner.discover_names(&raw),
            "text": cleaned,
        }))
    } else {
        println!("{cleaned}");
        Ok(())
    }
}

fn run_classify(input: Option<&Path>, json_output: bool) -> Result<()> {
    let lines = parse_chat_log(&read_input(input)?);
    if json_output {
        return print_json(&lines);
    }
    for line in &lines {
        println!("{:?}\t{}\t{}", line.category, line.color, line.text);
    }
    Ok(())
}

async fn run_layout(input: Option<&Path>, width: f32, args: &StyleArgs) -> Result<()> {
    let store = SettingsStore::from_env();
    let style = args.apply(store.load_config().style);
    style.validate()?;
    let typeface = load_typeface(&style.font_family, &font_search_dirs()).await;
    let lines = parse_chat_log(&read_input(input)?);
    let layout = layout_lines(&lines, &typeface, &style, width);
    print_json(&layout)
}

async fn run_render(args: RenderArgs, json_output: bool) -> Result<()> {
    let store = SettingsStore::from_env();
    let config = store.load_config();
    let style = args.style.apply(config.style);
    style.validate()?;
    let format = match &args.format {
        Some(keyword) => ExportFormat::from_keyword(keyword)?,
        None => config.export_format,
    };

    let typeface = load_typeface(&style.font_family, &font_search_dirs()).await;
    let mut session = EditorSession::new(style, typeface);

    let bytes = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("failed to read image {}", args.image.display()))?;
    session.apply(EditorCommand::LoadImage(decode_image(&bytes)?))?;
    if let Some((width, height)) = args.preview {
        session.apply(EditorCommand::SetPreviewSize(PreviewSize {
            width: width as f32,
            height: height as f32,
        }))?;
    }
    if let Some(selection) = args.crop {
        let target = args.crop_size.map(|(width, height)| CropTarget { width, height });
        session.apply(EditorCommand::ApplyCrop { selection, target })?;
    }
    session.apply(EditorCommand::SetAdjustments(Adjustments {
        brightness: args.brightness,
        contrast: args.contrast,
        saturation: args.saturation,
    }))?;
    if args.letterbox {
        session.apply(EditorCommand::ToggleLetterbox)?;
    }
    if args.gradient {
        session.apply(EditorCommand::ToggleGradient)?;
    }
    session.apply(EditorCommand::SetExportFormat(format))?;

    if let Some(path) = args.text.as_deref() {
        let text = read_input(Some(path))?;
        let layer = session
            .apply(EditorCommand::AddLayer {
                text,
                origin: LayerOrigin::Explicit,
            })?
            .layer_id
            .context("new layer has no id")?;
        session.apply(EditorCommand::MoveLayer {
            id: layer.clone(),
            x: args.x,
            y: args.y,
        })?;
        if let Some(width) = args.wrap {
            session.apply(EditorCommand::SetWrapWidth {
                id: layer.clone(),
                width,
            })?;
        }
        if args.clean {
            session.apply(EditorCommand::CleanLayerText { id: layer.clone() })?;
        }
        if let Some(mode) = args.ai {
            let service = GeminiCleanup::new(
                http_client()?,
                store.resolve_credential(Credential::Gemini),
                None,
            );
            session
                .cleanup_layer(&layer, &service, &args.instruction, mode.into())
                .await?;
        }
    } else if args.clean || args.ai.is_some() {
        bail!("--clean and --ai need --text");
    }

    let exported = session.export_with(EncodeOptions {
        format,
        jpeg_quality: args.quality,
    })?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&exported.file_name));
    tokio::fs::write(&output, &exported.bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    let mut uploaded = None;
    if args.upload {
        let host = ImgBbHost::new(http_client()?);
        let credential = store.resolve_credential(Credential::ImgBb);
        let image = session
            .upload(&host, &exported, credential.as_deref())
            .await?;
        store.append_history(UploadRecord::from_upload(image.clone(), Utc::now()))?;
        uploaded = Some(image);
    }

    if json_output {
        print_json(&json!({
            "ok": true,
            "output": output.display().to_string(),
            "format": exported.format.keyword(),
            "width": exported.width,
            "height": exported.height,
            "bytes": exported.bytes.len(),
            "upload": uploaded,
        }))?;
    } else {
        println!(
            "Wrote {} ({}x{}, {})",
            output.display(),
            exported.width,
            exported.height,
            exported.format.keyword()
        );
        if let Some(image) = &uploaded {
            println!("Uploaded: {}", image.url);
        }
    }
    Ok(())
}

fn run_settings(action: SettingsAction, json_output: bool) -> Result<()> {
    let store = SettingsStore::from_env();
    match action {
        SettingsAction::Show => print_json(&json!({
            "root": store.root().display().to_string(),
            "config": store.load_config(),
            "presets": store.load_presets(),
            "language": store.load_language(),
            "credentials": {
                "gemini": store.resolve_credential(Credential::Gemini).is_some(),
                "imgbb": store.resolve_credential(Credential::ImgBb).is_some(),
            },
            "history": store.load_history().len(),
        })),
        SettingsAction::SetStyle { style, format } => {
            let mut config = store.load_config();
            config.style = style.apply(config.style);
            if let Some(keyword) = format {
                config.export_format = ExportFormat::from_keyword(&keyword)?;
            }
            let path = store.save_config(&config)?;
            report_saved(&path, json_output)
        }
        SettingsAction::SetKey { service, key } => {
            let path = store.save_credential(service.into(), &key)?;
            report_saved(&path, json_output)
        }
        SettingsAction::SetLang { lang } => {
            let Some(language) = Language::from_tag(&lang) else {
                bail!("unsupported language '{lang}' (expected en or tr)");
            };
            let path = store.save_language(language)?;
            report_saved(&path, json_output)
        }
        SettingsAction::AddPreset {
            width,
            height,
            label,
        } => {
            let mut presets = store.load_presets();
            presets.push(ResolutionPreset {
                width,
                height,
                label,
            });
            let path = store.save_presets(&presets)?;
            report_saved(&path, json_output)
        }
        SettingsAction::History => print_json(&store.load_history()),
        SettingsAction::ClearHistory => {
            store.clear_history()?;
            if json_output {
                print_json(&json!({ "ok": true }))
            } else {
                println!("History cleared");
                Ok(())
            }
        }
    }
}

fn report_saved(path: &Path, json_output: bool) -> Result<()> {
    if json_output {
        print_json(&json!({ "ok": true, "path": path.display().to_string() }))
    } else {
        println!("Saved {}", path.display());
        Ok(())
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: u32 = width.trim().parse().map_err(|_| format!("bad width in '{raw}'"))?;
    let height: u32 = height.trim().parse().map_err(|_| format!("bad height in '{raw}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be positive, got '{raw}'"));
    }
    Ok((width, height))
}

fn parse_crop(raw: &str) -> Result<CropSelection, String> {
    let values: Vec<f32> = raw
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("expected X,Y,W,H numbers, got '{raw}'"))?;
    let [x, y, w, h] = values[..] else {
        return Err(format!("expected four values X,Y,W,H, got '{raw}'"));
    };
    Ok(CropSelection { x, y, w, h })
}
