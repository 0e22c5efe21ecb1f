//! Directory-backed settings. Every file is optional: a missing file means
//! defaults, a corrupt one is logged and ignored, and `config.json` falls
//! back key by key.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::schema::{
    default_custom_colors, default_resolution_presets, ColorRgba, ExportFormat, ResolutionPreset,
    StyleConfig,
};
use crate::services::UploadedImage;

pub const HOME_ENV: &str = "RPEDIT_HOME";
pub const CONFIG_FILE: &str = "config.json";
pub const PRESETS_FILE: &str = "presets.json";
pub const LANG_FILE: &str = "lang";
pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Tr,
}

impl Language {
    pub fn tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Tr => "tr",
        }
    }

    pub fn from_tag(raw: &str) -> Option<Self> {
        match raw.trim() {
            "en" => Some(Self::En),
            "tr" => Some(Self::Tr),
            _ => None,
        }
    }

    /// `tr_TR.UTF-8` and friends select Turkish; anything else is English.
    pub fn from_locale(locale: Option<&str>) -> Self {
        match locale {
            Some(value) if value.to_ascii_lowercase().starts_with("tr") => Self::Tr,
            _ => Self::En,
        }
    }
}

/// Stored API credentials; the environment variable wins over the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Gemini,
    ImgBb,
}

impl Credential {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Gemini => "api-key",
            Self::ImgBb => "imgbb-api-key",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Self::Gemini => crate::services::cleanup::GEMINI_API_KEY_ENV,
            Self::ImgBb => crate::services::upload::IMGBB_API_KEY_ENV,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    #[serde(flatten)]
    pub style: StyleConfig,
    pub export_format: ExportFormat,
    pub custom_colors: Vec<ColorRgba>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            style: StyleConfig::default(),
            export_format: ExportFormat::default(),
            custom_colors: default_custom_colors(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: String,
    pub link: String,
    #[serde(alias = "deletehash")]
    pub delete_url: String,
    pub created_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn from_upload(uploaded: UploadedImage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uploaded.id,
            link: uploaded.url,
            delete_url: uploaded.delete_url,
            created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    root: PathBuf,
}

impl SettingsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$RPEDIT_HOME`, else `$XDG_CONFIG_HOME/rpedit`, else `~/.config/rpedit`.
    pub fn from_env() -> Self {
        if let Some(home) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Self::new(home);
        }
        let config_root = env::var_os("XDG_CONFIG_HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(config_root.join("rpedit"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    pub fn load_config(&self) -> EditorConfig {
        let defaults = EditorConfig::default();
        let Some(Value::Object(object)) = self.read_json(CONFIG_FILE) else {
            return defaults;
        };
        let style = StyleConfig {
            font_family: field(&object, "fontFamily", defaults.style.font_family),
            font_size: field(&object, "fontSize", defaults.style.font_size),
            line_height: field(&object, "lineHeight", defaults.style.line_height),
            stroke_width: field(&object, "strokeWidth", defaults.style.stroke_width),
            bold: field(&object, "fontBold", defaults.style.bold),
            background: field(&object, "textBackground", defaults.style.background),
        };
        let style = match style.validate() {
            Ok(()) => style,
            Err(error) => {
                warn!("stored style is out of range, using defaults: {error:#}");
                StyleConfig::default()
            }
        };
        EditorConfig {
            style,
            export_format: field(&object, "exportFormat", defaults.export_format),
            custom_colors: field(&object, "customColors", defaults.custom_colors),
        }
    }

    pub fn save_config(&self, config: &EditorConfig) -> Result<PathBuf> {
        config.style.validate()?;
        self.write_json(CONFIG_FILE, config)
    }

    pub fn load_presets(&self) -> Vec<ResolutionPreset> {
        self.read_typed(PRESETS_FILE)
            .unwrap_or_else(default_resolution_presets)
    }

    pub fn save_presets(&self, presets: &[ResolutionPreset]) -> Result<PathBuf> {
        if let Some(preset) = presets.iter().find(|p| p.width == 0 || p.height == 0) {
            bail!("preset '{}' must have a positive size", preset.label);
        }
        self.write_json(PRESETS_FILE, &presets)
    }

    pub fn load_language(&self) -> Language {
        let stored = fs::read_to_string(self.path(LANG_FILE))
            .ok()
            .and_then(|raw| Language::from_tag(&raw));
        stored.unwrap_or_else(|| Language::from_locale(env::var("LANG").ok().as_deref()))
    }

    pub fn save_language(&self, language: Language) -> Result<PathBuf> {
        self.write_text(LANG_FILE, language.tag())
    }

    /// Stored key for `credential`, ignoring the environment.
    pub fn load_credential(&self, credential: Credential) -> Option<String> {
        fs::read_to_string(self.path(credential.file_name()))
            .ok()
            .map(|raw| raw.trim().to_owned())
            .filter(|key| !key.is_empty())
    }

    pub fn save_credential(&self, credential: Credential, key: &str) -> Result<PathBuf> {
        let key = key.trim();
        if key.is_empty() {
            bail!("refusing to store an empty {} key", credential.file_name());
        }
        self.write_text(credential.file_name(), key)
    }

    /// Environment first, then the stored file.
    pub fn resolve_credential(&self, credential: Credential) -> Option<String> {
        env::var(credential.env_var())
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .or_else(|| self.load_credential(credential))
    }

    pub fn load_history(&self) -> Vec<UploadRecord> {
        self.read_typed(HISTORY_FILE).unwrap_or_default()
    }

    /// Newest record first.
    pub fn append_history(&self, record: UploadRecord) -> Result<Vec<UploadRecord>> {
        let mut history = self.load_history();
        history.insert(0, record);
        self.write_json(HISTORY_FILE, &history)?;
        Ok(history)
    }

    pub fn clear_history(&self) -> Result<()> {
        let path = self.path(HISTORY_FILE);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    fn read_json(&self, file: &str) -> Option<Value> {
        let path = self.path(file);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(path = %path.display(), "ignoring corrupt settings file: {error}");
                None
            }
        }
    }

    fn read_typed<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let value = self.read_json(file)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                warn!(file, "ignoring settings file with unexpected shape: {error}");
                None
            }
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize {file}"))?;
        self.write_text(file, &format!("{json}\n"))
    }

    fn write_text(&self, file: &str, content: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create settings directory {}", self.root.display())
        })?;
        let path = self.path(file);
        fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn field<T: DeserializeOwned>(object: &Map<String, Value>, key: &str, default: T) -> T {
    let Some(value) = object.get(key) else {
        return default;
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(key, "ignoring invalid config value: {error}");
            default
        }
    }
}
