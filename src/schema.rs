use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::error_codes::CodedError;

pub const MIN_FONT_SIZE: f32 = 4.0;
pub const MAX_FONT_SIZE: f32 = 400.0;
pub const MAX_STROKE_WIDTH: f32 = 40.0;
pub const MAX_ADJUSTMENT_PERCENT: f32 = 200.0;

/// 8-bit straight-alpha color, written as `#RRGGBB` (or `#RRGGBBAA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorRgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ColorRgba {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let digits = raw
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| anyhow!("color '{raw}' must start with '#'"))?;
        if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            bail!("color '{raw}' contains non-hex digits");
        }
        let channel = |index: usize| -> Result<u8> {
            u8::from_str_radix(&digits[index..index + 2], 16)
                .map_err(|error| anyhow!("color '{raw}': {error}"))
        };
        match digits.len() {
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => bail!("color '{raw}' must have 6 or 8 hex digits"),
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

impl fmt::Display for ColorRgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ColorRgba {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ColorRgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ColorRgba {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(D::Error::custom)
    }
}

/// Fixed chat palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetColor {
    Me,
    Do,
    Chat,
    Shout,
    Whisper,
    Radio,
    Pm,
    Error,
    Server,
    Low,
    Phone,
    Ooc,
}

impl PresetColor {
    pub const ALL: [PresetColor; 12] = [
        Self::Me,
        Self::Do,
        Self::Chat,
        Self::Shout,
        Self::Whisper,
        Self::Radio,
        Self::Pm,
        Self::Error,
        Self::Server,
        Self::Low,
        Self::Phone,
        Self::Ooc,
    ];

    pub const fn color(self) -> ColorRgba {
        match self {
            Self::Me => ColorRgba::rgb(0xc2, 0xa2, 0xda),
            Self::Do => ColorRgba::rgb(0x9a, 0xcc, 0xcc),
            Self::Chat | Self::Shout => ColorRgba::rgb(0xff, 0xff, 0xff),
            Self::Whisper | Self::Pm => ColorRgba::rgb(0xff, 0xff, 0x00),
            Self::Radio => ColorRgba::rgb(0x8d, 0x8d, 0xff),
            Self::Error => ColorRgba::rgb(0xff, 0x00, 0x00),
            Self::Server => ColorRgba::rgb(0xaa, 0xc4, 0xe5),
            Self::Low => ColorRgba::rgb(0xc8, 0xc8, 0xc8),
            Self::Phone => ColorRgba::rgb(0x4c, 0xaf, 0x50),
            Self::Ooc => ColorRgba::rgb(0xa0, 0xa0, 0xa0),
        }
    }
}

pub fn default_custom_colors() -> Vec<ColorRgba> {
    vec![
        ColorRgba::rgb(0xff, 0x00, 0x00),
        ColorRgba::rgb(0x00, 0xff, 0x00),
        ColorRgba::rgb(0x00, 0x00, 0xff),
        ColorRgba::rgb(0xff, 0xff, 0x00),
        ColorRgba::rgb(0xff, 0x00, 0xff),
    ]
}

/// Global text style shared by every layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleConfig {
    pub font_family: String,
    pub font_size: f32,
    pub line_height: f32,
    pub stroke_width: f32,
    #[serde(rename = "fontBold")]
    pub bold: bool,
    #[serde(rename = "textBackground")]
    pub background: bool,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            font_family: "Helvetica".to_owned(),
            font_size: 15.0,
            line_height: 18.0,
            stroke_width: 2.0,
            bold: true,
            background: false,
        }
    }
}

impl StyleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.font_family.trim().is_empty() {
            bail!("font family must not be empty");
        }
        validate_number("font size", self.font_size)?;
        validate_number("line height", self.line_height)?;
        validate_number("stroke width", self.stroke_width)?;
        if self.font_size < MIN_FONT_SIZE || self.font_size > MAX_FONT_SIZE {
            bail!(
                "font size must be within {MIN_FONT_SIZE}..={MAX_FONT_SIZE}, got {}",
                self.font_size
            );
        }
        if self.line_height <= 0.0 {
            bail!("line height must be > 0, got {}", self.line_height);
        }
        if self.stroke_width < 0.0 || self.stroke_width > MAX_STROKE_WIDTH {
            bail!(
                "stroke width must be within 0..={MAX_STROKE_WIDTH}, got {}",
                self.stroke_width
            );
        }
        Ok(())
    }

    /// Outline is painted only when background boxes are off.
    pub fn stroke_enabled(&self) -> bool {
        !self.background && self.stroke_width > 0.0
    }

    /// Same style with every pixel metric multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            font_size: self.font_size * factor,
            line_height: self.line_height * factor,
            stroke_width: self.stroke_width * factor,
            ..self.clone()
        }
    }
}

/// Base-image color filter, in percent (100 = unchanged).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
        }
    }
}

impl Adjustments {
    pub fn clamped(self) -> Self {
        let clamp = |value: f32| {
            if value.is_finite() {
                value.clamp(0.0, MAX_ADJUSTMENT_PERCENT)
            } else {
                100.0
            }
        };
        Self {
            brightness: clamp(self.brightness),
            contrast: clamp(self.contrast),
            saturation: clamp(self.saturation),
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ExportFormat {
    pub fn from_keyword(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            _ => Err(anyhow!(CodedError::validation(
                "INVALID_EXPORT_FORMAT",
                format!("invalid export format '{value}'"),
            )
            .with_details(json!({
                "provided": value,
                "allowed": ["png", "jpeg", "webp"]
            })))),
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn extension(self) -> &'static str {
        self.keyword()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub fn is_lossless(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPreset {
    pub width: u32,
    pub height: u32,
    pub label: String,
}

pub fn default_resolution_presets() -> Vec<ResolutionPreset> {
    vec![
        ResolutionPreset {
            width: 800,
            height: 600,
            label: "Standard (800x600)".to_owned(),
        },
        ResolutionPreset {
            width: 1920,
            height: 1080,
            label: "Full HD (1920x1080)".to_owned(),
        },
        ResolutionPreset {
            width: 940,
            height: 400,
            label: "Forum Sig (940x400)".to_owned(),
        },
    ]
}

/// Crop rectangle in preview pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropSelection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// On-screen size of the displayed base image; layer coordinates live here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewSize {
    pub width: f32,
    pub height: f32,
}

fn validate_number(label: &str, value: f32) -> Result<()> {
    if !value.is_finite() {
        bail!("{label} must be a finite number");
    }
    Ok(())
}
