use std::io::Cursor;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};
use tiny_skia::{ColorU8, Pixmap};

use crate::error_codes::{CodedError, IMAGE_DECODE_FAILED};
use crate::raster::allocate_pixmap;
use crate::schema::ExportFormat;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: ExportFormat,
    pub jpeg_quality: u8,
}

impl EncodeOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg quality must be within 1..=100, got {}", self.jpeg_quality);
        }
        Ok(())
    }
}

trait ImageEncoderBackend {
    fn format(&self) -> ExportFormat;
    fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>>;
}

struct PngBackend;

struct JpegBackend {
    quality: u8,
}

struct WebpBackend;

impl ImageEncoderBackend for PngBackend {
    fn format(&self) -> ExportFormat {
        ExportFormat::Png
    }

    fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .context("failed to encode png")?;
        Ok(out)
    }
}

impl ImageEncoderBackend for JpegBackend {
    fn format(&self) -> ExportFormat {
        ExportFormat::Jpeg
    }

    fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .context("failed to encode jpeg")?;
        Ok(out)
    }
}

impl ImageEncoderBackend for WebpBackend {
    fn format(&self) -> ExportFormat {
        ExportFormat::Webp
    }

    fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        WebPEncoder::new_lossless(&mut out)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .context("failed to encode webp")?;
        Ok(out)
    }
}

fn select_backend(options: EncodeOptions) -> Box<dyn ImageEncoderBackend> {
    match options.format {
        ExportFormat::Png => Box::new(PngBackend),
        ExportFormat::Jpeg => Box::new(JpegBackend {
            quality: options.jpeg_quality,
        }),
        ExportFormat::Webp => Box::new(WebpBackend),
    }
}

pub fn encode_image(image: &RgbaImage, options: EncodeOptions) -> Result<Vec<u8>> {
    options.validate()?;
    let backend = select_backend(options);
    backend
        .encode(image)
        .with_context(|| format!("export as {} failed", backend.format().keyword()))
}

/// Decodes any supported container, guessing the format from its bytes.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("failed to sniff image format")?;
    let decoded = reader.decode().map_err(|error| {
        anyhow!(CodedError::resource(
            IMAGE_DECODE_FAILED,
            format!("could not decode image: {error}"),
        ))
    })?;
    Ok(decoded.to_rgba8())
}

/// Premultiplied surface to straight-alpha image.
pub fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut raw = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        raw.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), raw)
        .unwrap_or_else(|| RgbaImage::new(pixmap.width(), pixmap.height()))
}

/// Straight-alpha image to premultiplied surface.
pub fn rgba_to_pixmap(image: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = allocate_pixmap(image.width(), image.height())?;
    for (target, source) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = source.0;
        *target = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

/// `rp-edit-YYYY-MM-DDTHH-MM-SS.<ext>`
pub fn export_file_name(format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "rp-edit-{}.{}",
        at.format("%Y-%m-%dT%H-%M-%S"),
        format.extension()
    )
}
