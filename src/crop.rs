use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde_json::json;
use tracing::debug;

use crate::error_codes::{CodedError, INVALID_CROP_SELECTION};
use crate::schema::{CropSelection, PreviewSize};

pub const MIN_SELECTION_PX: f32 = 10.0;
pub const DEFAULT_CROP_WIDTH: u32 = 1000;

/// Output size requested for a crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropTarget {
    pub width: u32,
    pub height: u32,
}

fn invalid(message: impl Into<String>, selection: CropSelection) -> anyhow::Error {
    anyhow!(CodedError::validation(INVALID_CROP_SELECTION, message).with_details(json!({
        "x": selection.x,
        "y": selection.y,
        "w": selection.w,
        "h": selection.h,
    })))
}

/// Crops `image` to a selection made on its preview and resamples the result.
/// Without a target the output is 1000 px wide with proportional height.
pub fn apply_crop(
    image: &RgbaImage,
    selection: CropSelection,
    preview: PreviewSize,
    target: Option<CropTarget>,
) -> Result<RgbaImage> {
    let finite = [selection.x, selection.y, selection.w, selection.h]
        .iter()
        .all(|value| value.is_finite());
    if !finite || selection.w < MIN_SELECTION_PX || selection.h < MIN_SELECTION_PX {
        return Err(invalid(
            format!("selection must be at least {MIN_SELECTION_PX}x{MIN_SELECTION_PX} preview px"),
            selection,
        ));
    }
    if !(preview.width > 0.0 && preview.height > 0.0) {
        return Err(invalid("preview size must be positive", selection));
    }

    let scale_x = image.width() as f32 / preview.width;
    let scale_y = image.height() as f32 / preview.height;
    let left = (selection.x * scale_x).round().max(0.0) as u32;
    let top = (selection.y * scale_y).round().max(0.0) as u32;
    let right = (((selection.x + selection.w) * scale_x).round().max(0.0) as u32).min(image.width());
    let bottom =
        (((selection.y + selection.h) * scale_y).round().max(0.0) as u32).min(image.height());
    if right <= left || bottom <= top {
        return Err(invalid("selection lies outside the image", selection));
    }
    let (natural_w, natural_h) = (right - left, bottom - top);

    let (out_w, out_h) = match target {
        Some(target) if target.width > 0 && target.height > 0 => (target.width, target.height),
        _ => {
            let height = (DEFAULT_CROP_WIDTH as f32 / natural_w as f32 * natural_h as f32).round();
            (DEFAULT_CROP_WIDTH, height.max(1.0) as u32)
        }
    };

    let region = imageops::crop_imm(image, left, top, natural_w, natural_h).to_image();
    debug!(natural_w, natural_h, out_w, out_h, "cropped base image");
    Ok(imageops::resize(&region, out_w, out_h, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::error_codes::find_coded_error;

    fn checker() -> RgbaImage {
        RgbaImage::from_fn(400, 200, |x, _| {
            if x < 200 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    fn preview() -> PreviewSize {
        PreviewSize {
            width: 200.0,
            height: 100.0,
        }
    }

    fn selection(x: f32, y: f32, w: f32, h: f32) -> CropSelection {
        CropSelection { x, y, w, h }
    }

    #[test]
    fn small_selection_is_rejected() {
        let error = apply_crop(&checker(), selection(0.0, 0.0, 9.0, 50.0), preview(), None)
            .unwrap_err();
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, INVALID_CROP_SELECTION);
    }

    #[test]
    fn default_output_is_1000_wide_and_proportional() {
        let out = apply_crop(&checker(), selection(0.0, 0.0, 50.0, 25.0), preview(), None)
            .expect("crop");
        assert_eq!(out.dimensions(), (1000, 500));
        assert_eq!(out.get_pixel(500, 250).0, [255, 0, 0, 255]);
    }

    #[test]
    fn target_resolution_wins() {
        let target = CropTarget {
            width: 80,
            height: 60,
        };
        let out = apply_crop(&checker(), selection(100.0, 0.0, 100.0, 100.0), preview(), Some(target))
            .expect("crop");
        assert_eq!(out.dimensions(), (80, 60));
        assert_eq!(out.get_pixel(40, 30).0, [0, 0, 255, 255]);
    }

    #[test]
    fn selection_is_clamped_to_the_image() {
        let out = apply_crop(&checker(), selection(180.0, 80.0, 100.0, 100.0), preview(), None)
            .expect("crop");
        // 20x20 preview px remain, i.e. 40x40 natural px.
        assert_eq!(out.dimensions(), (1000, 1000));
        assert!(apply_crop(&checker(), selection(300.0, 0.0, 20.0, 20.0), preview(), None).is_err());
    }
}
