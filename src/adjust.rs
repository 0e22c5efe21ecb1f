//! Brightness, contrast and saturation with CSS filter semantics. The three
//! functions apply in that order and each result is clamped before the next.

use image::RgbaImage;

use crate::schema::Adjustments;

const LUMA_R: f32 = 0.213;
const LUMA_G: f32 = 0.715;
const LUMA_B: f32 = 0.072;

/// Returns an adjusted copy; alpha is untouched.
pub fn apply_adjustments(image: &RgbaImage, adjustments: Adjustments) -> RgbaImage {
    let adjustments = adjustments.clamped();
    let mut out = image.clone();
    if adjustments.is_neutral() {
        return out;
    }
    let brightness = adjustments.brightness / 100.0;
    let contrast = adjustments.contrast / 100.0;
    let saturation = adjustments.saturation / 100.0;

    for pixel in out.pixels_mut() {
        let mut rgb = [
            pixel[0] as f32 / 255.0,
            pixel[1] as f32 / 255.0,
            pixel[2] as f32 / 255.0,
        ];
        for channel in &mut rgb {
            *channel = (*channel * brightness).clamp(0.0, 1.0);
        }
        for channel in &mut rgb {
            *channel = ((*channel - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
        }
        rgb = saturate(rgb, saturation);
        for (index, channel) in rgb.iter().enumerate() {
            pixel[index] = (channel * 255.0).round() as u8;
        }
    }
    out
}

fn saturate([r, g, b]: [f32; 3], s: f32) -> [f32; 3] {
    let out = [
        (LUMA_R + (1.0 - LUMA_R) * s) * r + (LUMA_G - LUMA_G * s) * g + (LUMA_B - LUMA_B * s) * b,
        (LUMA_R - LUMA_R * s) * r + (LUMA_G + (1.0 - LUMA_G) * s) * g + (LUMA_B - LUMA_B * s) * b,
        (LUMA_R - LUMA_R * s) * r + (LUMA_G - LUMA_G * s) * g + (LUMA_B + (1.0 - LUMA_B) * s) * b,
    ];
    out.map(|channel| channel.clamp(0.0, 1.0))
}
