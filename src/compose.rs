use image::{imageops, GrayImage, ImageBuffer, Luma, Pixel, Primitive, Rgb, Rgba, RgbaImage};
use num_traits::AsPrimitive;

use crate::errors::{PromoGenError, Result};

/// Distance in pixels between the foreground's and the canvas's bottom-right
/// corners.
pub const CANVAS_MARGIN: u32 = 10;

/// Default canvas fill: opaque blue.
pub const DEFAULT_CANVAS_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Top-left coordinate that puts the foreground's bottom-right corner
/// `margin` pixels from the canvas's bottom-right corner.
///
/// The result goes negative when the foreground exceeds the canvas; the
/// overlay then clips instead of failing.
pub fn bottom_right_offset(
    (canvas_w, canvas_h): (u32, u32),
    (fg_w, fg_h): (u32, u32),
    margin: u32,
) -> (i64, i64) {
    (
        i64::from(canvas_w) - i64::from(fg_w) - i64::from(margin),
        i64::from(canvas_h) - i64::from(fg_h) - i64::from(margin),
    )
}

/// Composite `foreground` onto a fresh solid-color canvas, bottom-right
/// aligned with [`CANVAS_MARGIN`]. Alpha blending is `imageops::overlay`'s;
/// there is no scaling.
pub fn onto_canvas(foreground: &RgbaImage, width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    let mut canvas = ImageBuffer::from_pixel(width, height, color);
    let (x, y) = bottom_right_offset((width, height), foreground.dimensions(), CANVAS_MARGIN);
    imageops::overlay(&mut canvas, foreground, x, y);
    canvas
}

/// Attach an 8-bit matte as the alpha channel of an RGB image.
///
/// Generic over the subpixel so f32 working buffers go through the same
/// path as u8 ones; the matte value is rescaled to the subpixel's range.
pub fn apply_matte<S>(
    image: &ImageBuffer<Rgb<S>, Vec<S>>,
    matte: &GrayImage,
) -> Result<ImageBuffer<Rgba<S>, Vec<S>>>
where
    Rgb<S>: Pixel<Subpixel = S>,
    Rgba<S>: Pixel<Subpixel = S>,
    S: Primitive + AsPrimitive<f32> + 'static,
    f32: AsPrimitive<S>,
{
    if image.dimensions() != matte.dimensions() {
        return Err(PromoGenError::ImageProcessing {
            path: "in-memory".to_string(),
            operation: format!(
                "matte application (image {}x{}, matte {}x{})",
                image.width(),
                image.height(),
                matte.width(),
                matte.height()
            ),
            source: "image and matte dimensions do not match".into(),
        });
    }

    let max = S::DEFAULT_MAX_VALUE.as_();
    let pixels = image
        .pixels()
        .zip(matte.pixels())
        .flat_map(|(&image_pixel, &matte_pixel)| {
            let Rgb([red, green, blue]) = image_pixel;
            let Luma([alpha]) = matte_pixel;
            let alpha = (f32::from(alpha) / 255.0 * max).as_();
            [red, green, blue, alpha]
        })
        .collect::<Vec<S>>();

    ImageBuffer::from_raw(image.width(), image.height(), pixels).ok_or_else(|| {
        PromoGenError::ImageProcessing {
            path: "in-memory".to_string(),
            operation: "matte application".to_string(),
            source: "buffer construction from matte-applied pixels failed".into(),
        }
    })
}

/// Parse `#RRGGBB` or `#RRGGBBAA` into a pixel. Alpha defaults to opaque.
pub fn parse_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(PromoGenError::validation(
            "background-color",
            format!("must be `#RRGGBB` or `#RRGGBBAA`, got `{value}`"),
        ));
    }

    let channel = |index: usize| {
        u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).map_err(|e| {
            PromoGenError::validation("background-color", format!("`{value}`: {e}"))
        })
    };

    let alpha = if hex.len() == 8 { channel(3)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(1)?, channel(2)?, alpha]))
}
