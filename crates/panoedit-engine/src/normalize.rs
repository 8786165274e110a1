//! Canonicalizes uploads into the 2:1 equirectangular shape the viewer expects.
//!
//! Images that are already exactly 2:1 pass through byte-for-byte. Anything
//! else is centered on a black canvas padded along the short axis only, so
//! the original pixels are never scaled or cropped.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use panoedit_contracts::version::{MEDIA_TYPE_JPEG, MEDIA_TYPE_PNG, MEDIA_TYPE_WEBP};
use panoedit_contracts::Version;

use crate::error::NormalizationError;

/// Largest canvas edge we agree to allocate.
pub const MAX_CANVAS_EDGE: u32 = 32_768;

const JPEG_QUALITY: u8 = 92;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingPlan {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

pub fn is_panoramic(width: u32, height: u32) -> bool {
    height > 0 && u64::from(width) == 2 * u64::from(height)
}

/// Canvas geometry for a `width` x `height` source, or `None` when the
/// source is already 2:1.
///
/// Wider sources keep their width and gain rows top and bottom; an odd width
/// gets one extra column so the result stays exactly 2:1. Taller sources keep
/// their height and gain columns left and right. Offsets are floored halves.
pub fn plan_padding(width: u32, height: u32) -> Result<Option<PaddingPlan>, NormalizationError> {
    if width == 0 || height == 0 {
        return Err(NormalizationError::Surface { width, height });
    }
    if is_panoramic(width, height) {
        return Ok(None);
    }

    let (w, h) = (u64::from(width), u64::from(height));
    let (canvas_w, canvas_h) = if w > 2 * h {
        let even_w = w + (w % 2);
        (even_w, even_w / 2)
    } else {
        (2 * h, h)
    };

    let surface_error = || NormalizationError::Surface {
        width: u32::try_from(canvas_w).unwrap_or(u32::MAX),
        height: u32::try_from(canvas_h).unwrap_or(u32::MAX),
    };
    let canvas_width = u32::try_from(canvas_w).map_err(|_| surface_error())?;
    let canvas_height = u32::try_from(canvas_h).map_err(|_| surface_error())?;
    if canvas_width > MAX_CANVAS_EDGE || canvas_height > MAX_CANVAS_EDGE {
        return Err(surface_error());
    }

    Ok(Some(PaddingPlan {
        canvas_width,
        canvas_height,
        offset_x: (canvas_width - width) / 2,
        offset_y: (canvas_height - height) / 2,
    }))
}

/// Decodes `content` and returns the 2:1 version seeded into history.
///
/// The declared media type is only a decoding hint when the bytes cannot be
/// sniffed. Output keeps the source encoding for PNG, JPEG and WebP and
/// falls back to PNG for anything else.
pub fn normalize(content: &[u8], media_type: &str) -> Result<Version, NormalizationError> {
    let (decoded, format) = decode(content, media_type)?;
    let (width, height) = (decoded.width(), decoded.height());
    let stable = stable_format(format);

    let Some(plan) = plan_padding(width, height)? else {
        if stable == format {
            return Ok(Version::new(content.to_vec(), media_type_for(stable)));
        }
        let bytes = encode(&decoded, stable)?;
        return Ok(Version::new(bytes, media_type_for(stable)));
    };

    let mut canvas = RgbaImage::from_pixel(
        plan.canvas_width,
        plan.canvas_height,
        Rgba([0, 0, 0, 255]),
    );
    imageops::overlay(
        &mut canvas,
        &decoded.to_rgba8(),
        i64::from(plan.offset_x),
        i64::from(plan.offset_y),
    );
    let bytes = encode(&DynamicImage::ImageRgba8(canvas), stable)?;
    Ok(Version::new(bytes, media_type_for(stable)))
}

fn decode(
    content: &[u8],
    media_type: &str,
) -> Result<(DynamicImage, ImageFormat), NormalizationError> {
    let format = match image::guess_format(content) {
        Ok(format) => format,
        Err(err) => ImageFormat::from_mime_type(media_type.trim())
            .ok_or(NormalizationError::Decode(err))?,
    };
    let decoded = image::load_from_memory_with_format(content, format)
        .map_err(NormalizationError::Decode)?;
    Ok((decoded, format))
}

fn stable_format(format: ImageFormat) -> ImageFormat {
    match format {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP => format,
        _ => ImageFormat::Png,
    }
}

fn media_type_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => MEDIA_TYPE_JPEG,
        ImageFormat::WebP => MEDIA_TYPE_WEBP,
        _ => MEDIA_TYPE_PNG,
    }
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, NormalizationError> {
    let mut bytes = Vec::new();
    if format == ImageFormat::Jpeg {
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
        encoder
            .encode_image(&image.to_rgb8())
            .map_err(NormalizationError::Encode)?;
        return Ok(bytes);
    }
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .map_err(NormalizationError::Encode)?;
    Ok(bytes)
}
