use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;

/// Shrink oversized screenshots before they are uploaded. Images within
/// 1920x1080 are passed through untouched; larger ones are scaled to fit and
/// re-encoded as JPEG.
pub fn prepare_for_upload(data_url: &str) -> Result<String, String> {
    let (_mime, payload) = split_data_url(data_url)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| format!("screenshot is not valid base64: {}", e))?;
    let img = image::load_from_memory(&bytes).map_err(|e| format!("screenshot decode: {}", e))?;

    let (w, h) = (img.width(), img.height());
    if w <= MAX_WIDTH && h <= MAX_HEIGHT {
        return Ok(data_url.to_string());
    }

    let scale = (MAX_WIDTH as f64 / w as f64).min(MAX_HEIGHT as f64 / h as f64);
    let (new_w, new_h) = (
        ((w as f64 * scale) as u32).max(1),
        ((h as f64 * scale) as u32).max(1),
    );
    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| format!("screenshot encode: {}", e))?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(out.into_inner())))
}

fn split_data_url(data_url: &str) -> Result<(&str, &str), String> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| "screenshot is not a data URL".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no payload".to_string())?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
    Ok((mime, payload))
}
