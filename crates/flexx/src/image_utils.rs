//! Helpers for the base64 images that clients attach to chat messages.
//!
//! Images arrive either as bare base64 or as data URLs (`data:<mime>;base64,<payload>`).
//! None of these helpers fail: undecodable input degrades to `false` or to `image/jpeg`.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageError, ImageFormat, ImageReader};

const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Return the base64 payload of `data`, dropping a `data:...,` prefix if present
fn payload(data: &str) -> &str {
    if data.starts_with("data:") {
        data.split_once(',').map_or(data, |(_, rest)| rest)
    } else {
        data
    }
}

fn decode(data: &str) -> Option<Vec<u8>> {
    let cleaned: String = payload(data)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    STANDARD.decode(cleaned).ok()
}

/// Check whether `data` holds a base64 encoded image with a well formed header
///
/// Only the container header is read, pixel data is left to the provider. Formats that
/// are recognised by their magic bytes but have no codec compiled in count as valid.
pub fn is_valid_image(data: &str) -> bool {
    let Some(bytes) = decode(data) else {
        return false;
    };

    let Ok(reader) = ImageReader::new(Cursor::new(bytes)).with_guessed_format() else {
        return false;
    };
    if reader.format().is_none() {
        return false;
    }

    match reader.into_dimensions() {
        Ok((width, height)) => width > 0 && height > 0,
        Err(ImageError::Unsupported(_)) => true,
        Err(_) => false,
    }
}

/// Detect the MIME type of a base64 encoded image
///
/// Data URLs report the MIME type they declare. Anything else is sniffed from
/// its magic bytes, falling back to `image/jpeg`.
pub fn detect_mime_type(data: &str) -> String {
    if let Some(rest) = data.strip_prefix("data:") {
        if let Some((mime_type, _)) = rest.split_once(';') {
            return mime_type.to_string();
        }
    }

    let format = decode(data).and_then(|bytes| image::guess_format(&bytes).ok());
    let mime_type = match format {
        Some(ImageFormat::Jpeg) => "image/jpeg",
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::WebP) => "image/webp",
        _ => DEFAULT_MIME_TYPE,
    };
    mime_type.to_string()
}

/// Make sure image data is in data URL form, detecting the MIME type when missing
pub fn ensure_data_url(data: &str) -> String {
    if data.starts_with("data:") {
        return data.to_string();
    }

    format!("data:{};base64,{}", detect_mime_type(data), data)
}

/// Split a base64 data URL into its MIME type and payload
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some((mime_type, data))
}
