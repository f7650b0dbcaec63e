use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use thiserror::Error;

use crate::admission::u64_env;
use crate::error::ApiError;

/// Hard ceiling on the decoded input payload.
const MAX_INPUT_BYTES: usize = 5 * 1024 * 1024; // 5 MiB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("image payload is not valid base64")]
    Malformed,
    #[error("unsupported image type")]
    Unsupported,
    #[error("image payload too large")]
    TooLarge,
    #[error("image could not be compressed to the target size")]
    CannotFit,
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MediaConfig {
    /// Stored payloads are recompressed down to at most this many bytes.
    pub target_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            target_bytes: 256 * 1024,
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Self {
        Self {
            target_bytes: u64_env("RBB_IMAGE_TARGET_KB", 256) as usize * 1024,
        }
    }
}

/// Validate an incoming base64 (or `data:` URL) picture payload and return
/// the base64 of the bytes to store, recompressed when over the target size.
pub fn process_payload(payload: &str, cfg: &MediaConfig) -> Result<String, MediaError> {
    let bytes = B64
        .decode(strip_data_url(payload).trim())
        .map_err(|_| MediaError::Malformed)?;
    if bytes.is_empty() {
        return Err(MediaError::Malformed);
    }
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(MediaError::TooLarge);
    }
    let mime = infer::get(&bytes)
        .map(|t| t.mime_type())
        .ok_or(MediaError::Unsupported)?;
    if !ALLOWED_MIME.contains(&mime) {
        return Err(MediaError::Unsupported);
    }
    if bytes.len() <= cfg.target_bytes {
        return Ok(B64.encode(&bytes));
    }
    let compressed = recompress(&bytes, cfg.target_bytes)?;
    log::info!(
        "recompressed image payload {} -> {} bytes",
        bytes.len(),
        compressed.len()
    );
    Ok(B64.encode(&compressed))
}

fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        match payload.find("base64,") {
            Some(i) => &payload[i + "base64,".len()..],
            None => payload,
        }
    } else {
        payload
    }
}

/// Stepped JPEG quality first, then halving downscales.
fn recompress(bytes: &[u8], target: usize) -> Result<Vec<u8>, MediaError> {
    let decoded = image::load_from_memory(bytes).map_err(|_| MediaError::Malformed)?;
    // JPEG has no alpha channel
    let mut img = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
    loop {
        for quality in [80u8, 60, 40, 25] {
            let mut out = Cursor::new(Vec::new());
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
                .map_err(|_| MediaError::CannotFit)?;
            let buf = out.into_inner();
            if buf.len() <= target {
                return Ok(buf);
            }
        }
        let (w, h) = (img.width(), img.height());
        if w <= 64 || h <= 64 {
            return Err(MediaError::CannotFit);
        }
        img = img.resize(w / 2, h / 2, FilterType::Triangle);
    }
}
