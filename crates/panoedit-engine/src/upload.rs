use std::path::Path;
use std::time::Duration;

use image::ImageFormat;
use panoedit_contracts::version::{
    is_upload_media_type, media_type_for_extension, MEDIA_TYPE_JPEG, MEDIA_TYPE_PNG,
    MEDIA_TYPE_WEBP,
};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;

use crate::error::UploadError;

const FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Raw image bytes handed to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub source: String,
}

pub fn read_upload(path: &Path) -> Result<Upload, UploadError> {
    let bytes = std::fs::read(path)?;
    let media_type = sniff_media_type(&bytes)
        .or_else(|| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .and_then(media_type_for_extension)
        })
        .unwrap_or("application/octet-stream");
    accept(bytes, media_type, path.display().to_string())
}

pub fn fetch_upload(http: &HttpClient, url: &str) -> Result<Upload, UploadError> {
    let response = http
        .get(url)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECONDS))
        .send()
        .map_err(|err| UploadError::Fetch(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(UploadError::Status(status.as_u16()));
    }
    let declared = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty());
    let bytes = response
        .bytes()
        .map_err(|err| UploadError::Fetch(err.to_string()))?
        .to_vec();

    let media_type = match declared {
        Some(value) if is_upload_media_type(&value) => value,
        Some(value) if value != "application/octet-stream" => {
            return Err(UploadError::UnsupportedMediaType(value));
        }
        _ => sniff_media_type(&bytes)
            .unwrap_or("application/octet-stream")
            .to_string(),
    };
    accept(bytes, &media_type, url.to_string())
}

pub fn looks_like_url(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn accept(bytes: Vec<u8>, media_type: &str, source: String) -> Result<Upload, UploadError> {
    if !is_upload_media_type(media_type) {
        return Err(UploadError::UnsupportedMediaType(media_type.to_string()));
    }
    Ok(Upload {
        bytes,
        media_type: media_type.trim().to_ascii_lowercase(),
        source,
    })
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some(MEDIA_TYPE_PNG),
        ImageFormat::Jpeg => Some(MEDIA_TYPE_JPEG),
        ImageFormat::WebP => Some(MEDIA_TYPE_WEBP),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        _ => None,
    }
}
