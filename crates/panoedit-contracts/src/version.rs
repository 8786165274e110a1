use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

pub const MEDIA_TYPE_JPEG: &str = "image/jpeg";
pub const MEDIA_TYPE_PNG: &str = "image/png";
pub const MEDIA_TYPE_WEBP: &str = "image/webp";

/// Media types accepted at the upload boundary.
pub const UPLOAD_MEDIA_TYPES: &[&str] = &[MEDIA_TYPE_JPEG, MEDIA_TYPE_PNG, MEDIA_TYPE_WEBP];

/// One immutable image in the session history.
///
/// The payload is reference counted so a version can be handed to a worker
/// thread without copying the image bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Version {
    content: Arc<[u8]>,
    media_type: String,
}

impl Version {
    pub fn new(content: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media_type: media_type.into(),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        hex::encode(hasher.finalize())
    }

    pub fn short_id(&self) -> String {
        self.digest().chars().take(12).collect()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_media_type(&self.media_type)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("media_type", &self.media_type)
            .field("bytes", &self.content.len())
            .finish()
    }
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.trim().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

pub fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim().to_ascii_lowercase().as_str() {
        "png" => Some(MEDIA_TYPE_PNG),
        "jpg" | "jpeg" => Some(MEDIA_TYPE_JPEG),
        "webp" => Some(MEDIA_TYPE_WEBP),
        _ => None,
    }
}

pub fn is_upload_media_type(media_type: &str) -> bool {
    let lowered = media_type.trim().to_ascii_lowercase();
    UPLOAD_MEDIA_TYPES.iter().any(|accepted| *accepted == lowered)
}

/// Timeline label for a history position.
pub fn version_label(index: usize) -> String {
    if index == 0 {
        "Original".to_string()
    } else {
        format!("Edit {index}")
    }
}
