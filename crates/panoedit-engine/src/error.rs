use panoedit_contracts::models::NoModelAvailable;
use panoedit_contracts::HistoryError;
use thiserror::Error;

pub const GENERIC_BACKEND_MESSAGE: &str =
    "An unknown error occurred while processing the image.";

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("Could not read image file. It may be corrupt or in an unsupported format.")]
    Decode(#[source] image::ImageError),

    #[error("Could not process and pad the image ({width}x{height} surface unavailable).")]
    Surface { width: u32, height: u32 },

    #[error("Could not process and pad the image.")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported image type '{0}'; expected image/jpeg, image/png or image/webp")]
    UnsupportedMediaType(String),

    #[error("Failed to read the image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("Failed to fetch the image: {0}")]
    Fetch(String),
}

/// A failed backend call. `Display` is the message surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("No API key found. Set GEMINI_API_KEY (or pass --api-key) to use the {0} backend.")]
    MissingCredentials(String),

    #[error("{0}")]
    Transport(String),

    #[error("{message}")]
    Status { code: u16, message: String },

    #[error("{0}")]
    InvalidResponse(String),

    #[error("no backend registered under '{0}'")]
    UnknownBackend(String),
}

impl BackendError {
    /// Uses the backend's own message when it has one.
    pub fn from_message(message: Option<&str>) -> Self {
        let text = message
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(GENERIC_BACKEND_MESSAGE);
        BackendError::Transport(text.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("edit instruction is empty")]
    EmptyInstruction,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Local checks that reject an action before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no image is loaded")]
    NoImage,
    #[error("instruction is empty")]
    EmptyInstruction,
    #[error("an edit is already in progress")]
    Busy,
    #[error("no suggestion #{}", .0 + 1)]
    NoSuggestion(usize),
    #[error("comparison needs a previous version")]
    NothingToCompare,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Model(#[from] NoModelAvailable),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
