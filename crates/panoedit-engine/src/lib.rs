pub mod backend;
pub mod dryrun;
pub mod error;
pub mod gemini;
pub mod normalize;
pub mod protocol;
pub mod session;
pub mod upload;

pub use backend::{default_backend_registry, BackendConfig, BackendRegistry, GenerativeBackend};
pub use error::{
    BackendError, NormalizationError, ProtocolError, SessionError, UploadError, ValidationError,
};
pub use normalize::normalize;
pub use protocol::{EditOutcome, EditRequestProtocol, SuggestionProtocol};
pub use session::{CompletedEdit, EditSession, EditTicket, SessionConfig, SubmitOutcome};
pub use upload::{fetch_upload, looks_like_url, read_upload, Upload};
