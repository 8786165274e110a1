use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use panoedit_contracts::Version;

use crate::dryrun::DryrunBackend;
use crate::error::BackendError;
use crate::gemini::GeminiBackend;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: f64 = 120.0;

/// Connection settings handed to backends at construction.
///
/// Backends never consult the environment themselves; callers build this
/// once (usually through [`BackendConfig::from_env`]) and pass it in.
#[derive(Clone, PartialEq)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.api_key =
            non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"));
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            config = config.with_api_base(&base);
        }
        if let Some(timeout) = non_empty_env("PANOEDIT_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0)
        {
            config.request_timeout = Duration::from_secs_f64(timeout);
        }
        config
    }

    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        if let Some(key) = api_key.map(str::trim).filter(|value| !value.is_empty()) {
            self.api_key = Some(key.to_string());
        }
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        let trimmed = api_base.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            self.api_base = trimmed.to_string();
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub model: String,
    pub image: Version,
    pub instruction: String,
}

#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub model: String,
    pub image: Version,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub media_type: Option<String>,
}

/// Decoded edit response before classification. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditReply {
    pub image: Option<InlineImage>,
    pub text: Option<String>,
}

pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn edit(&self, request: &EditRequest) -> Result<EditReply, BackendError>;

    /// Returns the raw JSON text the model produced for a suggestion request.
    fn suggest(&self, request: &SuggestionRequest) -> Result<String, BackendError>;
}

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn GenerativeBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerativeBackend + 'static>(&mut self, backend: B) {
        self.register_shared(Arc::new(backend));
    }

    pub fn register_shared(&mut self, backend: Arc<dyn GenerativeBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn GenerativeBackend>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &BackendConfig) -> BackendRegistry {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiBackend::new(config.clone()));
    backends
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
