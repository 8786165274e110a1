use std::sync::Arc;

use panoedit_contracts::catalog::{MAX_SUGGESTIONS, SUGGESTION_INSTRUCTION};
use panoedit_contracts::events::{EventLog, EventPayload};
use panoedit_contracts::version::MEDIA_TYPE_PNG;
use panoedit_contracts::Version;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::{EditRequest, GenerativeBackend, SuggestionRequest};
use crate::error::ProtocolError;

/// Classified result of one edit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Image(Version),
    Clarification(String),
    Empty,
}

impl EditOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Clarification(_) => "clarification",
            Self::Empty => "empty",
        }
    }
}

/// Sends (image, instruction) to a backend and classifies the reply.
///
/// An image part always wins over accompanying text. Text without an image
/// is a clarifying question. A reply with neither is `Empty`, which callers
/// treat as a refusal.
#[derive(Clone)]
pub struct EditRequestProtocol {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
}

impl EditRequestProtocol {
    pub fn new(backend: Arc<dyn GenerativeBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn request_edit(
        &self,
        image: &Version,
        instruction: &str,
    ) -> Result<EditOutcome, ProtocolError> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(ProtocolError::EmptyInstruction);
        }
        let reply = self.backend.edit(&EditRequest {
            model: self.model.clone(),
            image: image.clone(),
            instruction: instruction.to_string(),
        })?;

        if let Some(inline) = reply.image.filter(|inline| !inline.bytes.is_empty()) {
            let media_type = inline
                .media_type
                .map(|value| value.trim().to_ascii_lowercase())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| MEDIA_TYPE_PNG.to_string());
            return Ok(EditOutcome::Image(Version::new(inline.bytes, media_type)));
        }
        match reply.text.map(|text| text.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(EditOutcome::Clarification(text)),
            _ => Ok(EditOutcome::Empty),
        }
    }
}

/// Best-effort prompt suggestions for an image.
///
/// Never fails: any transport or parse problem is logged against the session
/// that asked and yields an empty list, so callers keep whatever defaults they
/// already show.
#[derive(Clone)]
pub struct SuggestionProtocol {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
    events: EventLog,
}

impl SuggestionProtocol {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        model: impl Into<String>,
        events: EventLog,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            events,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `session_id` is the session the request was made for, which may no
    /// longer be the log's current session by the time a failure is logged.
    pub fn suggest(&self, image: &Version, session_id: &str) -> Vec<String> {
        let raw = match self.backend.suggest(&SuggestionRequest {
            model: self.model.clone(),
            image: image.clone(),
            instruction: SUGGESTION_INSTRUCTION.to_string(),
        }) {
            Ok(raw) => raw,
            Err(err) => {
                self.log_failure(session_id, &err.to_string());
                return Vec::new();
            }
        };
        match parse_suggestions(&raw) {
            Ok(prompts) => prompts,
            Err(reason) => {
                self.log_failure(session_id, &reason);
                Vec::new()
            }
        }
    }

    fn log_failure(&self, session_id: &str, reason: &str) {
        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), json!(session_id));
        payload.insert("model".to_string(), json!(self.model));
        payload.insert("error".to_string(), json!(reason));
        let _ = self.events.emit("suggestions_failed", payload);
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionReply {
    prompts: Vec<Value>,
}

/// Extracts the `prompts` list from a suggestion reply, keeping at most five
/// entries. Non-string entries are skipped; strings are kept as sent.
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>, String> {
    let reply: SuggestionReply = serde_json::from_str(raw.trim())
        .map_err(|err| format!("suggestion reply could not be parsed: {err}"))?;
    Ok(reply
        .prompts
        .iter()
        .filter_map(Value::as_str)
        .take(MAX_SUGGESTIONS)
        .map(str::to_string)
        .collect())
}
