use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Initial,
    Editing,
    Loading,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initial => "INITIAL",
            SessionState::Editing => "EDITING",
            SessionState::Loading => "LOADING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single transient message surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum PendingMessage {
    Error(String),
    Clarification(String),
}

impl PendingMessage {
    pub fn text(&self) -> &str {
        match self {
            PendingMessage::Error(text) | PendingMessage::Clarification(text) => text,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, PendingMessage::Error(_))
    }
}
