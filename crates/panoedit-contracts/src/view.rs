use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which side of the local before/after comparison is on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewMode {
    Original,
    #[default]
    Edited,
}

impl ViewMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::Original => "original",
            ViewMode::Edited => "edited",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Original => ViewMode::Edited,
            ViewMode::Edited => ViewMode::Original,
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" | "before" => Ok(ViewMode::Original),
            "edited" | "after" => Ok(ViewMode::Edited),
            other => Err(format!("unknown view mode '{other}'")),
        }
    }
}

/// Maps the cursor and view mode to the history index to display.
///
/// `Original` is one step back on the current branch, clamped at the root,
/// not the first upload. Returns `None` when nothing can be shown.
pub fn resolve<T>(history: &[T], cursor: usize, mode: ViewMode) -> Option<usize> {
    if cursor >= history.len() {
        return None;
    }
    match mode {
        ViewMode::Edited => Some(cursor),
        ViewMode::Original => Some(cursor.saturating_sub(1)),
    }
}

/// The comparison toggle only means something once there is a predecessor.
pub fn can_compare(cursor: usize) -> bool {
    cursor > 0
}
