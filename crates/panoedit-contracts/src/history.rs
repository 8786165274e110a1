use thiserror::Error;

use crate::version::Version;
use crate::view::{self, ViewMode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history already holds an original; reset before seeding again")]
    AlreadySeeded,
    #[error("history is empty; seed an original first")]
    Empty,
    #[error("version index {index} out of range (history has {len} versions)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered version sequence with a movable cursor.
///
/// Index 0 is always the normalized upload. Appending from a non-tip cursor
/// truncates everything after the cursor first; there is no redo once that
/// happens. The view mode lives here because every cursor move resets it.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    versions: Vec<Version>,
    cursor: usize,
    view_mode: ViewMode,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, version: Version) -> Result<(), HistoryError> {
        if !self.versions.is_empty() {
            return Err(HistoryError::AlreadySeeded);
        }
        self.versions.push(version);
        self.cursor = 0;
        self.view_mode = ViewMode::Edited;
        Ok(())
    }

    /// Appends after the cursor, discarding any abandoned forward branch.
    /// Returns the index of the new version, which is also the new cursor.
    pub fn append(&mut self, version: Version) -> Result<usize, HistoryError> {
        if self.versions.is_empty() {
            return Err(HistoryError::Empty);
        }
        self.versions.truncate(self.cursor + 1);
        self.versions.push(version);
        self.cursor = self.versions.len() - 1;
        self.view_mode = ViewMode::Edited;
        Ok(self.cursor)
    }

    pub fn select(&mut self, index: usize) -> Result<(), HistoryError> {
        if index >= self.versions.len() {
            return Err(HistoryError::IndexOutOfRange {
                index,
                len: self.versions.len(),
            });
        }
        self.cursor = index;
        self.view_mode = ViewMode::Edited;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.versions.clear();
        self.cursor = 0;
        self.view_mode = ViewMode::Edited;
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn get(&self, index: usize) -> Option<&Version> {
        self.versions.get(index)
    }

    pub fn original(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn current(&self) -> Option<&Version> {
        self.versions.get(self.cursor)
    }

    pub fn can_compare(&self) -> bool {
        !self.versions.is_empty() && view::can_compare(self.cursor)
    }

    pub fn displayed_index(&self) -> Option<usize> {
        view::resolve(&self.versions, self.cursor, self.view_mode)
    }

    pub fn displayed(&self) -> Option<&Version> {
        self.displayed_index()
            .and_then(|index| self.versions.get(index))
    }
}
