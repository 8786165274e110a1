pub mod catalog;
pub mod chat;
pub mod events;
pub mod history;
pub mod models;
pub mod session;
pub mod version;
pub mod view;

pub use history::{HistoryError, HistoryStore};
pub use session::{PendingMessage, SessionState};
pub use version::Version;
pub use view::ViewMode;
