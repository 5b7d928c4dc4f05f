//! Retention, search and storage limits for retired notifications.

#[allow(clippy::module_inception)]
mod archive;
mod models;
mod token_index;

pub use archive::{Archive, ARCHIVE_KEY_PREFIX, DAY_MS};
pub use models::{ArchivePage, ArchiveQuery, ArchiveStats, ArchivedNotification};
pub use token_index::{tokenize, TokenIndex};
