//! Session archives: one JSON file per session.

pub mod record;
pub mod store;

pub use record::{ArchiveRecord, ArchiveSummary};
pub use store::ArchiveManager;
