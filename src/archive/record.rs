//! On-disk form of an archived session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::{Message, Session};

/// A persisted session plus metadata.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArchiveRecord {
    pub session_id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ArchiveRecord {
    /// Snapshot `session` as of now.
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            model: session.model.clone(),
            created_at: session.created_at,
            last_updated: Utc::now(),
            message_count: session.messages.len(),
            messages: session.messages.clone(),
        }
    }

    /// Rebuild the session. The stored count is advisory; the messages win.
    pub fn into_session(self) -> Session {
        Session {
            id: self.session_id,
            model: self.model,
            created_at: self.created_at,
            messages: self.messages,
        }
    }
}

/// What `list_archives` reports for each file.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveSummary {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
    pub path: PathBuf,
}

impl ArchiveSummary {
    pub fn from_record(record: &ArchiveRecord, path: PathBuf) -> Self {
        Self {
            id: record.session_id.clone(),
            model: record.model.clone(),
            created_at: record.created_at,
            last_updated: record.last_updated,
            message_count: record.messages.len(),
            path,
        }
    }
}

/// Accepted shapes for a manual import: a full record, or the bare
/// message array older exports wrote.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ImportFile {
    Record(ArchiveRecord),
    Messages(Vec<Message>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConversationManager, Role};

    #[test]
    fn test_record_recomputes_count_from_messages() {
        let mut mgr = ConversationManager::new("llama3.2");
        mgr.append(Role::User, "hi");

        let mut record = ArchiveRecord::from_session(mgr.session());
        record.message_count = 99;

        let summary = ArchiveSummary::from_record(&record, PathBuf::from("x.json"));
        assert_eq!(summary.message_count, 1);
        assert_eq!(record.into_session().messages.len(), 1);
    }

    #[test]
    fn test_import_accepts_bare_message_array() {
        let json = r#"[{"role":"user","content":"hi","timestamp":"2024-05-01T10:00:00Z"}]"#;
        match serde_json::from_str::<ImportFile>(json).unwrap() {
            ImportFile::Messages(messages) => assert_eq!(messages.len(), 1),
            ImportFile::Record(_) => panic!("expected bare messages"),
        }
    }
}
