//! Conversation tracking for the active session.
//!
//! Handles:
//! - Timestamped chat messages
//! - The session (id, model, start time) those messages belong to
//! - Append/clear of the in-memory history

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Prefix of every session id and archive file stem.
pub const SESSION_PREFIX: &str = "session_";

/// Who authored a message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::InvalidArgument(format!(
                "unknown message role '{}' (expected user or assistant)",
                other
            ))),
        }
    }
}

/// A single chat message. Never mutated after it is appended.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One continuous run of the assistant with its own history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub id: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    /// Start an empty session whose id is derived from the current time.
    pub fn new(model: &str) -> Self {
        let created_at = Utc::now();
        Self {
            id: Self::id_for(created_at),
            model: model.to_string(),
            created_at,
            messages: Vec::new(),
        }
    }

    /// Start an empty session with an explicit id.
    pub fn with_id(id: impl Into<String>, model: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            model: model.to_string(),
            created_at,
            messages: Vec::new(),
        }
    }

    /// `session_YYYYMMDD_HHMMSS` in local time.
    pub fn id_for(created_at: DateTime<Utc>) -> String {
        format!(
            "{}{}",
            SESSION_PREFIX,
            created_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
        )
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Owns the active session and its ordered message sequence.
pub struct ConversationManager {
    session: Session,
}

impl ConversationManager {
    /// Create a manager with a fresh session for `model`.
    pub fn new(model: &str) -> Self {
        Self {
            session: Session::new(model),
        }
    }

    /// Create a manager around an existing session.
    pub fn with_session(session: Session) -> Self {
        Self { session }
    }

    /// Append a message and return the stored record.
    ///
    /// Timestamps never go backwards within a session, even if the wall
    /// clock does.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Message {
        let mut timestamp = Utc::now();
        if let Some(last) = self.session.messages.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }

        let message = Message {
            role,
            content: content.into(),
            timestamp,
        };
        self.session.messages.push(message.clone());
        message
    }

    /// Append with a role given as text, e.g. from an imported file.
    pub fn append_str(&mut self, role: &str, content: impl Into<String>) -> Result<Message> {
        let role = role.parse::<Role>()?;
        Ok(self.append(role, content))
    }

    /// Messages in insertion order.
    pub fn history(&self) -> &[Message] {
        &self.session.messages
    }

    /// Empty the in-memory history. Archives on disk are not touched.
    pub fn clear(&mut self) {
        self.session.messages.clear();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Make `session` the active one and return the previous session.
    pub fn replace_session(&mut self, session: Session) -> Session {
        tracing::debug!(
            "Switching active session {} -> {} ({} messages)",
            self.session.id,
            session.id,
            session.messages.len()
        );
        std::mem::replace(&mut self.session, session)
    }

    /// Record the model name used for subsequent messages.
    pub fn set_model(&mut self, model: &str) {
        self.session.model = model.to_string();
    }

    pub fn len(&self) -> usize {
        self.session.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order_and_timestamps() {
        let mut mgr = ConversationManager::new("llama3.2");

        for i in 0..25 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let stored = mgr.append(role, format!("message {}", i));
            assert_eq!(stored.content, format!("message {}", i));
        }

        let history = mgr.history();
        assert_eq!(history.len(), 25);
        for (i, msg) in history.iter().enumerate() {
            assert_eq!(msg.content, format!("message {}", i));
        }
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_clear_empties_history() {
        let mut mgr = ConversationManager::new("llama3.2");
        mgr.append(Role::User, "hi");
        mgr.append(Role::Assistant, "hello");

        let id = mgr.session().id.clone();
        mgr.clear();

        assert!(mgr.history().is_empty());
        assert_eq!(mgr.session().id, id);
    }

    #[test]
    fn test_invalid_role_is_invalid_argument() {
        let mut mgr = ConversationManager::new("llama3.2");
        let err = mgr.append_str("system", "nope").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(mgr.is_empty());

        let msg = mgr.append_str("Assistant", "ok").unwrap();
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_session_id_format() {
        let session = Session::new("llama3.2");
        assert!(session.id.starts_with(SESSION_PREFIX));
        // session_ + YYYYMMDD_HHMMSS
        assert_eq!(session.id.len(), SESSION_PREFIX.len() + 15);
    }

    #[test]
    fn test_message_serialization_shape() {
        let mut mgr = ConversationManager::new("llama3.2");
        let msg = mgr.append(Role::User, "hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hi");
        assert!(value["timestamp"].is_string());
    }
}
