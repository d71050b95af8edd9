//! Core module - the active conversation.
//!
//! Messages, sessions and the manager that owns the active session.
//! Persistence lives in `archive`; this module never touches the disk.

pub mod conversation;

pub use conversation::{ConversationManager, Message, Role, Session, SESSION_PREFIX};
