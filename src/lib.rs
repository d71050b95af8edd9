//! Terminal AI assistant library root.

pub mod app;
pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod providers;
pub mod scripts;

pub use app::App;
pub use archive::{ArchiveManager, ArchiveRecord, ArchiveSummary};
pub use cli::Cli;
pub use commands::{CommandKind, CommandProcessor};
pub use config::{load_settings, Settings};
pub use crate::core::{ConversationManager, Message, Role, Session};
pub use error::{Error, Result};
pub use providers::{AiClient, OllamaProvider, Provider};
pub use scripts::{ScriptExecutor, ScriptKind, ScriptOutput};
