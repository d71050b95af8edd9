//! Error types for the terminal assistant.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot reach the model server: {0}")]
    Connection(String),

    #[error("Model '{0}' is not installed on the server")]
    ModelNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Script '{script}' timed out after {}s", .after.as_secs_f32())]
    Timeout { script: String, after: Duration },

    #[error("Unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a filesystem failure on `path` as a persistence error.
    pub fn persistence(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::Persistence(format!("{}: {}", path.display(), err))
    }

    /// An actionable follow-up shown under the error message, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::Connection(_) => {
                Some("Make sure Ollama is running (`ollama serve`) and the base URL is correct.".to_string())
            }
            Error::ModelNotFound(model) => Some(format!(
                "Install it with `ollama pull {}` or pick another one with /model <name>.",
                model
            )),
            Error::NotFound(_) => Some("Use /archive-list to see available sessions.".to_string()),
            Error::Timeout { .. } => {
                Some("The script was terminated. Raise --script-timeout if it needs longer.".to_string())
            }
            Error::UnsupportedScriptType(_) => {
                Some("Supported extensions: .py, .sh, .bat, .ps1".to_string())
            }
            Error::UnknownCommand(_) => Some("Type /help for available commands.".to_string()),
            Error::Persistence(_) => {
                Some("The conversation continues in memory; it was not written to disk.".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_hint_names_pull_command() {
        let err = Error::ModelNotFound("mistral".to_string());
        assert_eq!(err.to_string(), "Model 'mistral' is not installed on the server");
        assert!(err.hint().unwrap().contains("ollama pull mistral"));
    }

    #[test]
    fn timeout_is_distinct_from_script_failure() {
        let timeout = Error::Timeout {
            script: "slow.sh".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(timeout.to_string(), "Script 'slow.sh' timed out after 30s");
        assert!(timeout.hint().is_some());
        assert!(Error::Script("boom".to_string()).hint().is_none());
    }
}
