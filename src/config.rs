//! Configuration loading for the terminal assistant.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::providers::{ollama::DEFAULT_BASE_URL, DEFAULT_SYSTEM_PROMPT};

pub type Result<T> = std::result::Result<T, Error>;

/// Get the assistant home directory (~/.term-assistant).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".term-assistant"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.term-assistant/settings.json, or defaults when
/// the file does not exist.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load settings from `path`, or defaults when it does not exist.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Invalid settings file {}: {}", path.display(), e))
    })?;

    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.model.trim().is_empty() {
        return Err(Error::Config("model must not be empty".to_string()));
    }
    if settings.scripts.timeout_secs == 0 {
        return Err(Error::Config("scripts.timeout_secs must be greater than zero".to_string()));
    }
    if !settings.ollama.base_url.starts_with("http://")
        && !settings.ollama.base_url.starts_with("https://")
    {
        return Err(Error::Config(format!(
            "ollama.base_url '{}' must start with http:// or https://",
            settings.ollama.base_url
        )));
    }
    Ok(())
}

/// Accept `host:port` the way `OLLAMA_HOST` is usually written.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Ollama backend configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OllamaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OllamaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scripts configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScriptsConfig {
    #[serde(default = "default_scripts_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_script_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("./scripts")
}

fn default_script_timeout_secs() -> u64 {
    30
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: default_scripts_dir(),
            timeout_secs: default_script_timeout_secs(),
        }
    }
}

impl ScriptsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Archive configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_auto_archive")]
    pub auto_archive: bool,
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("./conversations")
}

fn default_auto_archive() -> bool {
    true
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: default_archive_dir(),
            auto_archive: default_auto_archive(),
        }
    }
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_system_prompt() -> Option<String> {
    Some(DEFAULT_SYSTEM_PROMPT.to_string())
}

/// Assistant settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    /// `null` disables the system prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            ollama: OllamaConfig::default(),
            scripts: ScriptsConfig::default(),
            archive: ArchiveConfig::default(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = load_settings_from(&temp_dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.model, "llama3.2");
        assert_eq!(settings.ollama.base_url, "http://localhost:11434");
        assert_eq!(settings.scripts.timeout_secs, 30);
        assert_eq!(settings.archive.dir, PathBuf::from("./conversations"));
        assert!(settings.archive.auto_archive);
        assert!(settings.system_prompt.is_some());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"model": "mistral", "scripts": {"timeout_secs": 5}, "system_prompt": null}"#,
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.model, "mistral");
        assert_eq!(settings.scripts.timeout(), Duration::from_secs(5));
        assert_eq!(settings.scripts.dir, PathBuf::from("./scripts"));
        assert!(settings.system_prompt.is_none());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        std::fs::write(&path, r#"{"scripts": {"timeout_secs": 0}}"#).unwrap();
        assert!(matches!(load_settings_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, r#"{"ollama": {"base_url": "localhost:11434"}}"#).unwrap();
        assert!(matches!(load_settings_from(&path), Err(Error::Config(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn base_url_normalization() {
        assert_eq!(normalize_base_url("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_base_url("https://gpu.local/"), "https://gpu.local");
    }
}
