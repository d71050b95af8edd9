//! Command-line entry point for the terminal assistant using clap.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tokio::io::BufReader;

use crate::app::App;
use crate::config::{load_settings, load_settings_from, normalize_base_url, validate_settings, Settings};

/// Environment variables that mark an active Python environment.
const PYTHON_ENV_VARS: &[&str] = &["VIRTUAL_ENV", "CONDA_PREFIX"];

/// Terminal AI Assistant - chat with a local Ollama model and run your scripts.
#[derive(Parser, Debug, Default)]
#[command(name = "term-assistant")]
#[command(version)]
#[command(about = "Terminal AI Assistant powered by Ollama", long_about = None)]
pub struct Cli {
    /// Model to chat with
    #[arg(short, long)]
    pub model: Option<String>,

    /// Directory containing runnable scripts
    #[arg(short, long)]
    pub scripts_dir: Option<PathBuf>,

    /// Directory where conversations are archived
    #[arg(short, long)]
    pub archive_dir: Option<PathBuf>,

    /// Ollama server URL
    #[arg(long, env = "OLLAMA_HOST")]
    pub base_url: Option<String>,

    /// Seconds a script may run before it is killed
    #[arg(long, value_name = "SECS")]
    pub script_timeout: Option<u64>,

    /// Do not archive conversations automatically
    #[arg(long)]
    pub no_auto_archive: bool,

    /// Skip the Python virtual environment check
    #[arg(long)]
    pub skip_env_check: bool,

    /// Settings file to use instead of ~/.term-assistant/settings.json
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Run the interactive assistant until the user leaves.
    pub async fn run(self) -> Result<()> {
        let settings = self.settings()?;
        tracing::debug!("Effective settings: {:?}", settings);

        if !self.skip_env_check {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            let proceed = confirm_environment(active_python_env(), &mut stdin.lock(), &mut stdout)?;
            if !proceed {
                bail!("Aborted: no Python virtual environment is active");
            }
        }

        let mut app = App::from_settings(&settings).context("Failed to start the assistant")?;
        if let Some(warning) = app.probe_backend().await {
            println!("{}", warning);
        }

        let input = BufReader::new(tokio::io::stdin());
        let mut stdout = std::io::stdout();
        app.run(input, &mut stdout).await?;
        Ok(())
    }

    /// Settings file overlaid with command-line flags.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from(path)?,
            None => load_settings()?,
        };
        self.apply(&mut settings);
        validate_settings(&settings)?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(dir) = &self.scripts_dir {
            settings.scripts.dir = dir.clone();
        }
        if let Some(dir) = &self.archive_dir {
            settings.archive.dir = dir.clone();
        }
        if let Some(url) = &self.base_url {
            settings.ollama.base_url = normalize_base_url(url);
        }
        if let Some(secs) = self.script_timeout {
            settings.scripts.timeout_secs = secs;
        }
        if self.no_auto_archive {
            settings.archive.auto_archive = false;
        }
    }
}

/// Path of the active Python environment, if any.
pub fn active_python_env() -> Option<String> {
    PYTHON_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
}

/// Warn when no Python environment is active and ask whether to go on.
pub fn confirm_environment<R: BufRead, W: Write>(
    env: Option<String>,
    input: &mut R,
    out: &mut W,
) -> Result<bool> {
    if let Some(path) = env {
        tracing::debug!("Python environment: {}", path);
        return Ok(true);
    }

    writeln!(out, "⚠️  WARNING: No virtual environment detected!")?;
    writeln!(out, "Python scripts will run with whatever interpreter is first on PATH.")?;
    writeln!(out, "Activate one with: source venv/bin/activate")?;
    write!(out, "Continue anyway? (y/N): ")?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn flags_override_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"model": "mistral", "archive": {"dir": "/tmp/a"}}"#).unwrap();

        let cli = Cli::parse_from([
            "term-assistant",
            "--config",
            path.to_str().unwrap(),
            "-m",
            "codellama",
            "--base-url",
            "gpu-box:11434",
            "--script-timeout",
            "5",
            "--no-auto-archive",
        ]);
        let settings = cli.settings().unwrap();

        assert_eq!(settings.model, "codellama");
        assert_eq!(settings.archive.dir, PathBuf::from("/tmp/a"));
        assert_eq!(settings.ollama.base_url, "http://gpu-box:11434");
        assert_eq!(settings.scripts.timeout_secs, 5);
        assert!(!settings.archive.auto_archive);
    }

    #[test]
    fn zero_timeout_flag_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let cli = Cli {
            config: Some(temp_dir.path().join("missing.json")),
            script_timeout: Some(0),
            ..Cli::default()
        };
        assert!(cli.settings().is_err());
    }

    #[test]
    fn environment_prompt() {
        let mut out = Vec::new();
        assert!(confirm_environment(Some("/venv".into()), &mut Cursor::new(""), &mut out).unwrap());
        assert!(out.is_empty());

        assert!(confirm_environment(None, &mut Cursor::new("y\n"), &mut out).unwrap());
        assert!(String::from_utf8(out.clone()).unwrap().contains("Continue anyway? (y/N)"));

        assert!(confirm_environment(None, &mut Cursor::new("YES\n"), &mut Vec::new()).unwrap());
        assert!(!confirm_environment(None, &mut Cursor::new("\n"), &mut Vec::new()).unwrap());
        assert!(!confirm_environment(None, &mut Cursor::new(""), &mut Vec::new()).unwrap());
        assert!(!confirm_environment(None, &mut Cursor::new("nope\n"), &mut Vec::new()).unwrap());
    }
}
