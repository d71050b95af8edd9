//! The interactive chat loop.
//!
//! `App` owns every manager explicitly and handles one input line at a
//! time: parse, dispatch, render. Every recoverable error is rendered as
//! text here; nothing below this layer prints.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::archive::{ArchiveManager, ArchiveRecord};
use crate::commands::{CommandKind, CommandProcessor, Input, Invocation};
use crate::config::Settings;
use crate::core::{ConversationManager, Message, Role};
use crate::error::{Error, Result};
use crate::providers::{AiClient, OllamaProvider};
use crate::scripts::ScriptExecutor;

const HISTORY_PREVIEW: usize = 100;
const ARCHIVE_PREVIEW: usize = 200;
const RULE_WIDTH: usize = 50;

/// Result of handling one line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub output: String,
    pub quit: bool,
}

impl Reply {
    fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            quit: false,
        }
    }
}

pub struct App {
    conversation: ConversationManager,
    archive: ArchiveManager,
    scripts: ScriptExecutor,
    ai: AiClient,
    commands: CommandProcessor,
}

impl App {
    /// Wire up the managers and start a fresh session.
    pub fn new(ai: AiClient, archive: ArchiveManager, scripts: ScriptExecutor) -> Result<Self> {
        let commands = CommandProcessor::new()?;
        let session = archive.fresh_session(ai.model());
        tracing::info!("Starting session {} with model {}", session.id, ai.model());

        Ok(Self {
            conversation: ConversationManager::with_session(session),
            archive,
            scripts,
            ai,
            commands,
        })
    }

    /// Build the app against the Ollama backend described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = OllamaProvider::with_timeout(
            settings.ollama.base_url.clone(),
            settings.ollama.request_timeout(),
        );
        let ai = AiClient::new(Arc::new(provider), settings.model.clone())
            .with_system_prompt(settings.system_prompt.clone());

        let mut archive = ArchiveManager::new(&settings.archive.dir)?;
        archive.enable_auto_archive(settings.archive.auto_archive);

        let scripts = ScriptExecutor::new(&settings.scripts.dir, settings.scripts.timeout())?;

        Self::new(ai, archive, scripts)
    }

    pub fn conversation(&self) -> &ConversationManager {
        &self.conversation
    }

    pub fn archive(&self) -> &ArchiveManager {
        &self.archive
    }

    pub fn ai(&self) -> &AiClient {
        &self.ai
    }

    /// Warn (without failing) when the backend does not answer.
    pub async fn probe_backend(&self) -> Option<String> {
        if self.ai.probe().await {
            return None;
        }
        let err = Error::Connection(format!(
            "{} backend did not respond; chat will fail until it is running",
            self.ai.provider_name()
        ));
        tracing::warn!("{}", err);
        Some(render_error(&err))
    }

    /// Handle one raw input line.
    pub async fn handle_line(&mut self, line: &str) -> Reply {
        let parsed = match self.commands.parse(line) {
            Ok(parsed) => parsed,
            Err(e) => return Reply::text(render_error(&e)),
        };

        match parsed {
            Input::Empty => Reply::default(),
            Input::Chat(text) => Reply::text(self.chat(text).await),
            Input::Command(invocation) => {
                tracing::debug!("Command {:?} args={:?}", invocation.kind, invocation.args);
                match self.dispatch(&invocation).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!("Command {:?} failed: {}", invocation.kind, e);
                        Reply::text(render_error(&e))
                    }
                }
            }
        }
    }

    /// Append a message and archive it when auto-archive is on.
    ///
    /// A persistence failure comes back as a rendered warning; the message
    /// stays in memory either way.
    fn record(&mut self, role: Role, content: &str) -> (Message, Option<String>) {
        let message = self.conversation.append(role, content);
        let warning = match self.archive.on_append(self.conversation.session()) {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to archive {} message: {}", role, e);
                Some(format!("⚠ Failed to archive message. {}", render_error(&e)))
            }
        };
        (message, warning)
    }

    async fn chat(&mut self, text: &str) -> String {
        let mut notes = Vec::new();

        let (_, warning) = self.record(Role::User, text);
        notes.extend(warning);

        let reply = match self.ai.send(self.conversation.session()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Chat request failed: {}", e);
                notes.insert(0, render_error(&e));
                return notes.join("\n");
            }
        };

        let (_, warning) = self.record(Role::Assistant, &reply);
        notes.extend(warning);

        let mut out = format!("🤖 AI Assistant:\n{}", reply);
        let suggested = extract_script_suggestions(&reply);
        if !suggested.is_empty() {
            let rule = "=".repeat(RULE_WIDTH);
            out.push_str(&format!("\n\n{}\n", rule));
            for name in suggested {
                out.push_str(&format!(
                    "The AI suggested running '{}'. Use '/execute {}' to run it.\n",
                    name, name
                ));
            }
            out.push_str(&rule);
        }
        for note in notes {
            out.push('\n');
            out.push_str(&note);
        }
        out
    }

    async fn dispatch(&mut self, invocation: &Invocation) -> Result<Reply> {
        let arg = invocation.arg();
        let output = match invocation.kind {
            CommandKind::Help => self.commands.help(),
            CommandKind::ListScripts => self.render_scripts()?,
            CommandKind::ExecuteScript => {
                let name = arg.unwrap_or_default();
                let output = self.scripts.run(name).await?;
                output.to_string()
            }
            CommandKind::Save => self.save(arg)?,
            CommandKind::Load => self.load(arg.unwrap_or_default())?,
            CommandKind::ClearHistory => {
                self.conversation.clear();
                if self.archive.current_file().is_some() {
                    self.start_new_session();
                }
                "Conversation history cleared".to_string()
            }
            CommandKind::ShowHistory => self.render_history(),
            CommandKind::ChangeModel => self.change_model(arg).await?,
            CommandKind::ShowInfo => self.render_info()?,
            CommandKind::Quit => {
                return Ok(Reply {
                    output: "Goodbye! 👋".to_string(),
                    quit: true,
                })
            }
            CommandKind::ArchiveStatus => self.render_archive_status(),
            CommandKind::ListArchives => self.render_archive_list()?,
            CommandKind::ViewArchive => {
                let record = self.archive.read(arg.unwrap_or_default())?;
                render_archive(&record)
            }
            CommandKind::ToggleAutoArchive => {
                if self.archive.toggle_auto_archive() {
                    if !self.conversation.is_empty() {
                        self.archive.persist(self.conversation.session())?;
                    }
                    "Auto-archiving enabled. Conversations will be saved automatically.".to_string()
                } else {
                    "Auto-archiving disabled. Conversations will not be saved automatically."
                        .to_string()
                }
            }
            CommandKind::ManualSave => {
                if self.conversation.is_empty() {
                    "No conversation to save.".to_string()
                } else {
                    let path = self.archive.persist(self.conversation.session())?;
                    format!("Conversation saved to: {}", file_name(&path))
                }
            }
            CommandKind::ClearSession => {
                let closed = self.start_new_session();
                let mut out =
                    "Current session cleared. New conversation will start fresh.".to_string();
                if let Some(path) = closed {
                    out.push_str(&format!("\nPrevious session kept in {}", file_name(&path)));
                }
                out
            }
            CommandKind::ResumeArchive => {
                let summary = self
                    .archive
                    .resume(arg.unwrap_or_default(), &mut self.conversation)?;
                let record = ArchiveRecord::from_session(self.conversation.session());
                format!(
                    "✅ Resumed conversation '{}' with {} messages.\n\n{}",
                    summary.id,
                    summary.message_count,
                    render_archive(&record)
                )
            }
        };
        Ok(Reply::text(output))
    }

    /// Replace the active session with an empty one under a new id.
    /// Returns the archive file the old session was bound to.
    fn start_new_session(&mut self) -> Option<PathBuf> {
        let closed = self.archive.detach();
        let session = self.archive.fresh_session(self.ai.model());
        let old = self.conversation.replace_session(session);
        tracing::info!(
            "Closed session {} ({} messages), started {}",
            old.id,
            old.messages.len(),
            self.conversation.session().id
        );
        closed
    }

    fn save(&self, filename: Option<&str>) -> Result<String> {
        let path = match filename {
            Some(name) => PathBuf::from(name),
            None => PathBuf::from(format!(
                "conversation_{}.json",
                Local::now().format("%Y%m%d_%H%M%S")
            )),
        };
        let path = self.archive.save_as(&path, self.conversation.session())?;
        Ok(format!("Conversation saved to {}", path.display()))
    }

    fn load(&mut self, filename: &str) -> Result<String> {
        let imported = self.archive.load(std::path::Path::new(filename))?;
        let count = imported.messages.len();

        self.archive.detach();
        let mut session = self.archive.fresh_session(self.ai.model());
        session.messages = imported.messages;
        self.conversation.replace_session(session);

        Ok(format!("Loaded {} messages from {}", count, filename))
    }

    async fn change_model(&mut self, name: Option<&str>) -> Result<String> {
        let Some(name) = name else {
            let mut out = format!("Current model: {}\n", self.ai.model());
            match self.ai.list_models().await {
                Ok(models) if models.is_empty() => out.push_str("No models installed."),
                Ok(models) => {
                    out.push_str("Installed models:\n");
                    out.push_str(&bullets(&models));
                }
                Err(e) => out.push_str(&render_error(&e)),
            }
            return Ok(out.trim_end().to_string());
        };

        self.ai.set_model(name)?;
        self.conversation.set_model(self.ai.model());
        Ok(format!("Model changed to {}", self.ai.model()))
    }

    fn render_scripts(&self) -> Result<String> {
        let scripts = self.scripts.list_scripts()?;
        if scripts.is_empty() {
            return Ok(format!("No scripts found in {}", self.scripts.dir().display()));
        }
        let lines: Vec<String> = scripts
            .iter()
            .map(|s| format!("{} ({})", s.name, s.kind))
            .collect();
        Ok(format!("Available scripts:\n{}", bullets(&lines).trim_end()))
    }

    fn render_history(&self) -> String {
        let history = self.conversation.history();
        if history.is_empty() {
            return "No conversation history".to_string();
        }
        let mut out = String::from("Conversation History:\n");
        for (i, msg) in history.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {}\n",
                i + 1,
                msg.role.as_str().to_uppercase(),
                truncate(&msg.content, HISTORY_PREVIEW)
            ));
        }
        out.trim_end().to_string()
    }

    fn render_info(&self) -> Result<String> {
        let script_count = self.scripts.list_scripts()?.len();
        Ok(format!(
            "Terminal AI Assistant\n\
             Model: {}\n\
             Scripts Directory: {}\n\
             Archive Directory: {}\n\
             Conversation Length: {} messages\n\
             Available Scripts: {}\n\
             Auto-Archive: {}\n\
             Current Session: {}",
            self.ai.model(),
            self.scripts.dir().display(),
            self.archive.dir().display(),
            self.conversation.len(),
            script_count,
            enabled(self.archive.auto_archive()),
            self.current_file_name()
        ))
    }

    fn render_archive_status(&self) -> String {
        format!(
            "Archive Status:\n\
             - Auto-Archive: {}\n\
             - Archive Directory: {}\n\
             - Current Session: {}\n\
             - Messages in Session: {}\n\
             \n\
             Use /help to see the archive commands.",
            enabled(self.archive.auto_archive()),
            self.archive.dir().display(),
            self.current_file_name(),
            self.conversation.len()
        )
    }

    fn render_archive_list(&self) -> Result<String> {
        let archives = self.archive.list_archives()?;
        if archives.is_empty() {
            return Ok("No archived conversations found".to_string());
        }
        let mut out = String::from("Archived Conversations:\n");
        for (i, a) in archives.iter().enumerate() {
            out.push_str(&format!("{:2}. {}\n", i + 1, a.id));
            out.push_str(&format!(
                "    Model: {} | Messages: {} | Started: {}\n",
                a.model,
                a.message_count,
                a.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ));
        }
        Ok(out.trim_end().to_string())
    }

    fn current_file_name(&self) -> String {
        self.archive
            .current_file()
            .map(file_name)
            .unwrap_or_else(|| "None".to_string())
    }

    /// Read lines from `input` until quit, end of input or Ctrl-C.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(out, "🤖 Terminal AI Assistant")?;
        writeln!(out, "Type '/help' for available commands or start chatting!")?;
        writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
        if self.archive.auto_archive() {
            writeln!(out, "📁 Auto-archiving enabled. Conversations will be saved automatically.")?;
        }

        let mut lines = input.lines();
        loop {
            write!(out, "\n> ")?;
            out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                writeln!(out, "\n\nGoodbye! 👋")?;
                break;
            };

            let reply = tokio::select! {
                reply = self.handle_line(&line) => reply,
                _ = tokio::signal::ctrl_c() => Reply::text("(interrupted)"),
            };
            if !reply.output.is_empty() {
                writeln!(out, "\n{}", reply.output)?;
            }
            if reply.quit {
                break;
            }
        }

        if self.archive.auto_archive() {
            if let Some(path) = self.archive.current_file() {
                writeln!(out, "📁 Final conversation saved to: {}", file_name(path))?;
            }
        }
        out.flush()?;
        tracing::info!("Session {} ended", self.conversation.session().id);
        Ok(())
    }
}

/// Script names the model asked to run via `[EXECUTE_SCRIPT:<name>]`.
pub fn extract_script_suggestions(response: &str) -> Vec<String> {
    let re = match Regex::new(r"\[EXECUTE_SCRIPT:\s*([^\]\s][^\]]*?)\s*\]") {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    re.captures_iter(response)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Message plus hint, as shown to the user.
pub fn render_error(err: &Error) -> String {
    match err.hint() {
        Some(hint) => format!("❌ {}\n   {}", err, hint),
        None => format!("❌ {}", err),
    }
}

fn render_archive(record: &ArchiveRecord) -> String {
    let mut out = format!(
        "Session: {}\nModel: {}\nMessages: {}\nStarted: {}\nLast Updated: {}\n{}\n\n",
        record.session_id,
        record.model,
        record.messages.len(),
        record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        record.last_updated.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(RULE_WIDTH)
    );
    for (i, msg) in record.messages.iter().enumerate() {
        out.push_str(&format!(
            "{:3}. [{}] {}\n     Time: {}\n\n",
            i + 1,
            msg.role.as_str().to_uppercase(),
            truncate(&msg.content, ARCHIVE_PREVIEW),
            msg.timestamp.to_rfc3339()
        ));
    }
    out.trim_end().to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn bullets(items: &[String]) -> String {
    items.iter().map(|i| format!("  - {}\n", i)).collect()
}

fn enabled(on: bool) -> &'static str {
    if on {
        "Enabled"
    } else {
        "Disabled"
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
