//! Slash-command parsing.
//!
//! Every command is declared once in [`COMMANDS`]. The processor indexes
//! that table at startup and rejects duplicate tokens, so per-line parsing
//! is a single map lookup.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Lines starting with this character are commands.
pub const COMMAND_PREFIX: char = '/';

/// Dispatch target of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Help,
    ListScripts,
    ExecuteScript,
    Save,
    Load,
    ClearHistory,
    ShowHistory,
    ChangeModel,
    ShowInfo,
    Quit,
    ArchiveStatus,
    ListArchives,
    ViewArchive,
    ToggleAutoArchive,
    ManualSave,
    ClearSession,
    ResumeArchive,
}

/// Whether a command takes an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Optional,
    Required,
}

/// Static description of one command.
#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub arity: Arity,
    pub usage: &'static str,
    pub summary: &'static str,
    pub archive: bool,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::Help,
        name: "help",
        aliases: &["h"],
        arity: Arity::None,
        usage: "/help",
        summary: "Show this help message",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ListScripts,
        name: "scripts",
        aliases: &["s", "list-scripts"],
        arity: Arity::None,
        usage: "/scripts",
        summary: "List available scripts",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ExecuteScript,
        name: "execute",
        aliases: &["exec", "x"],
        arity: Arity::Required,
        usage: "/execute <script>",
        summary: "Execute a script",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::Save,
        name: "save",
        aliases: &[],
        arity: Arity::Optional,
        usage: "/save [filename]",
        summary: "Export the conversation to a file",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::Load,
        name: "load",
        aliases: &[],
        arity: Arity::Required,
        usage: "/load <filename>",
        summary: "Import a conversation from a file",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ClearHistory,
        name: "clear",
        aliases: &["c"],
        arity: Arity::None,
        usage: "/clear",
        summary: "Clear conversation history",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ShowHistory,
        name: "history",
        aliases: &["hist"],
        arity: Arity::None,
        usage: "/history",
        summary: "Show conversation history",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ChangeModel,
        name: "model",
        aliases: &["m"],
        arity: Arity::Optional,
        usage: "/model [name]",
        summary: "Change AI model (no name: list installed models)",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ShowInfo,
        name: "info",
        aliases: &["i"],
        arity: Arity::None,
        usage: "/info",
        summary: "Show assistant info",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::Quit,
        name: "quit",
        aliases: &["q", "exit"],
        arity: Arity::None,
        usage: "/quit",
        summary: "Exit the assistant",
        archive: false,
    },
    CommandSpec {
        kind: CommandKind::ArchiveStatus,
        name: "archive",
        aliases: &["a"],
        arity: Arity::None,
        usage: "/archive",
        summary: "Show archive status",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ListArchives,
        name: "archive-list",
        aliases: &["al"],
        arity: Arity::None,
        usage: "/archive-list",
        summary: "List archived conversations",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ViewArchive,
        name: "archive-view",
        aliases: &["av"],
        arity: Arity::Required,
        usage: "/archive-view <id>",
        summary: "View an archived conversation (id, list number or part of an id)",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ToggleAutoArchive,
        name: "archive-toggle",
        aliases: &["at"],
        arity: Arity::None,
        usage: "/archive-toggle",
        summary: "Toggle auto-archiving on/off",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ManualSave,
        name: "archive-save",
        aliases: &["as"],
        arity: Arity::None,
        usage: "/archive-save",
        summary: "Save the current conversation to the archive now",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ClearSession,
        name: "archive-clear",
        aliases: &["ac"],
        arity: Arity::None,
        usage: "/archive-clear",
        summary: "Close the current session and start a new one",
        archive: true,
    },
    CommandSpec {
        kind: CommandKind::ResumeArchive,
        name: "archive-resume",
        aliases: &["ar"],
        arity: Arity::Required,
        usage: "/archive-resume <id>",
        summary: "Resume an archived conversation",
        archive: true,
    },
];

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub kind: CommandKind,
    pub args: String,
}

impl Invocation {
    /// Arguments, or `None` when none were given.
    pub fn arg(&self) -> Option<&str> {
        if self.args.is_empty() {
            None
        } else {
            Some(&self.args)
        }
    }
}

/// What a line of input turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Empty,
    Chat(&'a str),
    Command(Invocation),
}

/// Maps command tokens to table entries.
pub struct CommandProcessor {
    index: HashMap<&'static str, &'static CommandSpec>,
}

impl CommandProcessor {
    /// Index [`COMMANDS`].
    pub fn new() -> Result<Self> {
        Self::from_table(COMMANDS)
    }

    /// Index `table`, rejecting duplicate or non-lowercase tokens.
    pub fn from_table(table: &'static [CommandSpec]) -> Result<Self> {
        let mut index = HashMap::new();
        for spec in table {
            for token in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
                if token.is_empty() || token.chars().any(|c| c.is_uppercase() || c.is_whitespace()) {
                    return Err(Error::Config(format!("invalid command token '{}'", token)));
                }
                if let Some(existing) = index.insert(*token, spec) {
                    return Err(Error::Config(format!(
                        "command token '{}' used by both {:?} and {:?}",
                        token, existing.kind, spec.kind
                    )));
                }
            }
        }
        Ok(Self { index })
    }

    /// Classify a raw input line.
    ///
    /// Non-prefixed text is returned untouched as chat.
    pub fn parse<'a>(&self, line: &'a str) -> Result<Input<'a>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Input::Empty);
        }
        let Some(rest) = trimmed.strip_prefix(COMMAND_PREFIX) else {
            return Ok(Input::Chat(line));
        };

        let (token, args) = match rest.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args.trim()),
            None => (rest, ""),
        };
        let token = token.to_lowercase();

        let spec = self
            .index
            .get(token.as_str())
            .ok_or_else(|| Error::UnknownCommand(format!("{}{}", COMMAND_PREFIX, token)))?;

        match spec.arity {
            Arity::None if !args.is_empty() => {
                return Err(Error::InvalidArgument(format!(
                    "{} takes no arguments",
                    spec.usage
                )))
            }
            Arity::Required if args.is_empty() => {
                return Err(Error::InvalidArgument(format!("usage: {}", spec.usage)))
            }
            _ => {}
        }

        Ok(Input::Command(Invocation {
            kind: spec.kind,
            args: args.to_string(),
        }))
    }

    /// Help text generated from the table.
    pub fn help(&self) -> String {
        let mut out = String::from("Available commands:\n");
        render_section(&mut out, COMMANDS.iter().filter(|c| !c.archive));
        out.push_str("\nArchive commands:\n");
        render_section(&mut out, COMMANDS.iter().filter(|c| c.archive));
        out.push_str("\nJust type your message to chat with the AI assistant.\n");
        out
    }
}

fn render_section<'a>(out: &mut String, specs: impl Iterator<Item = &'a CommandSpec>) {
    for spec in specs {
        let mut label = spec.usage.to_string();
        if !spec.aliases.is_empty() {
            let aliases: Vec<String> = spec
                .aliases
                .iter()
                .map(|a| format!("{}{}", COMMAND_PREFIX, a))
                .collect();
            label = format!("{} ({})", label, aliases.join(", "));
        }
        out.push_str(&format!("  {:<40} {}\n", label, spec.summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(processor: &CommandProcessor, line: &str) -> Invocation {
        match processor.parse(line).unwrap() {
            Input::Command(inv) => inv,
            other => panic!("expected command for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_table_is_valid_and_complete() {
        let processor = CommandProcessor::new().unwrap();
        assert_eq!(COMMANDS.len(), 17);
        let help = processor.help();
        for spec in COMMANDS {
            assert!(help.contains(spec.usage), "help misses {}", spec.usage);
        }
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        static DUP: &[CommandSpec] = &[
            CommandSpec {
                kind: CommandKind::Help,
                name: "help",
                aliases: &["h"],
                arity: Arity::None,
                usage: "/help",
                summary: "",
                archive: false,
            },
            CommandSpec {
                kind: CommandKind::ShowHistory,
                name: "history",
                aliases: &["h"],
                arity: Arity::None,
                usage: "/history",
                summary: "",
                archive: false,
            },
        ];
        assert!(matches!(CommandProcessor::from_table(DUP), Err(Error::Config(_))));
    }

    #[test]
    fn test_case_insensitive_with_aliases() {
        let processor = CommandProcessor::new().unwrap();
        assert_eq!(command(&processor, "/HELP").kind, CommandKind::Help);
        assert_eq!(command(&processor, "  /Hist ").kind, CommandKind::ShowHistory);
        assert_eq!(command(&processor, "/q").kind, CommandKind::Quit);
        assert_eq!(command(&processor, "/AL").kind, CommandKind::ListArchives);
    }

    #[test]
    fn test_arguments_keep_their_case() {
        let processor = CommandProcessor::new().unwrap();
        let inv = command(&processor, "/execute  Backup.SH ");
        assert_eq!(inv.kind, CommandKind::ExecuteScript);
        assert_eq!(inv.arg(), Some("Backup.SH"));

        let inv = command(&processor, "/save");
        assert_eq!(inv.arg(), None);
        let inv = command(&processor, "/save My Notes.json");
        assert_eq!(inv.arg(), Some("My Notes.json"));
    }

    #[test]
    fn test_unknown_and_malformed_commands() {
        let processor = CommandProcessor::new().unwrap();
        let err = processor.parse("/frobnicate now").unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(ref c) if c == "/frobnicate"));
        assert!(err.hint().unwrap().contains("/help"));

        assert!(matches!(processor.parse("/load"), Err(Error::InvalidArgument(_))));
        assert!(matches!(processor.parse("/quit now"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_plain_text_is_chat_verbatim() {
        let processor = CommandProcessor::new().unwrap();
        assert_eq!(processor.parse("  hi there ").unwrap(), Input::Chat("  hi there "));
        assert_eq!(processor.parse("what does /help do?").unwrap(), Input::Chat("what does /help do?"));
        assert_eq!(processor.parse("   ").unwrap(), Input::Empty);
    }
}
