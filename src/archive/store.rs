//! Archive storage - per-session JSON files with atomic replacement.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::{ConversationManager, Session, SESSION_PREFIX};
use crate::error::{Error, Result};

use super::record::{ArchiveRecord, ArchiveSummary, ImportFile};

/// Suffix of the scratch file a persist writes before renaming.
const TMP_SUFFIX: &str = ".tmp";

/// Archive manager.
///
/// Owns the archive directory, the auto-archive switch and the file the
/// active session is currently bound to.
pub struct ArchiveManager {
    dir: PathBuf,
    auto_archive: bool,
    current_file: Option<PathBuf>,
}

impl ArchiveManager {
    /// Open (creating if needed) the archive directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::Persistence(format!(
                "archive path {} exists and is not a directory",
                dir.display()
            )));
        }
        fs::create_dir_all(&dir).map_err(|e| Error::persistence(&dir, e))?;

        Ok(Self {
            dir,
            auto_archive: true,
            current_file: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn auto_archive(&self) -> bool {
        self.auto_archive
    }

    /// Turn per-message persistence on or off.
    pub fn enable_auto_archive(&mut self, enabled: bool) {
        self.auto_archive = enabled;
        tracing::info!(
            "Auto-archive {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Flip auto-archive and return the new state.
    pub fn toggle_auto_archive(&mut self) -> bool {
        self.enable_auto_archive(!self.auto_archive);
        self.auto_archive
    }

    /// File the active session was last written to.
    pub fn current_file(&self) -> Option<&Path> {
        self.current_file.as_deref()
    }

    /// Deterministic file path for a session id.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// A new empty session whose id does not collide with an existing archive.
    pub fn fresh_session(&self, model: &str) -> Session {
        let mut session = Session::new(model);
        let base = session.id.clone();
        let mut n = 2;
        while self.path_for(&session.id).exists() {
            session.id = format!("{}_{}", base, n);
            n += 1;
        }
        session
    }

    /// Forget the current file binding and return it.
    ///
    /// The file itself stays on disk; the next persist goes wherever the
    /// next session's id points.
    pub fn detach(&mut self) -> Option<PathBuf> {
        self.current_file.take()
    }

    /// Persist `session` if auto-archive is on. Returns the file written.
    pub fn on_append(&mut self, session: &Session) -> Result<Option<PathBuf>> {
        if !self.auto_archive {
            return Ok(None);
        }
        self.persist(session).map(Some)
    }

    /// Write the full session to its archive file, replacing any previous
    /// version. Readers see either the old file or the new one.
    pub fn persist(&mut self, session: &Session) -> Result<PathBuf> {
        let path = self.path_for(&session.id);
        let record = ArchiveRecord::from_session(session);
        write_record(&path, &record)?;

        tracing::debug!(
            "Archived {} messages of {} to {}",
            record.message_count,
            session.id,
            path.display()
        );
        self.current_file = Some(path.clone());
        Ok(path)
    }

    /// All readable archives, most recently created first.
    ///
    /// Ties on `created_at` are broken by id, descending. Files that fail to
    /// parse are skipped with a warning.
    pub fn list_archives(&self) -> Result<Vec<ArchiveSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            SESSION_PREFIX
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| Error::Other(format!("invalid archive pattern {}: {}", pattern, e)))?;

        let mut summaries = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping unreadable archive entry: {}", e);
                    continue;
                }
            };
            match read_record(&path) {
                Ok(record) => summaries.push(ArchiveSummary::from_record(&record, path)),
                Err(e) => tracing::warn!("Skipping archive {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// Find the archive file for `key`.
    ///
    /// `key` is an exact id, a 1-based index into `list_archives()`, or a
    /// substring matching exactly one id.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument(
                "a session id or list number is required".to_string(),
            ));
        }
        if key.contains('/') || key.contains('\\') {
            return Err(Error::InvalidArgument(format!(
                "'{}' is not a session id",
                key
            )));
        }

        let exact = self.path_for(key);
        if exact.is_file() {
            return Ok(exact);
        }

        let archives = self.list_archives()?;

        if key.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = key.parse::<usize>() {
                if (1..=archives.len()).contains(&index) {
                    return Ok(archives[index - 1].path.clone());
                }
            }
        }

        let matches: Vec<&ArchiveSummary> =
            archives.iter().filter(|a| a.id.contains(key)).collect();
        match matches.as_slice() {
            [] => Err(Error::NotFound(format!("session '{}'", key))),
            [only] => Ok(only.path.clone()),
            many => Err(Error::InvalidArgument(format!(
                "'{}' matches several sessions: {}",
                key,
                many.iter()
                    .map(|a| a.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Read the full archive record for `key`.
    pub fn read(&self, key: &str) -> Result<ArchiveRecord> {
        let path = self.resolve(key)?;
        read_record(&path)
    }

    /// Load the archived session for `key`.
    pub fn view(&self, key: &str) -> Result<Session> {
        Ok(self.read(key)?.into_session())
    }

    /// Make the archived session the active one and keep archiving into
    /// the same file.
    pub fn resume(
        &mut self,
        key: &str,
        conversation: &mut ConversationManager,
    ) -> Result<ArchiveSummary> {
        let path = self.resolve(key)?;
        let record = read_record(&path)?;
        let summary = ArchiveSummary::from_record(&record, path.clone());

        let mut session = record.into_session();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            session.id = stem.to_string();
        }
        conversation.replace_session(session);
        self.current_file = Some(path);

        tracing::info!(
            "Resumed session {} with {} messages",
            summary.id,
            summary.message_count
        );
        Ok(summary)
    }

    /// Export `session` to an arbitrary file, independent of auto-archive.
    pub fn save_as(&self, path: &Path, session: &Session) -> Result<PathBuf> {
        let record = ArchiveRecord::from_session(session);
        write_record(path, &record)?;
        tracing::info!("Exported {} messages to {}", record.message_count, path.display());
        Ok(path.to_path_buf())
    }

    /// Import a session exported by `save_as` (or a bare message array).
    pub fn load(&self, path: &Path) -> Result<Session> {
        let content = fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
        let import: ImportFile = serde_json::from_str(&content)
            .map_err(|e| Error::persistence(path, format!("not a conversation file ({})", e)))?;

        let session = match import {
            ImportFile::Record(record) => record.into_session(),
            ImportFile::Messages(messages) => {
                let created_at = messages
                    .first()
                    .map(|m| m.timestamp)
                    .unwrap_or_else(chrono::Utc::now);
                let mut session = Session::with_id(Session::id_for(created_at), "", created_at);
                session.messages = messages;
                session
            }
        };
        tracing::info!("Imported {} messages from {}", session.messages.len(), path.display());
        Ok(session)
    }
}

fn read_record(path: &Path) -> Result<ArchiveRecord> {
    let content = fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::persistence(path, format!("corrupt archive ({})", e)))
}

fn write_record(path: &Path, record: &ArchiveRecord) -> Result<()> {
    let content = serde_json::to_string_pretty(record)?;
    write_atomic(path, content.as_bytes())
}

/// Write to a sibling scratch file, sync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
        fs::remove_file(&tmp).ok();
        return Err(Error::persistence(path, e));
    }
    Ok(())
}
