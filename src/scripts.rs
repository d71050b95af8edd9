//! Script discovery and execution.
//!
//! Scripts live flat in one directory. The file extension selects the
//! interpreter; anything else is rejected before a process is spawned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

#[cfg(windows)]
const PYTHON: &str = "python";
#[cfg(not(windows))]
const PYTHON: &str = "python3";

const NO_ARGS: &[&str] = &[];
const BATCH_ARGS: &[&str] = &["/C"];
const POWERSHELL_ARGS: &[&str] = &["-ExecutionPolicy", "Bypass", "-File"];

/// Known script types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    Python,
    Shell,
    Batch,
    PowerShell,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 4] = [
        ScriptKind::Python,
        ScriptKind::Shell,
        ScriptKind::Batch,
        ScriptKind::PowerShell,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ScriptKind::Python => "py",
            ScriptKind::Shell => "sh",
            ScriptKind::Batch => "bat",
            ScriptKind::PowerShell => "ps1",
        }
    }

    /// Program and leading arguments; the script path is appended last.
    pub fn invocation(self) -> (&'static str, &'static [&'static str]) {
        match self {
            ScriptKind::Python => (PYTHON, NO_ARGS),
            ScriptKind::Shell => ("bash", NO_ARGS),
            ScriptKind::Batch => ("cmd", BATCH_ARGS),
            ScriptKind::PowerShell => ("powershell", POWERSHELL_ARGS),
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.extension().eq_ignore_ascii_case(ext))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| Error::UnsupportedScriptType(path.display().to_string()))
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::Python => write!(f, "python"),
            ScriptKind::Shell => write!(f, "shell"),
            ScriptKind::Batch => write!(f, "batch"),
            ScriptKind::PowerShell => write!(f, "powershell"),
        }
    }
}

/// A script found in the scripts directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub kind: ScriptKind,
}

impl ScriptDescriptor {
    /// Describe the file at `path`, failing on an unknown extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let kind = ScriptKind::from_path(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, path, kind })
    }
}

/// Captured result of a finished script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for ScriptOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => writeln!(f, "Exit code: {}", code)?,
            None => writeln!(f, "Exit code: (terminated by signal)")?,
        }
        if !self.stdout.is_empty() {
            writeln!(f, "STDOUT:\n{}", self.stdout.trim_end())?;
        }
        if !self.stderr.is_empty() {
            writeln!(f, "STDERR:\n{}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

/// Non-recursive scan of `dir` for files with a known extension, sorted by name.
pub fn list_scripts(dir: &Path) -> Result<Vec<ScriptDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(descriptor) = ScriptDescriptor::from_path(path) {
            scripts.push(descriptor);
        }
    }
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}

/// Runs scripts from one directory under a time limit.
pub struct ScriptExecutor {
    dir: PathBuf,
    timeout: Duration,
}

impl ScriptExecutor {
    /// Use `dir`, creating it when missing. A non-directory path is an error.
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::Config(format!(
                "scripts path {} exists and is not a directory",
                dir.display()
            )));
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn list_scripts(&self) -> Result<Vec<ScriptDescriptor>> {
        list_scripts(&self.dir)
    }

    /// Look up a script by file name.
    pub fn resolve(&self, name: &str) -> Result<ScriptDescriptor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("a script name is required".to_string()));
        }
        if name.contains('/') || name.contains('\\') || name == ".." {
            return Err(Error::InvalidArgument(format!(
                "'{}' must be a file name inside {}",
                name,
                self.dir.display()
            )));
        }

        let descriptor = ScriptDescriptor::from_path(self.dir.join(name))?;
        if !descriptor.path.is_file() {
            return Err(Error::NotFound(format!(
                "script '{}' in {}",
                name,
                self.dir.display()
            )));
        }
        Ok(descriptor)
    }

    /// Resolve `name` and run it with the configured timeout.
    pub async fn run(&self, name: &str) -> Result<ScriptOutput> {
        let descriptor = self.resolve(name)?;
        execute(&descriptor, self.timeout).await
    }
}

/// Run `descriptor` and wait up to `timeout`.
///
/// On expiry the whole process group is killed and reaped, and
/// `Error::Timeout` is returned.
pub async fn execute(descriptor: &ScriptDescriptor, timeout: Duration) -> Result<ScriptOutput> {
    let (program, args) = descriptor.kind.invocation();

    let mut std_cmd = std::process::Command::new(program);
    std_cmd
        .args(args)
        .arg(&descriptor.path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }
    let mut cmd = Command::from(std_cmd);
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        Error::Script(format!(
            "failed to start {} for {}: {}",
            program, descriptor.name, e
        ))
    })?;
    tracing::debug!(
        "Spawned {} ({}) as pid {:?}",
        descriptor.name,
        descriptor.kind,
        child.id()
    );

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status
                .map_err(|e| Error::Script(format!("waiting for {}: {}", descriptor.name, e)))?;
            let output = ScriptOutput {
                exit_code: status.code(),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
            };
            tracing::info!("Script {} exited with {:?}", descriptor.name, output.exit_code);
            Ok(output)
        }
        Err(_) => {
            terminate(&mut child).await;
            stdout.abort();
            stderr.abort();
            tracing::warn!(
                "Script {} exceeded {:?} and was terminated",
                descriptor.name,
                timeout
            );
            Err(Error::Timeout {
                script: descriptor.name.clone(),
                after: timeout,
            })
        }
    }
}

fn capture<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::warn!("Failed to read script output: {}", e);
            }
        }
        buf
    })
}

async fn collect(handle: JoinHandle<Vec<u8>>) -> String {
    match handle.await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("Output reader failed: {}", e);
            String::new()
        }
    }
}

/// Kill the child and anything it started, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The child leads its own process group (see `process_group(0)`).
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
            if rc != 0 {
                tracing::debug!(
                    "killpg({}) failed: {}",
                    pid,
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill script process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ScriptKind::from_extension("py"), Some(ScriptKind::Python));
        assert_eq!(ScriptKind::from_extension("PS1"), Some(ScriptKind::PowerShell));
        assert_eq!(ScriptKind::from_extension("txt"), None);
        assert_eq!(ScriptKind::Batch.invocation(), ("cmd", &["/C"][..]));
    }

    #[test]
    fn test_list_scripts_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["b.sh", "a.py", "c.ps1", "d.bat", "notes.txt", "Makefile"] {
            fs::write(temp_dir.path().join(name), "").unwrap();
        }
        fs::create_dir(temp_dir.path().join("nested.sh")).unwrap();

        let scripts = list_scripts(temp_dir.path()).unwrap();
        let names: Vec<&str> = scripts.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.py", "b.sh", "c.ps1", "d.bat"]);
        assert_eq!(scripts[0].kind, ScriptKind::Python);
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_scripts(&temp_dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_extension_fails_before_spawn() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("ran");
        fs::write(
            temp_dir.path().join("notes.txt"),
            format!("touch {}", marker.display()),
        )
        .unwrap();

        let executor = ScriptExecutor::new(temp_dir.path(), Duration::from_secs(5)).unwrap();
        let err = executor.run("notes.txt").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedScriptType(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_script_and_bad_names() {
        let temp_dir = TempDir::new().unwrap();
        let executor = ScriptExecutor::new(temp_dir.path(), Duration::from_secs(5)).unwrap();

        assert!(matches!(executor.run("nope.sh").await, Err(Error::NotFound(_))));
        assert!(matches!(executor.run("../x.sh").await, Err(Error::InvalidArgument(_))));
        assert!(matches!(executor.run("  ").await, Err(Error::InvalidArgument(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_script_captures_output() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("greet.sh"),
            "echo hello\necho oops >&2\nexit 3\n",
        )
        .unwrap();

        let executor = ScriptExecutor::new(temp_dir.path(), Duration::from_secs(10)).unwrap();
        let output = executor.run("greet.sh").await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert!(!output.success());

        let rendered = output.to_string();
        assert!(rendered.starts_with("Exit code: 3\n"));
        assert!(rendered.contains("STDOUT:\nhello"));
        assert!(rendered.contains("STDERR:\noops"));
    }

    #[cfg(target_os = "linux")]
    fn is_alive(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
            // Field 3 is the state; zombies are already dead.
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map(|state| state != "Z")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_script_and_children() {
        let temp_dir = TempDir::new().unwrap();
        let parent_pid = temp_dir.path().join("parent.pid");
        let child_pid = temp_dir.path().join("child.pid");
        fs::write(
            temp_dir.path().join("hang.sh"),
            format!(
                "echo $$ > {}\nsleep 30 &\necho $! > {}\nwait\n",
                parent_pid.display(),
                child_pid.display()
            ),
        )
        .unwrap();

        let executor = ScriptExecutor::new(temp_dir.path(), Duration::from_millis(500)).unwrap();
        let started = Instant::now();
        let err = executor.run("hang.sh").await.unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));

        let parent = fs::read_to_string(&parent_pid).unwrap();
        assert!(!is_alive(&parent));

        let child = fs::read_to_string(&child_pid).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while is_alive(&child) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_alive(&child));
    }
}
