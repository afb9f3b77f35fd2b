//! File writes and sequential command execution under one root.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use hm_core::types::{CommandIntent, ExecOutcome, FileIntent};

/// Wall-clock deadline for one command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Bytes of combined output kept for a successful command.
const SUCCESS_TAIL: usize = 500;

/// Bytes of stderr kept for a failed command.
const FAILURE_TAIL: usize = 300;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// File write failures (permissions, full disk) propagate; they fail
    /// the task rather than being swallowed.
    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// WriteReport
// ---------------------------------------------------------------------------

/// What a batch of file intents produced.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Relative paths written, in intent order.
    pub written: Vec<String>,
    /// Relative paths dropped for escaping the root.
    pub rejected: Vec<String>,
}

// ---------------------------------------------------------------------------
// WorkspaceExecutor
// ---------------------------------------------------------------------------

/// Applies file and command intents under a fixed root directory.
pub struct WorkspaceExecutor {
    root: PathBuf,
    command_timeout: Duration,
}

impl WorkspaceExecutor {
    /// Create the executor, making sure the root directory exists.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ExecError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.canonicalize()?,
            command_timeout: COMMAND_TIMEOUT,
        })
    }

    /// Override the command deadline (tests use a short one).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically resolve `rel` under the root. Returns `None` when the
    /// normalized result would leave the root: absolute paths, and `..`
    /// runs that climb past it. Symlinks are not chased; confinement is
    /// a prefix check, not a sandbox.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return None;
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }

    // -- File writes --------------------------------------------------------

    /// Write each intent atomically-enough (parents created on demand).
    /// Escaping paths are dropped and reported; I/O failures propagate.
    pub fn write_files(&self, intents: &[FileIntent]) -> Result<WriteReport, ExecError> {
        let mut report = WriteReport::default();
        for intent in intents {
            let Some(path) = self.resolve(&intent.path) else {
                warn!(path = %intent.path, "dropping file intent escaping workspace root");
                report.rejected.push(intent.path.clone());
                continue;
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &intent.content)?;
            debug!(path = %path.display(), bytes = intent.content.len(), "file written");
            report.written.push(intent.path.clone());
        }
        Ok(report)
    }

    // -- Command execution --------------------------------------------------

    /// Run each command in sequence, in the order the model emitted them.
    /// A failing or timed-out command is recorded and does not stop the
    /// batch.
    pub async fn run_commands(&self, intents: &[CommandIntent]) -> Vec<ExecOutcome> {
        let mut outcomes = Vec::with_capacity(intents.len());
        for intent in intents {
            outcomes.push(self.run_command(intent).await);
        }
        outcomes
    }

    async fn run_command(&self, intent: &CommandIntent) -> ExecOutcome {
        let fail = |output: String| ExecOutcome {
            cwd: intent.cwd.clone(),
            command: intent.command.clone(),
            success: false,
            output,
        };

        let Some(cwd) = self.resolve(&intent.cwd) else {
            warn!(cwd = %intent.cwd, "command cwd escapes workspace root");
            return fail("cwd escapes workspace root".into());
        };
        if let Err(e) = std::fs::create_dir_all(&cwd) {
            return fail(format!("cannot create cwd: {}", e));
        }

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&intent.command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // dropping the future on deadline tears the child down
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return fail(format!("spawn failed: {}", e)),
        };

        match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let success = output.status.success();
                let text = if success {
                    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));
                    tail(&combined, SUCCESS_TAIL)
                } else {
                    tail(&String::from_utf8_lossy(&output.stderr), FAILURE_TAIL)
                };
                debug!(command = %intent.command, success, "command finished");
                ExecOutcome {
                    cwd: intent.cwd.clone(),
                    command: intent.command.clone(),
                    success,
                    output: text,
                }
            }
            Ok(Err(e)) => fail(format!("wait failed: {}", e)),
            Err(_) => {
                warn!(command = %intent.command, "command hit the deadline, killed");
                fail(format!(
                    "timed out after {}s",
                    self.command_timeout.as_secs()
                ))
            }
        }
    }
}

/// Last `n` bytes of `s`, snapped forward to a char boundary.
fn tail(s: &str, n: usize) -> String {
    if s.len() <= n {
        return s.to_string();
    }
    let mut start = s.len() - n;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> (WorkspaceExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let exec = WorkspaceExecutor::new(dir.path().join("workspace")).unwrap();
        (exec, dir)
    }

    fn file(path: &str, content: &str) -> FileIntent {
        FileIntent {
            path: path.into(),
            content: content.into(),
        }
    }

    fn cmd(cwd: &str, command: &str) -> CommandIntent {
        CommandIntent {
            cwd: cwd.into(),
            command: command.into(),
        }
    }

    #[test]
    fn writes_files_with_parents() {
        let (exec, _dir) = executor();
        let report = exec
            .write_files(&[file("a.txt", "one"), file("nested/deep/b.txt", "two")])
            .unwrap();
        assert_eq!(report.written, vec!["a.txt", "nested/deep/b.txt"]);
        assert!(report.rejected.is_empty());
        assert_eq!(
            std::fs::read_to_string(exec.root().join("nested/deep/b.txt")).unwrap(),
            "two"
        );
    }

    #[test]
    fn escaping_paths_dropped_silently() {
        let (exec, dir) = executor();
        let report = exec
            .write_files(&[
                file("../outside.txt", "nope"),
                file("/etc/passwd", "nope"),
                file("ok.txt", "fine"),
            ])
            .unwrap();
        assert_eq!(report.written, vec!["ok.txt"]);
        assert_eq!(report.rejected, vec!["../outside.txt", "/etc/passwd"]);
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn dotdot_inside_root_is_allowed() {
        let (exec, _dir) = executor();
        // normalizes to sub/b.txt, still inside the root
        let report = exec
            .write_files(&[file("sub/ignored/../b.txt", "ok")])
            .unwrap();
        assert_eq!(report.written.len(), 1);
        assert!(exec.root().join("sub/b.txt").exists());
    }

    #[test]
    fn resolve_confines_every_success() {
        let (exec, _dir) = executor();
        for rel in ["a", "a/b/c", "./x", "a/../b", "a/./b"] {
            let resolved = exec.resolve(rel).unwrap();
            assert!(resolved.starts_with(exec.root()), "{rel} escaped");
        }
        for rel in ["..", "../x", "a/../../x", "/abs"] {
            assert!(exec.resolve(rel).is_none(), "{rel} should be rejected");
        }
    }

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let (exec, _dir) = executor();
        let outcomes = exec.run_commands(&[cmd(".", "echo hello")]).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert!(outcomes[0].output.contains("hello"));
    }

    #[tokio::test]
    async fn failed_command_captures_stderr() {
        let (exec, _dir) = executor();
        let outcomes = exec
            .run_commands(&[cmd(".", "echo oops >&2; exit 3")])
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].output.contains("oops"));
    }

    #[tokio::test]
    async fn commands_run_in_emitted_order() {
        let (exec, _dir) = executor();
        let outcomes = exec
            .run_commands(&[
                cmd(".", "echo first >> order.log"),
                cmd(".", "echo second >> order.log"),
                cmd(".", "cat order.log"),
            ])
            .await;
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(
            std::fs::read_to_string(exec.root().join("order.log")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[tokio::test]
    async fn command_failure_does_not_stop_batch() {
        let (exec, _dir) = executor();
        let outcomes = exec
            .run_commands(&[cmd(".", "exit 1"), cmd(".", "echo still-runs")])
            .await;
        assert!(!outcomes[0].success);
        assert!(outcomes[1].success);
    }

    #[tokio::test]
    async fn escaping_cwd_is_rejected_without_running() {
        let (exec, _dir) = executor();
        let outcomes = exec.run_commands(&[cmd("../..", "touch escaped")]).await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].output.contains("escapes"));
    }

    #[tokio::test]
    async fn missing_cwd_is_created() {
        let (exec, _dir) = executor();
        let outcomes = exec.run_commands(&[cmd("fresh/dir", "pwd")]).await;
        assert!(outcomes[0].success);
        assert!(exec.root().join("fresh/dir").is_dir());
    }

    #[tokio::test]
    async fn deadline_kills_the_command() {
        let (exec, _dir) = executor();
        let exec = exec.with_command_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let outcomes = exec.run_commands(&[cmd(".", "sleep 30")]).await;
        assert!(!outcomes[0].success);
        assert!(outcomes[0].output.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn success_output_keeps_tail() {
        let (exec, _dir) = executor();
        let outcomes = exec
            .run_commands(&[cmd(".", "printf 'x%.0s' $(seq 1 2000); echo END")])
            .await;
        assert!(outcomes[0].success);
        assert!(outcomes[0].output.len() <= SUCCESS_TAIL);
        assert!(outcomes[0].output.ends_with("END\n"));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let s = "ééééé"; // 2 bytes each
        let t = tail(s, 3);
        assert_eq!(t, "é");
    }
}
