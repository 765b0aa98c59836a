//! `script` job execution (spec.md §4.7): resolve a path under a fixed
//! scripts root, reject escapes, spawn as a subprocess with a timeout,
//! capture stdout/stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::{Result, SchedulerError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_OUTPUT_BYTES: usize = 8192;

pub struct ScriptOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Resolve `relative` under `scripts_root`, rejecting any path that escapes
/// it after normalization (spec.md §4.7, §7 "path escape" error class).
pub fn resolve_script_path(scripts_root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = scripts_root.join(relative);
    let normalized = normalize(&candidate);
    let root_normalized = normalize(scripts_root);

    if !normalized.starts_with(&root_normalized) {
        return Err(SchedulerError::PathEscape(relative.to_string()));
    }
    Ok(normalized)
}

/// Lexical normalization (no filesystem access, so this works even if the
/// target doesn't exist yet) — collapses `.` and resolves `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Spawn `path` with `args`, capturing stdout/stderr, racing a timeout.
/// On timeout the child is killed (SIGKILL on unix via `Command::kill`).
pub async fn execute(path: &Path, args: &[String]) -> Result<ScriptOutcome> {
    execute_with_timeout(path, args, DEFAULT_TIMEOUT).await
}

pub async fn execute_with_timeout(
    path: &Path,
    args: &[String],
    timeout: Duration,
) -> Result<ScriptOutcome> {
    let mut child = Command::new(path)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut p) = stdout_pipe.take() {
            let _ = p.read_to_end(&mut stdout).await;
        }
        if let Some(mut p) = stderr_pipe.take() {
            let _ = p.read_to_end(&mut stderr).await;
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(Ok((status, stdout, stderr))) => Ok(ScriptOutcome {
            exit_code: status.code(),
            stdout: truncate_utf8(&stdout, MAX_OUTPUT_BYTES),
            stderr: truncate_utf8(&stderr, MAX_OUTPUT_BYTES),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(SchedulerError::Io(e)),
        Err(_elapsed) => Ok(ScriptOutcome {
            exit_code: None,
            stdout: String::new(),
            stderr: format!("script timed out after {:?}", timeout),
            timed_out: true,
        }),
    }
}

fn truncate_utf8(bytes: &[u8], max: usize) -> String {
    let slice = if bytes.len() > max { &bytes[..max] } else { bytes };
    String::from_utf8_lossy(slice).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_path_within_root() {
        let root = Path::new("/home/bob/.bob/scripts");
        let resolved = resolve_script_path(root, "backup.sh").unwrap();
        assert_eq!(resolved, root.join("backup.sh"));
    }

    #[test]
    fn rejects_parent_escape() {
        let root = Path::new("/home/bob/.bob/scripts");
        let err = resolve_script_path(root, "../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_absolute_escape_via_subdir() {
        let root = Path::new("/home/bob/.bob/scripts");
        let err = resolve_script_path(root, "sub/../../outside.sh");
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn executes_and_captures_stdout() {
        let outcome = execute(Path::new("/bin/echo"), &["hi".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hi");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let outcome = execute(Path::new("/bin/false"), &[]).await.unwrap();
        assert_eq!(outcome.exit_code, Some(1));
    }
}
