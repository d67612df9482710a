//! Subprocess execution.

use std::io;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("empty command")]
    Empty,

    #[error("`{0}` is not installed or not on PATH")]
    NotFound(String),

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether `pattern` appears in stderr or stdout.
    pub fn mentions(&self, pattern: &str) -> bool {
        self.stderr.contains(pattern) || self.stdout.contains(pattern)
    }

    /// A one-line description of a failed run.
    pub fn failure_summary(&self) -> String {
        let detail = self.stderr.trim();
        let detail = if detail.is_empty() { self.stdout.trim() } else { detail };
        let detail = detail.lines().last().unwrap_or_default();
        match self.code {
            Some(code) => format!("exit status {code}: {detail}"),
            None => format!("terminated by signal: {detail}"),
        }
    }
}

/// Run `argv`, optionally feeding `stdin`, and capture its output.
///
/// The child is killed if the returned future is dropped, so an attempt
/// timeout around this call does not leave a stray provider CLI behind.
pub async fn run_command(argv: &[String], stdin: Option<&str>) -> Result<CommandOutput, RunError> {
    let (program, args) = argv.split_first().ok_or(RunError::Empty)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program = %program, args = args.len(), "running command");
    let mut child = cmd.spawn().map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => RunError::NotFound(program.clone()),
        _ => RunError::Io {
            program: program.clone(),
            source,
        },
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_string();
        let program = program.clone();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                warn!(program = %program, error = %e, "failed to write command stdin");
            }
        });
    }

    let output = child.wait_with_output().await.map_err(|source| RunError::Io {
        program: program.clone(),
        source,
    })?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run_command(&argv(&["sh", "-c", "echo hello; echo oops >&2; exit 3"]), None)
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.failure_summary(), "exit status 3: oops");
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let out = run_command(&argv(&["cat"]), Some("kind: Deployment\n")).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "kind: Deployment\n");
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let err = run_command(&argv(&["orbit-no-such-binary"]), None).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        assert!(matches!(run_command(&[], None).await, Err(RunError::Empty)));
    }
}
