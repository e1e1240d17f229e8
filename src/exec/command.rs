// src/exec/command.rs

//! Piping asset contents through external programs.

use std::process::{Output, Stdio};

use anyhow::{anyhow, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Environment handed to every command step.
#[derive(Debug, Clone, Copy)]
pub struct CommandEnv<'a> {
    pub stage: &'a str,
    /// Output-relative path of the asset being transformed.
    pub file: &'a str,
    pub root: &'a std::path::Path,
}

/// Run `cmd` through the platform shell with `input` on stdin and return
/// its stdout.
///
/// A non-zero exit status is an error carrying the (trimmed) stderr.
pub async fn pipe_through(cmd: &str, input: &[u8], env: CommandEnv<'_>) -> Result<Vec<u8>> {
    let output = run_piped(cmd, input, env).await?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(exit_error(cmd, &output, &output.stderr))
    }
}

/// Run `cmd` as a pass/fail check over `input`; its stdout is discarded.
///
/// Linters commonly report on stdout, so that is used for the error
/// message when stderr is empty.
pub async fn run_check(cmd: &str, input: &[u8], env: CommandEnv<'_>) -> Result<()> {
    let output = run_piped(cmd, input, env).await?;
    if output.status.success() {
        return Ok(());
    }
    let report = if output.stderr.iter().all(u8::is_ascii_whitespace) {
        &output.stdout
    } else {
        &output.stderr
    };
    Err(exit_error(cmd, &output, report))
}

async fn run_piped(cmd: &str, input: &[u8], env: CommandEnv<'_>) -> Result<Output> {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };

    command
        .current_dir(env.root)
        .env("ASSETDAG_STAGE", env.stage)
        .env("ASSETDAG_FILE", env.file)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning `{cmd}`"))?;

    // Feed stdin from a separate task so a chatty child cannot deadlock us
    // on a full stdout pipe.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let data = input.to_vec();
        tokio::spawn(async move {
            // A child that exits without reading stdin yields a broken pipe;
            // its exit status is what we report.
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
        })
    });

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("waiting for `{cmd}`"))?;

    if let Some(task) = stdin_task {
        let _ = task.await;
    }

    debug!(
        cmd = %cmd,
        file = %env.file,
        status = ?output.status.code(),
        bytes_out = output.stdout.len(),
        "command step finished"
    );

    Ok(output)
}

fn exit_error(cmd: &str, output: &Output, report: &[u8]) -> anyhow::Error {
    let report = String::from_utf8_lossy(report).trim().to_string();
    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    anyhow!(
        "`{cmd}` exited with {code}{}{}",
        if report.is_empty() { "" } else { ": " },
        report
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn env() -> CommandEnv<'static> {
        CommandEnv {
            stage: "test",
            file: "a.txt",
            root: std::path::Path::new("."),
        }
    }

    #[tokio::test]
    async fn stdout_replaces_contents() {
        let out = pipe_through("tr a-z A-Z", b"body{}", env()).await.unwrap();
        assert_eq!(out, b"BODY{}");
    }

    #[tokio::test]
    async fn environment_names_the_asset() {
        let out = pipe_through("printf %s \"$ASSETDAG_FILE\"", b"", env()).await.unwrap();
        assert_eq!(out, b"a.txt");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let err = pipe_through("echo 'syntax error' >&2; exit 3", b"x", env())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with 3"), "{msg}");
        assert!(msg.contains("syntax error"), "{msg}");
    }

    #[tokio::test]
    async fn check_passes_or_reports_stdout() {
        run_check("grep -q body", b"body{}", env()).await.unwrap();

        let err = run_check("echo 'a.txt:1 unexpected token'; exit 1", b"x", env())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with 1"), "{msg}");
        assert!(msg.contains("unexpected token"), "{msg}");
    }
}
