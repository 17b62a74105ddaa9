//! External downloader processes.
//!
//! Output from both pipes is split on `\n` and `\r` (curl and wget redraw
//! their progress in place) and fed line by line to a callback. The child
//! is killed on interrupt or when the overall timeout runs out.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, ScrapeError};

/// How a finished process exited.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub status: ExitStatus,
    /// Last few non-empty output lines, for error messages.
    pub tail: Vec<String>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn describe(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

const TAIL_LINES: usize = 5;

/// Quote a command line for logging.
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|a| {
            if a.is_empty() || a.contains(|c: char| c.is_whitespace() || c == '"' || c == '\'') {
                format!("'{}'", a.replace('\'', "'\\''"))
            } else {
                a.clone()
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

/// Run `program` with `args`, handing every output line to `on_line`.
///
/// Returns `Interrupted` when `cancel` fires and `DownloadFailed` when the
/// process can't be started or outlives `timeout`; the child is killed in
/// both cases. A non-zero exit is not an error here.
pub async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
    mut on_line: impl FnMut(&str),
) -> Result<ProcessExit> {
    debug!("Executing: {}", display_command(program, args));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ScrapeError::DownloadFailed(format!("failed to start {}: {}", program, e)))?;

    let (tx, mut rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, tx.clone()));
    }
    drop(tx);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut tail: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Interrupted; terminating {}", program);
                let _ = child.kill().await;
                return Err(ScrapeError::Interrupted);
            }
            _ = &mut deadline => {
                warn!("{} exceeded {}s; terminating", program, timeout.as_secs());
                let _ = child.kill().await;
                return Err(ScrapeError::DownloadFailed(format!(
                    "{} timed out after {}s",
                    program,
                    timeout.as_secs()
                )));
            }
            line = rx.recv() => match line {
                Some(line) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        on_line(trimmed);
                        if tail.len() == TAIL_LINES {
                            tail.remove(0);
                        }
                        tail.push(trimmed.to_string());
                    }
                }
                None => break,
            },
        }
    }

    // Output is closed; the process is exiting.
    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(ScrapeError::Interrupted);
        }
        _ = &mut deadline => {
            let _ = child.kill().await;
            return Err(ScrapeError::DownloadFailed(format!(
                "{} timed out after {}s",
                program,
                timeout.as_secs()
            )));
        }
        status = child.wait() => status?,
    };
    Ok(ProcessExit { status, tail })
}
