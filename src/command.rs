//! Bounded execution of external helper tools.
//!
//! OCR, legacy `.doc` conversion and RAR listing all shell out. Every call
//! goes through [`run_with_timeout`] so a hung tool becomes a failed strategy
//! instead of a hung run.

use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::CommandError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Stderr kept in error messages.
const MAX_STDERR_CHARS: usize = 400;

/// Runs `cmd` to completion and returns its stdout, killing it once
/// `timeout` elapses.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Vec<u8>, CommandError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            CommandError::NotFound {
                program: program.clone(),
            }
        } else {
            CommandError::Io {
                program: program.clone(),
                source: e,
            }
        }
    })?;

    // Drain both pipes on their own threads so a chatty tool cannot block
    // on a full pipe while we poll for exit.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_reader = thread::spawn(move || drain(stdout));
    let err_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(%program, ?timeout, "external tool timed out");
                return Err(CommandError::TimedOut { program, timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(CommandError::Io { program, source: e });
            }
        }
    };

    let stdout = out_reader.join().unwrap_or_default();
    let stderr = err_reader.join().unwrap_or_default();

    if !status.success() {
        let stderr: String = String::from_utf8_lossy(&stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();
        return Err(CommandError::Failed {
            program,
            status: status.to_string(),
            stderr,
        });
    }

    Ok(stdout)
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}
