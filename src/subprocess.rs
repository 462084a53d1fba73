//! The subprocess supervisor.
//!
//! Spawn, pipe both streams to dedicated pump threads, and poll: no fixed
//! wall-clock timeout, line callbacks for both stdout and stderr, and a
//! cancellation predicate polled on every read tick. The child always runs
//! with stdin closed and both streams piped; there is no shell
//! interpolation anywhere — arguments are passed as a `Vec<String>`
//! straight to `Command::args`.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::CoreError;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Default)]
pub struct RunCommandOptions<'a> {
    pub on_stdout_line: Option<Box<dyn FnMut(&str) + 'a>>,
    pub on_stderr_line: Option<Box<dyn FnMut(&str) + 'a>>,
    pub should_cancel: Option<Box<dyn FnMut() -> bool + 'a>>,
}

enum Chunk {
    Stdout(String),
    Stderr(String),
}

/// Spawns `path args…` in `cwd` (or the current directory when `None`),
/// pipes stdout/stderr, and feeds each newline-delimited line (split on
/// `\r?\n`, trailing newline stripped) to the matching callback as it
/// arrives. Polls `should_cancel` after each line; when it flips true the
/// child is killed and the call fails with `CoreError::Canceled`. A nonzero
/// exit fails with a descriptive error including the command, args, and
/// captured stderr (falling back to stdout when stderr is empty). A spawn
/// failure surfaces the underlying OS error.
pub fn run_command(
    path: &str,
    args: &[String],
    cwd: Option<&Path>,
    mut opts: RunCommandOptions<'_>,
) -> Result<CommandOutput, CoreError> {
    let describe = || format!("{path} {}", args.join(" "));

    let mut command = Command::new(path);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        CoreError::pipeline("subprocess", format!("failed to spawn '{}': {e}", describe()), false)
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, rx) = mpsc::channel::<Chunk>();

    let stdout_tx = tx.clone();
    let stdout_handle = stdout.map(|out| {
        std::thread::spawn(move || {
            for line in BufReader::new(out).lines().map_while(Result::ok) {
                if stdout_tx.send(Chunk::Stdout(line)).is_err() {
                    break;
                }
            }
        })
    });

    let stderr_handle = stderr.map(|err| {
        std::thread::spawn(move || {
            for line in BufReader::new(err).lines().map_while(Result::ok) {
                if tx.send(Chunk::Stderr(line)).is_err() {
                    break;
                }
            }
        })
    });

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut canceled = false;

    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(Chunk::Stdout(line)) => {
                if let Some(cb) = opts.on_stdout_line.as_mut() {
                    cb(&line);
                }
                stdout_buf.push_str(&line);
                stdout_buf.push('\n');
            }
            Ok(Chunk::Stderr(line)) => {
                if let Some(cb) = opts.on_stderr_line.as_mut() {
                    cb(&line);
                }
                stderr_buf.push_str(&line);
                stderr_buf.push('\n');
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Ok(Some(_)) = child.try_wait() {
                    break;
                }
            }
        }

        if let Some(should_cancel) = opts.should_cancel.as_mut() {
            if should_cancel() {
                canceled = true;
                let _ = child.kill();
                break;
            }
        }

        if let Ok(Some(_)) = child.try_wait() {
            // Drain anything already queued before concluding.
            while let Ok(chunk) = rx.try_recv() {
                match chunk {
                    Chunk::Stdout(line) => {
                        if let Some(cb) = opts.on_stdout_line.as_mut() {
                            cb(&line);
                        }
                        stdout_buf.push_str(&line);
                        stdout_buf.push('\n');
                    }
                    Chunk::Stderr(line) => {
                        if let Some(cb) = opts.on_stderr_line.as_mut() {
                            cb(&line);
                        }
                        stderr_buf.push_str(&line);
                        stderr_buf.push('\n');
                    }
                }
            }
            break;
        }
    }

    if let Some(handle) = stdout_handle {
        let _ = handle.join();
    }
    if let Some(handle) = stderr_handle {
        let _ = handle.join();
    }

    if canceled {
        return Err(CoreError::Canceled);
    }

    let status = child
        .wait()
        .map_err(|e| CoreError::pipeline("subprocess", format!("failed to wait on '{}': {e}", describe()), false))?;

    if !status.success() {
        let detail = if !stderr_buf.trim().is_empty() {
            &stderr_buf
        } else {
            &stdout_buf
        };
        return Err(CoreError::pipeline(
            "subprocess",
            format!(
                "command '{}' exited with {status}: {}",
                describe(),
                detail.trim()
            ),
            true,
        ));
    }

    Ok(CommandOutput {
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}
