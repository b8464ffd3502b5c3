/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation; version 2 of the License.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 */

//! External command execution and vendor utility output parsing.
//!
//! Vendor tools such as `sensor-util` and `fan-util` print one reading per
//! line in a loose `key : value` layout:
//!
//! ```text
//! MB_INLET_TEMP                (0x1) :   26.00 C     | (ok)
//! Fan 0 Speed: 3000 RPM (30%)
//! ```
//!
//! Every command runs under a hard timeout. A hung utility must not stall the
//! control loop forever, so a child that outlives its deadline is killed and
//! reported as [`FscError::CommandTimeout`]. Each command runs in its own
//! process group and the whole group is killed, so pipelines and compound
//! command lines leave nothing behind.

use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use fscd_error::{FscError, Result};
use tracing::{debug, warn};

/// Default upper bound for a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the child was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs shell command lines with a bounded wall-clock timeout.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `command_line` through `sh -c` and capture stdout.
    pub fn run(&self, command_line: &str) -> Result<CommandOutput> {
        debug!(command = %command_line, "running external command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| FscError::command(command_line, e.to_string()))?;

        // Drain stdout off-thread so a chatty child cannot fill the pipe and
        // block before it exits.
        let reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        kill_process_group(&mut child, command_line);
                        return Err(FscError::CommandTimeout {
                            command: command_line.to_string(),
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(FscError::command(command_line, e.to_string())),
            }
        };

        let stdout = match reader {
            Some(handle) => handle
                .join()
                .map_err(|_| FscError::command(command_line, "stdout reader panicked"))?,
            None => String::new(),
        };

        Ok(CommandOutput {
            code: status.code(),
            stdout,
        })
    }

    /// Run a command and fail unless it exits with status 0.
    pub fn run_checked(&self, command_line: &str) -> Result<String> {
        let out = self.run(command_line)?;
        if !out.success() {
            return Err(FscError::command(
                command_line,
                format!("exited with status {:?}", out.code),
            ));
        }
        Ok(out.stdout)
    }
}

/// SIGKILL every process in the child's group, then reap the child.
fn kill_process_group(child: &mut Child, command_line: &str) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) has no memory-safety preconditions; the negative pid
    // targets the group created for this child at spawn.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        let e = io::Error::last_os_error();
        warn!(command = %command_line, pgid, error = %e, "failed to kill process group, killing shell only");
        if let Err(e) = child.kill() {
            warn!(command = %command_line, error = %e, "failed to kill timed out command");
        }
    }
    let _ = child.wait();
}

/// One parsed line of vendor utility output.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilEntry {
    pub key: String,
    /// `None` when the utility printed `NA` or a non-numeric value
    pub value: Option<f64>,
    /// Lower-cased status such as `ok`, `na` or `ucr`
    pub status: Option<String>,
}

/// Strip a trailing `(0xNN)` sensor-id tag from a key.
fn strip_id_tag(key: &str) -> &str {
    let key = key.trim();
    if let Some(open) = key.rfind('(') {
        if key.ends_with(')') && key[open + 1..].starts_with("0x") {
            return key[..open].trim_end();
        }
    }
    key
}

/// Parse a single `key : value [unit] [| (status)]` line.
pub fn parse_util_line(line: &str) -> Option<UtilEntry> {
    let (raw_key, rest) = line.split_once(':')?;
    let key = strip_id_tag(raw_key);
    if key.is_empty() {
        return None;
    }

    let (value_part, status_part) = match rest.split_once('|') {
        Some((v, s)) => (v, Some(s)),
        None => (rest, None),
    };

    let value = value_part
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    let status = status_part
        .map(|s| s.trim().trim_start_matches('(').trim_end_matches(')').trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());

    Some(UtilEntry {
        key: key.to_string(),
        value,
        status,
    })
}

/// Parse every recognisable line of utility output.
pub fn parse_util_output(text: &str) -> Vec<UtilEntry> {
    text.lines().filter_map(parse_util_line).collect()
}

/// Find the entry for `key` in utility output.
pub fn find_util_entry(text: &str, key: &str) -> Option<UtilEntry> {
    text.lines()
        .filter_map(parse_util_line)
        .find(|entry| entry.key == key)
}
