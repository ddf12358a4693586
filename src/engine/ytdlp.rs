// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! [`DownloadEngine`] backed by the `yt-dlp` executable.
//!
//! Progress is read from stdout: yt-dlp is asked to print every progress
//! report as a tagged JSON line via `--progress-template`, and each line is
//! decoded straight into an [`EngineEvent`]. stderr is drained on a helper
//! thread and its tail kept for the failure message.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use serde_json::Value;

use super::{
    DownloadEngine, EngineConfig, EngineError, EngineEvent, OPT_COOKIEDATA, OPT_COOKIEFILE,
    OPT_FORMAT, OPT_NOPLAYLIST, OPT_OUTTMPL,
};

/// Marker in front of every progress line we asked yt-dlp to print.
const PROGRESS_MARKER: &str = "VIDPULL_PROGRESS ";

/// How many stderr lines to keep for error reporting.
const STDERR_TAIL_LINES: usize = 50;

/// Engine that shells out to `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Translate a merged configuration into yt-dlp arguments.
    pub fn build_args(url: &str, config: &EngineConfig) -> Result<Vec<String>, EngineError> {
        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-colors".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!("download:{}%(progress)j", PROGRESS_MARKER),
        ];

        for (key, value) in config.options() {
            match key.as_str() {
                OPT_OUTTMPL => push_pair(&mut args, "-o", expect_str(key, value)?),
                OPT_FORMAT => push_pair(&mut args, "-f", expect_str(key, value)?),
                OPT_COOKIEFILE => push_pair(&mut args, "--cookies", expect_str(key, value)?),
                "proxy" => push_pair(&mut args, "--proxy", expect_str(key, value)?),
                OPT_NOPLAYLIST => {
                    if expect_bool(key, value)? {
                        args.push("--no-playlist".into());
                    } else {
                        args.push("--yes-playlist".into());
                    }
                }
                "ratelimit" => {
                    let rate = match value {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        _ => return Err(type_error(key, "a number or string")),
                    };
                    push_pair(&mut args, "--limit-rate", &rate);
                }
                "writesubtitles" => {
                    if expect_bool(key, value)? {
                        args.push("--write-subs".into());
                    }
                }
                "writethumbnail" => {
                    if expect_bool(key, value)? {
                        args.push("--write-thumbnail".into());
                    }
                }
                "subtitleslangs" => {
                    let langs = match value {
                        Value::String(s) => s.clone(),
                        Value::Array(items) => items
                            .iter()
                            .map(|v| v.as_str().ok_or_else(|| type_error(key, "a list of strings")))
                            .collect::<Result<Vec<_>, _>>()?
                            .join(","),
                        _ => return Err(type_error(key, "a string or list of strings")),
                    };
                    push_pair(&mut args, "--sub-langs", &langs);
                }
                OPT_COOKIEDATA => {
                    return Err(EngineError::Rejected(
                        "inline cookie data must be written to a cookie file first".to_string(),
                    ));
                }
                other => {
                    tracing::debug!(option = other, "Ignoring option not supported by yt-dlp engine");
                }
            }
        }

        args.push("--".into());
        args.push(url.to_string());
        Ok(args)
    }
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
    args.push(flag.to_string());
    args.push(value.to_string());
}

fn type_error(key: &str, expected: &str) -> EngineError {
    EngineError::Rejected(format!("option `{}` must be {}", key, expected))
}

fn expect_str<'a>(key: &str, value: &'a Value) -> Result<&'a str, EngineError> {
    value.as_str().ok_or_else(|| type_error(key, "a string"))
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, EngineError> {
    value.as_bool().ok_or_else(|| type_error(key, "a boolean"))
}

/// Decode one stdout line. Lines that are not progress reports yield `None`.
pub fn parse_progress_line(line: &str) -> Option<EngineEvent> {
    let payload = line.trim_end().strip_prefix(PROGRESS_MARKER)?;
    match serde_json::from_str::<EngineEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable progress line from yt-dlp");
            None
        }
    }
}

/// Pick the most useful failure message from yt-dlp's stderr.
pub fn failure_message(stderr_tail: &[String], code: Option<i32>) -> String {
    let error_line = stderr_tail
        .iter()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:").map(str::trim));
    if let Some(message) = error_line.filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    if let Some(last) = stderr_tail.iter().rev().map(|l| l.trim()).find(|l| !l.is_empty()) {
        return last.to_string();
    }
    match code {
        Some(code) => format!("yt-dlp exited with status {}", code),
        None => "yt-dlp was terminated by a signal".to_string(),
    }
}

impl DownloadEngine for YtDlpEngine {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn download(
        &self,
        url: &str,
        config: &EngineConfig,
        on_event: &mut dyn FnMut(EngineEvent),
    ) -> Result<(), EngineError> {
        let args = Self::build_args(url, config)?;
        tracing::debug!(program = %self.program.display(), ?args, "Spawning yt-dlp");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let stderr_reader = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::debug!("yt-dlp stderr: {}", line);
                    if let Ok(mut lines) = tail.lock() {
                        lines.push_back(line);
                        if lines.len() > STDERR_TAIL_LINES {
                            lines.pop_front();
                        }
                    }
                }
            })
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                match parse_progress_line(&line) {
                    Some(event) => on_event(event),
                    None => tracing::debug!("yt-dlp: {}", line),
                }
            }
        }

        let status = child.wait()?;
        if let Some(reader) = stderr_reader {
            let _ = reader.join();
        }

        if status.success() {
            return Ok(());
        }

        let tail: Vec<String> = match stderr_tail.lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        Err(EngineError::Failed {
            code: status.code(),
            message: failure_message(&tail, status.code()),
        })
    }
}
