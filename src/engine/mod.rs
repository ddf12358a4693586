// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The external download engine seam.
//!
//! The job subsystem never fetches media itself. It hands an engine a URL,
//! an [`EngineConfig`] and a callback, and consumes the [`EngineEvent`]s the
//! engine reports while it works. [`YtDlpEngine`] drives the `yt-dlp`
//! executable; tests plug in scripted engines through the same trait.

pub mod ytdlp;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use ytdlp::YtDlpEngine;

/// Free-form engine options as received from a client.
pub type EngineOptions = Map<String, Value>;

/// Output path template option.
pub const OPT_OUTTMPL: &str = "outtmpl";
/// Format selection expression option.
pub const OPT_FORMAT: &str = "format";
/// Single-item-only flag.
pub const OPT_NOPLAYLIST: &str = "noplaylist";
/// Path of a Netscape-format cookie file.
pub const OPT_COOKIEFILE: &str = "cookiefile";
/// Inline cookie text; never reaches the engine, see `JobRunner`.
pub const OPT_COOKIEDATA: &str = "cookiedata";

/// One progress report from the engine.
///
/// Decoded from the engine's `status`-tagged payload. Only the fields that
/// make sense for a kind are carried; any other kind decodes to
/// [`EngineEvent::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineEvent {
    Downloading {
        #[serde(default)]
        downloaded_bytes: Option<u64>,
        #[serde(default)]
        total_bytes: Option<u64>,
        #[serde(default)]
        total_bytes_estimate: Option<f64>,
        /// Bytes per second.
        #[serde(default)]
        speed: Option<f64>,
        /// Seconds remaining.
        #[serde(default)]
        eta: Option<f64>,
        #[serde(default)]
        filename: Option<String>,
    },
    Finished {
        filename: String,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unrecognized,
}

/// Merged configuration handed to an engine for one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    options: EngineOptions,
}

impl EngineConfig {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(key.into(), value.into());
    }

    /// Overlay `other` onto this configuration; keys in `other` win.
    pub fn merge(&mut self, other: EngineOptions) {
        self.options.extend(other);
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn output_template(&self) -> Option<&str> {
        self.get_str(OPT_OUTTMPL)
    }

    pub fn format(&self) -> Option<&str> {
        self.get_str(OPT_FORMAT)
    }

    pub fn no_playlist(&self) -> bool {
        self.options
            .get(OPT_NOPLAYLIST)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn cookie_file(&self) -> Option<&Path> {
        self.get_str(OPT_COOKIEFILE).map(Path::new)
    }
}

/// Failure raised by an engine while configuring or transferring.
#[derive(Debug)]
pub enum EngineError {
    /// The engine executable could not be started.
    Spawn { program: String, source: std::io::Error },
    /// The engine ran and reported failure.
    Failed { code: Option<i32>, message: String },
    /// An option had a value the engine cannot use.
    Rejected(String),
    /// Inline cookie material could not be written to disk.
    Credentials(std::io::Error),
    Io(std::io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "Failed to start {}: {}", program, source),
            Self::Failed { message, .. } => write!(f, "{}", message),
            Self::Rejected(msg) => write!(f, "Invalid download options: {}", msg),
            Self::Credentials(e) => write!(f, "Failed to prepare cookie file: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::Credentials(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A blocking download engine.
///
/// `download` runs for the whole transfer on the caller's thread and invokes
/// `on_event` sequentially from that same thread.
pub trait DownloadEngine: Send + Sync {
    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;

    fn download(
        &self,
        url: &str,
        config: &EngineConfig,
        on_event: &mut dyn FnMut(EngineEvent),
    ) -> Result<(), EngineError>;
}
