// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job identifiers, progress snapshots and job status.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Placeholder filename shown before the engine reports anything.
pub const PREPARING_FILENAME: &str = "Preparing download...";

/// Placeholder filename when a progress event carries none.
pub const UNKNOWN_FILENAME: &str = "Unknown";

/// Message used when the engine reports an error without details.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Message carried by the `not_found` sentinel.
pub const NOT_FOUND_MESSAGE: &str = "Download not found";

/// Opaque identifier correlating dispatch, execution, progress and query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an identifier received from a client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Issues `download_<unix millis>` identifiers.
///
/// Identifiers are strictly increasing: a dispatch landing on a millisecond
/// that was already handed out takes the next free one instead.
#[derive(Debug, Default)]
pub struct JobIdGenerator {
    last_millis: AtomicI64,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> JobId {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let issued = now.max(previous + 1);
        JobId(format!("download_{}", issued))
    }
}

/// Status field of a [`ProgressSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Starting,
    Downloading,
    Finished,
    Error,
    NotFound,
}

/// Coarse lifecycle status tracked next to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Downloading,
    Completed,
    Error,
}

impl JobStatus {
    /// Returns true once the job has completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// Latest progress of one job, replaced wholesale on every update.
///
/// Fields that do not apply to the current status are `None` and left out
/// of the serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: SnapshotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Bytes per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Seconds remaining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    fn bare(status: SnapshotStatus) -> Self {
        Self {
            status,
            percent: None,
            downloaded_bytes: None,
            total_bytes: None,
            speed: None,
            eta: None,
            filename: None,
            error: None,
        }
    }

    /// Registered at dispatch, before the engine has said anything.
    pub fn starting() -> Self {
        Self {
            percent: Some(0.0),
            filename: Some(PREPARING_FILENAME.to_string()),
            ..Self::bare(SnapshotStatus::Starting)
        }
    }

    pub fn downloading(
        percent: f64,
        downloaded_bytes: u64,
        total_bytes: u64,
        speed: f64,
        eta: u64,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            percent: Some(percent),
            downloaded_bytes: Some(downloaded_bytes),
            total_bytes: Some(total_bytes),
            speed: Some(speed),
            eta: Some(eta),
            filename: Some(filename.into()),
            ..Self::bare(SnapshotStatus::Downloading)
        }
    }

    pub fn finished(filename: impl Into<String>) -> Self {
        Self {
            percent: Some(100.0),
            filename: Some(filename.into()),
            ..Self::bare(SnapshotStatus::Finished)
        }
    }

    /// Terminal failure. An empty message is replaced by [`UNKNOWN_ERROR`].
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        };
        Self {
            error: Some(message),
            ..Self::bare(SnapshotStatus::Error)
        }
    }

    /// Sentinel returned for identifiers that were never dispatched.
    pub fn not_found() -> Self {
        Self {
            error: Some(NOT_FOUND_MESSAGE.to_string()),
            ..Self::bare(SnapshotStatus::NotFound)
        }
    }
}

/// Round to one decimal place.
pub fn round_percent(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
