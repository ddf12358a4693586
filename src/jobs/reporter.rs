// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turns engine events into store updates for one job.

use crate::engine::EngineEvent;

use super::store::ProgressStore;
use super::types::{round_percent, JobId, JobStatus, ProgressSnapshot, UNKNOWN_ERROR, UNKNOWN_FILENAME};

/// Callback target bound to a single job.
///
/// The engine calls [`report`](Self::report) sequentially from the job's own
/// thread, so updates for one job are strictly ordered.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    id: JobId,
    store: ProgressStore,
}

impl ProgressReporter {
    pub fn new(id: JobId, store: ProgressStore) -> Self {
        Self { id, store }
    }

    pub fn report(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Downloading {
                downloaded_bytes,
                total_bytes,
                total_bytes_estimate,
                speed,
                eta,
                filename,
            } => {
                let downloaded = downloaded_bytes.unwrap_or(0);
                let total = total_bytes
                    .filter(|t| *t > 0)
                    .or_else(|| total_bytes_estimate.map(|e| e.max(0.0).round() as u64))
                    .unwrap_or(0);
                let percent = if total > 0 {
                    round_percent(downloaded as f64 / total as f64 * 100.0)
                } else {
                    0.0
                };
                let eta = eta.map(|e| e.max(0.0).round() as u64).unwrap_or(0);

                self.store.record(
                    &self.id,
                    ProgressSnapshot::downloading(
                        percent,
                        downloaded,
                        total,
                        speed.unwrap_or(0.0),
                        eta,
                        filename.unwrap_or_else(|| UNKNOWN_FILENAME.to_string()),
                    ),
                    None,
                );
            }
            EngineEvent::Finished { filename } => {
                tracing::info!(job = %self.id, filename = %filename, "Download finished");
                self.store.record(
                    &self.id,
                    ProgressSnapshot::finished(filename),
                    Some(JobStatus::Completed),
                );
            }
            EngineEvent::Error { error } => {
                let message = error.unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                tracing::error!(job = %self.id, error = %message, "Engine reported an error");
                self.store.record(
                    &self.id,
                    ProgressSnapshot::failed(message),
                    Some(JobStatus::Error),
                );
            }
            EngineEvent::Unrecognized => {
                tracing::debug!(job = %self.id, "Ignoring unrecognized engine event");
            }
        }
    }
}
