// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! vidpull - Background video downloads with pollable progress
//!
//! Hand a URL to the dispatcher, get an id back at once, poll the id while
//! yt-dlp does the work on a background thread.
//!
//! # Core Modules
//!
//! - [`jobs`] - Dispatch, per-job execution and the progress store
//! - [`engine`] - Download engine contract and the yt-dlp implementation
//! - [`server`] - HTTP API over the dispatcher
//! - [`config`] - `~/.vidpull/config.json` handling
//! - [`errors`] - Request errors and their HTTP rendering

pub mod config;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod server;

pub use config::{Config, ConfigError};
pub use engine::{DownloadEngine, EngineConfig, EngineError, EngineEvent, YtDlpEngine};
pub use errors::{ApiError, DispatchError};
pub use jobs::{
    DispatchRequest, JobDispatcher, JobHandle, JobId, JobSettings, JobStatus, ProgressSnapshot,
    ProgressStore, SnapshotStatus,
};
pub use server::Server;
