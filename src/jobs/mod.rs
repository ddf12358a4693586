// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background download jobs for vidpull
//!
//! Every request becomes an independent job that runs off the request path
//! while its progress is kept in a shared store for polling:
//! - Dispatch validates the URL and returns an id immediately
//! - Each job drives the download engine on its own blocking thread
//! - Engine events are folded into per-job snapshots
//! - Queries return the latest snapshot or a `not_found` sentinel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ spawn ┌─────────────────┐
//! │ JobDispatcher   │──────▶│ JobRunner       │
//! │ (dispatch/poll) │       │ (blocking task) │
//! └────────┬────────┘       └────────┬────────┘
//!          │ query                   │ events
//!          ▼                         ▼
//! ┌─────────────────┐ write ┌─────────────────┐
//! │ ProgressStore   │◀──────│ProgressReporter │
//! │ (id → snapshot) │       │ (one per job)   │
//! └─────────────────┘       └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vidpull::engine::YtDlpEngine;
//! use vidpull::jobs::{DispatchRequest, JobDispatcher, JobSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = JobDispatcher::new(Arc::new(YtDlpEngine::default()), JobSettings::default());
//!
//! let handle = dispatcher.dispatch(DispatchRequest::new("https://example.com/watch?v=1"))?;
//! let snapshot = dispatcher.progress(handle.id().as_str());
//! println!("Status: {:?}", snapshot.status);
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod dispatcher;
pub mod reporter;
pub mod runner;
pub mod store;
pub mod types;

pub use credentials::CredentialFile;
pub use dispatcher::{validate_url, DispatchRequest, JobDispatcher, JobHandle};
pub use reporter::ProgressReporter;
pub use runner::{JobRunner, JobSettings, DEFAULT_FORMAT, OUTPUT_TEMPLATE};
pub use store::{JobEntry, ProgressStore};
pub use types::{JobId, JobIdGenerator, JobStatus, ProgressSnapshot, SnapshotStatus};
