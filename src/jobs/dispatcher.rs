// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Public entry points: start a job, poll its progress.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use url::Url;

use crate::engine::{DownloadEngine, EngineOptions};
use crate::errors::DispatchError;

use super::runner::{JobRunner, JobSettings};
use super::store::ProgressStore;
use super::types::{JobId, JobIdGenerator, JobStatus, ProgressSnapshot};

/// A download request as received from a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub options: Option<EngineOptions>,
}

impl DispatchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Handle to a dispatched job.
///
/// Dropping the handle detaches the job; it keeps running.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    started_at: DateTime<Utc>,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Time since dispatch.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the job body has returned.
    pub async fn wait(self) -> JobId {
        if let Err(e) = self.task.await {
            tracing::warn!(job = %self.id, error = %e, "Job task did not complete cleanly");
        }
        self.id
    }
}

/// Check that `raw` is an absolute `scheme://host...` URL.
///
/// The URL parser repairs inputs such as `http:example.com`; those are
/// rejected because the client never supplied an authority.
pub fn validate_url(raw: &str) -> Result<String, DispatchError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::MissingUrl);
    }
    let parsed = Url::parse(trimmed).map_err(|e| DispatchError::InvalidUrl(e.to_string()))?;
    let after_scheme = trimmed.get(parsed.scheme().len()..).unwrap_or_default();
    if !after_scheme.starts_with("://") {
        return Err(DispatchError::InvalidUrl("URL has no authority".to_string()));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed.into()),
        _ => Err(DispatchError::InvalidUrl("URL has no host".to_string())),
    }
}

/// Starts jobs and answers progress queries.
///
/// Cloning is cheap; clones share the store, engine and id sequence.
#[derive(Clone)]
pub struct JobDispatcher {
    store: ProgressStore,
    engine: Arc<dyn DownloadEngine>,
    settings: Arc<JobSettings>,
    ids: Arc<JobIdGenerator>,
    limiter: Option<Arc<Semaphore>>,
}

impl JobDispatcher {
    pub fn new(engine: Arc<dyn DownloadEngine>, settings: JobSettings) -> Self {
        Self {
            store: ProgressStore::new(),
            engine,
            settings: Arc::new(settings),
            ids: Arc::new(JobIdGenerator::new()),
            limiter: None,
        }
    }

    /// Cap how many jobs run the engine at once. Jobs beyond the cap stay
    /// in `starting` until a slot frees up. Unlimited by default.
    pub fn with_max_concurrent_jobs(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|m| *m > 0).map(|m| Arc::new(Semaphore::new(m)));
        self
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Validate, register and start a job without waiting for it.
    ///
    /// The `starting` snapshot is in the store before this returns. Must be
    /// called from within a Tokio runtime.
    pub fn dispatch(&self, request: DispatchRequest) -> Result<JobHandle, DispatchError> {
        let url = validate_url(&request.url)?;
        let id = self.ids.next_id();
        self.store.register(&id);

        let runner = JobRunner::new(
            id.clone(),
            url,
            request.options.unwrap_or_default(),
            self.store.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.settings),
        );
        let store = self.store.clone();
        let limiter = self.limiter.clone();
        let job_id = id.clone();

        let task = tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => limiter.acquire_owned().await.ok(),
                None => None,
            };
            if let Err(e) = tokio::task::spawn_blocking(move || runner.run()).await {
                tracing::error!(job = %job_id, error = %e, "Download job panicked");
                store.fail(&job_id, format!("Download job aborted: {}", e));
            }
        });

        tracing::info!(job = %id, "Started download job");
        Ok(JobHandle {
            id,
            started_at: Utc::now(),
            task,
        })
    }

    /// Current snapshot for `id`, or the `not_found` sentinel.
    pub fn progress(&self, id: &str) -> ProgressSnapshot {
        self.store.query(&JobId::new(id))
    }

    pub fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.store.job_status(&JobId::new(id))
    }

    /// Forget every job. Running jobs keep writing and reappear.
    pub fn clear(&self) -> usize {
        let removed = self.store.clear();
        tracing::info!(removed, "Cleared progress tracking");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineError, EngineEvent};
    use crate::jobs::types::SnapshotStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    /// Reports half progress, then blocks until released.
    struct GatedEngine {
        gate: Mutex<mpsc::Receiver<()>>,
        calls: AtomicUsize,
    }

    impl DownloadEngine for GatedEngine {
        fn name(&self) -> &str {
            "gated"
        }

        fn download(
            &self,
            _url: &str,
            _config: &EngineConfig,
            on_event: &mut dyn FnMut(EngineEvent),
        ) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            on_event(EngineEvent::Downloading {
                downloaded_bytes: Some(50),
                total_bytes: Some(100),
                total_bytes_estimate: None,
                speed: None,
                eta: None,
                filename: None,
            });
            let _ = self.gate.lock().unwrap().recv();
            on_event(EngineEvent::Finished { filename: "out.mp4".to_string() });
            Ok(())
        }
    }

    struct FailingEngine;

    impl DownloadEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn download(&self, _: &str, _: &EngineConfig, _: &mut dyn FnMut(EngineEvent)) -> Result<(), EngineError> {
            Err(EngineError::Failed { code: Some(1), message: "Unsupported URL".to_string() })
        }
    }

    /// Panics mid-download, after noting whether a cookie file was present.
    #[derive(Default)]
    struct PanickingEngine {
        saw_cookie_file: AtomicBool,
    }

    impl DownloadEngine for PanickingEngine {
        fn name(&self) -> &str {
            "panicking"
        }

        fn download(&self, _: &str, config: &EngineConfig, _: &mut dyn FnMut(EngineEvent)) -> Result<(), EngineError> {
            let present = config.cookie_file().map_or(false, |p| p.exists());
            self.saw_cookie_file.store(present, Ordering::SeqCst);
            panic!("engine blew up");
        }
    }

    fn gated() -> (Arc<GatedEngine>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let engine = Arc::new(GatedEngine {
            gate: Mutex::new(rx),
            calls: AtomicUsize::new(0),
        });
        (engine, tx)
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(validate_url("  https://example.com/watch?v=1 "), Ok("https://example.com/watch?v=1".to_string()));
        assert_eq!(validate_url("HTTPS://Example.com/a"), Ok("https://example.com/a".to_string()));
        assert_eq!(validate_url(""), Err(DispatchError::MissingUrl));
        assert_eq!(validate_url("   "), Err(DispatchError::MissingUrl));
        assert!(matches!(validate_url("example.com/video"), Err(DispatchError::InvalidUrl(_))));
        assert!(matches!(validate_url("mailto:someone@example.com"), Err(DispatchError::InvalidUrl(_))));
        assert!(matches!(validate_url("https://"), Err(DispatchError::InvalidUrl(_))));
        for repaired in ["http:example.com", "https:/example.com/x", "http:\\\\example.com"] {
            assert!(matches!(validate_url(repaired), Err(DispatchError::InvalidUrl(_))), "{}", repaired);
        }
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_job() {
        let dispatcher = JobDispatcher::new(Arc::new(FailingEngine), JobSettings::default());
        for url in ["", "not a url", "/relative/path", "file:///etc/passwd"] {
            assert!(dispatcher.dispatch(DispatchRequest::new(url)).is_err(), "{}", url);
        }
        assert!(dispatcher.store().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_right_after_dispatch_is_not_not_found() {
        let (engine, release) = gated();
        let dispatcher = JobDispatcher::new(engine, JobSettings::default());

        let handle = dispatcher.dispatch(DispatchRequest::new("https://example.com/v")).unwrap();
        let snapshot = dispatcher.progress(handle.id().as_str());
        assert_ne!(snapshot.status, SnapshotStatus::NotFound);
        assert!(!handle.is_finished());

        release.send(()).unwrap();
        let id = handle.wait().await;
        let snapshot = dispatcher.progress(id.as_str());
        assert_eq!(snapshot.status, SnapshotStatus::Finished);
        assert_eq!(snapshot.percent, Some(100.0));
        assert_eq!(dispatcher.job_status(id.as_str()), Some(JobStatus::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_failure_surfaces_through_query() {
        let dispatcher = JobDispatcher::new(Arc::new(FailingEngine), JobSettings::default());
        let id = dispatcher
            .dispatch(DispatchRequest::new("https://example.com/v"))
            .unwrap()
            .wait()
            .await;

        let snapshot = dispatcher.progress(id.as_str());
        assert_eq!(snapshot.status, SnapshotStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("Unsupported URL"));
        assert_eq!(dispatcher.job_status(id.as_str()), Some(JobStatus::Error));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_engine_is_contained() {
        let temp = tempfile::tempdir().unwrap();
        let settings = JobSettings {
            temp_dir: Some(temp.path().to_path_buf()),
            ..JobSettings::default()
        };
        let engine = Arc::new(PanickingEngine::default());
        let dispatcher = JobDispatcher::new(engine.clone(), settings);

        let mut options = EngineOptions::new();
        options.insert("cookiedata".to_string(), "# Netscape HTTP Cookie File".into());
        let id = dispatcher
            .dispatch(DispatchRequest::new("https://example.com/v").with_options(options))
            .unwrap()
            .wait()
            .await;

        let snapshot = dispatcher.progress(id.as_str());
        assert_eq!(snapshot.status, SnapshotStatus::Error);
        assert!(!snapshot.error.unwrap().is_empty());
        // The cookie file is removed while the panic unwinds.
        assert!(engine.saw_cookie_file.load(Ordering::SeqCst));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_ceiling_holds_jobs_in_starting() {
        let (engine, release) = gated();
        let dispatcher = JobDispatcher::new(engine.clone(), JobSettings::default())
            .with_max_concurrent_jobs(Some(1));

        let first = dispatcher.dispatch(DispatchRequest::new("https://example.com/1")).unwrap();
        let second = dispatcher.dispatch(DispatchRequest::new("https://example.com/2")).unwrap();

        // Wait for the first job to report progress.
        for _ in 0..200 {
            if dispatcher.progress(first.id().as_str()).status == SnapshotStatus::Downloading {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dispatcher.progress(first.id().as_str()).status, SnapshotStatus::Downloading);
        assert_eq!(dispatcher.progress(second.id().as_str()).status, SnapshotStatus::Starting);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        release.send(()).unwrap();
        let first = first.wait().await;
        let second = second.wait().await;
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.progress(first.as_str()).status, SnapshotStatus::Finished);
        assert_eq!(dispatcher.progress(second.as_str()).status, SnapshotStatus::Finished);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let dispatcher = JobDispatcher::new(Arc::new(FailingEngine), JobSettings::default());
        let a = dispatcher.dispatch(DispatchRequest::new("https://example.com/a")).unwrap();
        let b = dispatcher.dispatch(DispatchRequest::new("https://example.com/b")).unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.elapsed() >= chrono::Duration::zero());
        a.wait().await;
        b.wait().await;
    }

    #[tokio::test]
    async fn test_clear_forgets_jobs() {
        let dispatcher = JobDispatcher::new(Arc::new(FailingEngine), JobSettings::default());
        let id = dispatcher
            .dispatch(DispatchRequest::new("https://example.com/a"))
            .unwrap()
            .wait()
            .await;

        assert_eq!(dispatcher.clear(), 1);
        assert_eq!(dispatcher.progress(id.as_str()).status, SnapshotStatus::NotFound);
    }
}
