// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide progress and status store.
//!
//! Every job thread writes its own entry; every query reads any entry. The
//! whole map sits behind one `RwLock` because the key set grows as jobs are
//! dispatched. Each write replaces an entry in full, so readers observe
//! either the old or the new snapshot and never a mix.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{JobId, JobStatus, ProgressSnapshot};

/// Acquire a read lock, recovering the data if a writer panicked.
fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "vidpull::store",
                event = "LOCK_POISONED_READ",
                "Progress store lock was poisoned; a job thread panicked while writing. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering the data if a writer panicked.
fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "vidpull::store",
                event = "LOCK_POISONED_WRITE",
                "Progress store lock was poisoned; a job thread panicked while writing. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// One job's tracked state.
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub snapshot: ProgressSnapshot,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cheaply cloneable handle to the shared store.
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    entries: Arc<RwLock<HashMap<JobId, JobEntry>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a freshly dispatched job, or reset an existing
    /// one back to `starting`.
    pub fn register(&self, id: &JobId) {
        let now = Utc::now();
        let mut entries = resilient_write(&self.entries);
        let created_at = entries.get(id).map(|e| e.created_at).unwrap_or(now);
        entries.insert(
            id.clone(),
            JobEntry {
                snapshot: ProgressSnapshot::starting(),
                status: JobStatus::Downloading,
                created_at,
                updated_at: now,
            },
        );
    }

    /// Replace the snapshot, and the status when one is given.
    ///
    /// Writes for identifiers that are not registered (for example after a
    /// bulk clear) create the entry, so a running job stays observable.
    pub fn record(&self, id: &JobId, snapshot: ProgressSnapshot, status: Option<JobStatus>) {
        let now = Utc::now();
        let mut entries = resilient_write(&self.entries);
        match entries.get_mut(id) {
            Some(entry) => {
                entry.snapshot = snapshot;
                if let Some(status) = status {
                    entry.status = status;
                }
                entry.updated_at = now;
            }
            None => {
                entries.insert(
                    id.clone(),
                    JobEntry {
                        snapshot,
                        status: status.unwrap_or(JobStatus::Downloading),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Mark a job as failed with the given message.
    pub fn fail(&self, id: &JobId, message: impl Into<String>) {
        self.record(id, ProgressSnapshot::failed(message), Some(JobStatus::Error));
    }

    /// Current snapshot, if the identifier is known.
    pub fn snapshot(&self, id: &JobId) -> Option<ProgressSnapshot> {
        resilient_read(&self.entries).get(id).map(|e| e.snapshot.clone())
    }

    /// Current snapshot, or the `not_found` sentinel.
    pub fn query(&self, id: &JobId) -> ProgressSnapshot {
        self.snapshot(id).unwrap_or_else(ProgressSnapshot::not_found)
    }

    pub fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        resilient_read(&self.entries).get(id).map(|e| e.status)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        resilient_read(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs that have not reached a terminal status.
    pub fn active_count(&self) -> usize {
        resilient_read(&self.entries)
            .values()
            .filter(|e| !e.status.is_terminal())
            .count()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = resilient_write(&self.entries);
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Drop completed and failed entries whose last update is older than
    /// `ttl`. Jobs that are still starting or downloading are never evicted.
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let mut entries = resilient_write(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| {
            if !e.status.is_terminal() {
                return true;
            }
            // A negative age (clock stepped back) keeps the entry.
            (now - e.updated_at).to_std().map_or(true, |age| age <= ttl)
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::SnapshotStatus;
    use std::thread;

    #[test]
    fn test_unknown_id_is_not_found() {
        let store = ProgressStore::new();
        let snapshot = store.query(&JobId::from("download_1"));
        assert_eq!(snapshot.status, SnapshotStatus::NotFound);
        assert!(store.job_status(&JobId::from("download_1")).is_none());
    }

    #[test]
    fn test_register_then_query() {
        let store = ProgressStore::new();
        let id = JobId::from("download_42");
        store.register(&id);

        assert_eq!(store.query(&id), ProgressSnapshot::starting());
        assert_eq!(store.job_status(&id), Some(JobStatus::Downloading));
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_record_replaces_whole_snapshot() {
        let store = ProgressStore::new();
        let id = JobId::from("download_7");
        store.register(&id);

        store.record(&id, ProgressSnapshot::downloading(10.0, 10, 100, 5.0, 3, "a.mp4"), None);
        store.record(&id, ProgressSnapshot::finished("a.mp4"), Some(JobStatus::Completed));

        let snapshot = store.query(&id);
        assert_eq!(snapshot, ProgressSnapshot::finished("a.mp4"));
        assert!(snapshot.downloaded_bytes.is_none());
        assert_eq!(store.job_status(&id), Some(JobStatus::Completed));
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_status_untouched_without_override() {
        let store = ProgressStore::new();
        let id = JobId::from("download_8");
        store.register(&id);
        store.fail(&id, "boom");
        store.record(&id, ProgressSnapshot::starting(), None);
        assert_eq!(store.job_status(&id), Some(JobStatus::Error));
    }

    #[test]
    fn test_clear() {
        let store = ProgressStore::new();
        for n in 0..5 {
            store.register(&JobId::new(format!("download_{}", n)));
        }
        assert_eq!(store.clear(), 5);
        assert!(store.is_empty());
        assert_eq!(store.query(&JobId::from("download_0")).status, SnapshotStatus::NotFound);
    }

    #[test]
    fn test_evict_older_than_drops_stale_finished_jobs() {
        let store = ProgressStore::new();
        let completed = JobId::from("download_9");
        let failed = JobId::from("download_10");
        store.register(&completed);
        store.register(&failed);
        store.record(&completed, ProgressSnapshot::finished("a.mp4"), Some(JobStatus::Completed));
        store.fail(&failed, "HTTP Error 404");

        assert_eq!(store.evict_older_than(Duration::from_secs(3600)), 0);
        assert!(store.contains(&completed));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(store.evict_older_than(Duration::from_millis(1)), 2);
        assert!(!store.contains(&completed));
        assert_eq!(store.query(&failed).status, SnapshotStatus::NotFound);
    }

    #[test]
    fn test_evict_older_than_keeps_running_jobs() {
        let store = ProgressStore::new();
        let queued = JobId::from("download_11");
        let running = JobId::from("download_12");
        store.register(&queued);
        store.register(&running);
        store.record(
            &running,
            ProgressSnapshot::downloading(40.0, 40, 100, 0.0, 0, "b.mp4"),
            None,
        );

        thread::sleep(Duration::from_millis(20));
        assert_eq!(store.evict_older_than(Duration::from_millis(1)), 0);
        assert_eq!(store.query(&queued).status, SnapshotStatus::Starting);
        assert_eq!(store.query(&running).status, SnapshotStatus::Downloading);
        assert_eq!(store.job_status(&running), Some(JobStatus::Downloading));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = ProgressStore::new();
        let mut handles = Vec::new();

        for n in 0..16 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                let id = JobId::new(format!("download_{}", n));
                store.register(&id);
                for step in 0..=100u64 {
                    store.record(
                        &id,
                        ProgressSnapshot::downloading(step as f64, step, 100, 1.0, 0, format!("{}.mp4", n)),
                        None,
                    );
                    let seen = store.query(&id);
                    assert_eq!(seen.filename, Some(format!("{}.mp4", n)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 16);
        for n in 0..16 {
            let snapshot = store.query(&JobId::new(format!("download_{}", n)));
            assert_eq!(snapshot.percent, Some(100.0));
        }
    }

    #[test]
    fn test_recovers_from_poisoned_lock() {
        let store = ProgressStore::new();
        let id = JobId::from("download_1");
        store.register(&id);

        let poisoner = store.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("intentional panic to poison lock");
        })
        .join();

        assert_eq!(store.query(&id).status, SnapshotStatus::Starting);
        store.fail(&id, "after poison");
        assert_eq!(store.job_status(&id), Some(JobStatus::Error));
    }
}
