//! In-memory table of job statuses.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::identity::TileId;
use crate::status::events::{JobProgressBroadcaster, JobProgressEvent};
use crate::status::job::{JobStatus, StatusUpdate};

/// Transient status of every job accepted since process start.
///
/// Entries are never persisted and never cleared automatically: a failed job
/// keeps its error until the same identifier is resubmitted. Each write is
/// also published as a [`JobProgressEvent`].
pub struct JobStatusTable {
    entries: RwLock<HashMap<TileId, JobStatus>>,
    broadcaster: JobProgressBroadcaster,
}

impl JobStatusTable {
    pub fn new() -> Self {
        Self::with_broadcaster(JobProgressBroadcaster::default())
    }

    pub fn with_broadcaster(broadcaster: JobProgressBroadcaster) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            broadcaster,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TileId, JobStatus>> {
        match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job status lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TileId, JobStatus>> {
        match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job status lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn get(&self, id: &TileId) -> Option<JobStatus> {
        self.read().get(id).cloned()
    }

    /// Replaces the entry for `status.tile_id`.
    pub fn set(&self, status: JobStatus) {
        let event = JobProgressEvent::from(&status);
        self.write().insert(status.tile_id.clone(), status);
        self.broadcaster.send(event);
    }

    /// Applies a partial update. Returns the new status, or `None` if the
    /// identifier has no entry.
    pub fn update_in_place(&self, id: &TileId, update: StatusUpdate) -> Option<JobStatus> {
        let updated = {
            let mut entries = self.write();
            let status = entries.get_mut(id)?;
            status.apply(update);
            status.clone()
        };
        self.broadcaster.send(JobProgressEvent::from(&updated));
        Some(updated)
    }

    /// Seeds a queued entry unless a run for `id` is already queued or
    /// processing. The check and the insert happen under one lock.
    ///
    /// Returns the blocking entry when the claim is refused.
    pub fn try_claim(&self, id: &TileId, source_url: &str) -> Result<JobStatus, JobStatus> {
        let queued = {
            let mut entries = self.write();
            if let Some(existing) = entries.get(id) {
                if existing.is_active() {
                    return Err(existing.clone());
                }
            }
            let queued = JobStatus::queued(id.clone(), source_url);
            entries.insert(id.clone(), queued.clone());
            queued
        };
        self.broadcaster.send(JobProgressEvent::from(&queued));
        Ok(queued)
    }

    pub fn is_active(&self, id: &TileId) -> bool {
        self.read().get(id).map(JobStatus::is_active).unwrap_or(false)
    }

    /// All entries, most recently updated first.
    pub fn snapshot(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self.read().values().cloned().collect();
        statuses.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        statuses
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }
}

impl Default for JobStatusTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::identifier_for;
    use crate::status::job::{JobState, Stage};
    use std::sync::Arc;

    const URL: &str = "https://example.com/galaxy.tif";

    #[test]
    fn test_claim_seeds_queued_entry() {
        let table = JobStatusTable::new();
        let id = identifier_for(URL);

        let status = table.try_claim(&id, URL).unwrap();
        assert_eq!(status.status, JobState::Queued);
        assert_eq!(table.get(&id).unwrap().status, JobState::Queued);
        assert!(table.is_active(&id));
    }

    #[test]
    fn test_second_claim_is_refused_while_active() {
        let table = JobStatusTable::new();
        let id = identifier_for(URL);
        table.try_claim(&id, URL).unwrap();

        let refused = table.try_claim(&id, URL).unwrap_err();
        assert_eq!(refused.status, JobState::Queued);

        table.update_in_place(&id, StatusUpdate::stage(Stage::Downloading, 0, "Downloading"));
        let refused = table.try_claim(&id, URL).unwrap_err();
        assert_eq!(refused.status, JobState::Processing);
    }

    #[test]
    fn test_claim_after_failure_resets_entry() {
        let table = JobStatusTable::new();
        let id = identifier_for(URL);
        table.try_claim(&id, URL).unwrap();
        table.update_in_place(&id, StatusUpdate::stage(Stage::GeneratingTiles, 60, "Tiling"));
        table.update_in_place(&id, StatusUpdate::failed("boom"));

        let failed = table.get(&id).unwrap();
        assert_eq!(failed.status, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let fresh = table.try_claim(&id, URL).unwrap();
        assert_eq!(fresh.percentage, 0);
        assert!(fresh.error.is_none());
    }

    #[test]
    fn test_update_missing_entry_returns_none() {
        let table = JobStatusTable::new();
        let id = identifier_for(URL);
        assert!(table
            .update_in_place(&id, StatusUpdate::percentage(10))
            .is_none());
    }

    #[test]
    fn test_writes_are_broadcast() {
        let table = JobStatusTable::new();
        let mut rx = table.subscribe();
        let id = identifier_for(URL);

        table.try_claim(&id, URL).unwrap();
        table.update_in_place(&id, StatusUpdate::stage(Stage::Downloading, 5, "Downloading"));

        assert_eq!(rx.try_recv().unwrap().stage, Stage::Queued);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.stage, Stage::Downloading);
        assert_eq!(event.percentage, 5);
    }

    #[test]
    fn test_concurrent_claims_admit_exactly_one() {
        let table = Arc::new(JobStatusTable::new());
        let id = identifier_for(URL);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = Arc::clone(&table);
                let id = id.clone();
                std::thread::spawn(move || table.try_claim(&id, URL).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_set_replaces_entry() {
        let table = JobStatusTable::new();
        let id = identifier_for(URL);
        let mut status = JobStatus::queued(id.clone(), URL);
        status.message = "custom".to_string();
        table.set(status);

        assert_eq!(table.get(&id).unwrap().message, "custom");
        assert_eq!(table.snapshot().len(), 1);
    }
}
