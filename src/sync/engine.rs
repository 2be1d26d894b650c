//! Drains the local buffer into the remote store in atomic batches.

use std::sync::Arc;

use serde::Serialize;

use crate::db::{BufferEntry, Database, EntryDefect};
use crate::error::SyncError;
use crate::metrics::MetricsCollector;
use crate::models::DetectionEvent;
use crate::{log_debug, log_error, log_info, log_warn};

use super::remote::{DocumentStore, LogWrite};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "sync";

/// Pages drained by one [`SyncEngine::drain`] call before yielding back to the scheduler.
const MAX_PAGES_PER_DRAIN: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Entries committed remotely and removed locally.
    pub committed: usize,
    /// The committed events, each carrying its `remote_id`.
    #[serde(skip)]
    pub synced: Vec<DetectionEvent>,
    /// Entries that failed validation and were moved to quarantine.
    pub quarantined: usize,
    /// Entries still pending after this run.
    pub remaining: u64,
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
    metrics: Option<MetricsCollector>,
}

impl SyncEngine {
    pub fn new(db: Database, store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self {
            db,
            store,
            batch_size: batch_size.max(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Sync one page.
    ///
    /// Entries are validated before the batch is built, so the remote
    /// commit covers exactly the valid entries of the page, all or nothing.
    /// On commit failure nothing is removed locally.
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        let page = self.db.peek_page(self.batch_size).await?;
        if page.is_empty() {
            log_debug!("nothing to sync");
            return Ok(SyncReport::default());
        }

        let (events, defects) = partition_page(page);
        for (entry, defect) in &defects {
            log_warn!("buffer entry {} is unusable: {defect}", entry.id);
        }

        if !events.is_empty() {
            let writes: Vec<LogWrite> = events.iter().map(LogWrite::from).collect();
            if let Err(err) = self.store.commit_batch(&writes).await {
                log_error!("commit of {} events failed: {err}", writes.len());
                return Err(SyncError::Commit(err));
            }
        }

        let committed_ids: Vec<i64> = events.iter().filter_map(|event| event.local_id).collect();
        let quarantined = defects.len();
        let committed = self.db.settle_batch(committed_ids, defects).await?;
        let remaining = self.db.count().await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_sync(committed, quarantined).await;
        }
        log_info!(
            "synced {committed} events, quarantined {quarantined}, {remaining} still pending"
        );

        Ok(SyncReport {
            committed,
            synced: events.into_iter().map(DetectionEvent::into_synced).collect(),
            quarantined,
            remaining,
        })
    }

    /// Run pages until the buffer is empty or a page comes back short.
    pub async fn drain(&self) -> Result<SyncReport, SyncError> {
        let mut total = SyncReport::default();
        for _ in 0..MAX_PAGES_PER_DRAIN {
            let mut report = self.run_once().await?;
            total.committed += report.committed;
            total.synced.append(&mut report.synced);
            total.quarantined += report.quarantined;
            total.remaining = report.remaining;
            if report.committed + report.quarantined < self.batch_size || report.remaining == 0 {
                break;
            }
        }
        Ok(total)
    }
}

/// Events carry their buffer id as `local_id`.
fn partition_page(
    page: Vec<BufferEntry>,
) -> (Vec<DetectionEvent>, Vec<(BufferEntry, EntryDefect)>) {
    let mut events = Vec::with_capacity(page.len());
    let mut defects = Vec::new();
    for entry in page {
        match entry.validate() {
            Ok(event) => events.push(event),
            Err(defect) => defects.push((entry, defect)),
        }
    }
    (events, defects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskCategory;
    use crate::sync::remote::MemoryDocumentStore;
    use chrono::Utc;

    async fn setup(
        batch_size: usize,
    ) -> (tempfile::TempDir, Database, Arc<MemoryDocumentStore>, SyncEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
        let store = Arc::new(MemoryDocumentStore::new());
        let engine = SyncEngine::new(db.clone(), store.clone(), batch_size);
        (dir, db, store, engine)
    }

    fn event(category: RiskCategory) -> DetectionEvent {
        DetectionEvent::new("kid-1", "com.whatsapp", category, "reason", Utc::now())
    }

    #[tokio::test]
    async fn empty_buffer_succeeds_trivially() {
        let (_dir, _db, store, engine) = setup(10).await;
        assert_eq!(engine.run_once().await.unwrap(), SyncReport::default());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn pages_are_bounded() {
        let (_dir, db, store, engine) = setup(2).await;
        for _ in 0..5 {
            db.append_event(&event(RiskCategory::Nudity)).await.unwrap();
        }

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.committed, 2);
        assert_eq!(report.remaining, 3);
        for event in &report.synced {
            assert_eq!(event.remote_id.as_deref(), Some(event.event_uid.as_str()));
        }
        assert_eq!(store.document_count(), 2);

        let report = engine.drain().await.unwrap();
        assert_eq!(report.committed, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(store.document_count(), 5);
    }

    #[tokio::test]
    async fn failed_commit_keeps_everything() {
        let (_dir, db, store, engine) = setup(10).await;
        db.append_event(&event(RiskCategory::Grooming)).await.unwrap();
        db.append_event(&event(RiskCategory::Threat)).await.unwrap();
        store.set_offline(true);

        assert!(matches!(
            engine.run_once().await,
            Err(SyncError::Commit(_))
        ));
        assert_eq!(db.count().await.unwrap(), 2);
        assert_eq!(store.document_count(), 0);
    }
}
