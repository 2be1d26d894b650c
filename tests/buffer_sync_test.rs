//! Durability of the local buffer and its reconciliation with the remote store.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use screenguard::db::Database;
use screenguard::error::SyncError;
use screenguard::models::{DetectionEvent, RiskCategory};
use screenguard::reports::weekly_digest;
use screenguard::settings::SettingsStore;
use screenguard::sync::{
    DocumentStore, EnqueueResult, LogWrite, MemoryDocumentStore, SyncEngine, SYNC_JOB_NAME,
};
use screenguard::AppState;

use common::{test_settings, CHILD_ID};

fn detection(category: RiskCategory) -> DetectionEvent {
    DetectionEvent::new(CHILD_ID, "com.example.app", category, "flagged", Utc::now())
}

async fn seed(db: &Database, categories: &[RiskCategory]) -> Vec<DetectionEvent> {
    let mut events = Vec::new();
    for category in categories {
        let event = detection(*category);
        db.append_event(&event).await.unwrap();
        events.push(event);
    }
    events
}

#[tokio::test]
async fn appended_events_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buffer.sqlite3");

    let db = Database::new(path.clone()).unwrap();
    let events = seed(
        &db,
        &[RiskCategory::Nudity, RiskCategory::Violence, RiskCategory::Threat],
    )
    .await;
    drop(db);

    let reopened = Database::new(path).unwrap();
    assert_eq!(reopened.count().await.unwrap(), 3);
    let uids: Vec<String> = reopened
        .peek_page(10)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.validate().unwrap().event_uid)
        .collect();
    let expected: Vec<String> = events.into_iter().map(|event| event.event_uid).collect();
    assert_eq!(uids, expected);
}

#[tokio::test]
async fn appended_events_survive_without_a_clean_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("buffer.sqlite3");

    let db = Database::new(path.clone()).unwrap();
    seed(&db, &[RiskCategory::Grooming]).await;
    // Never runs the shutdown path, as if the process were killed.
    std::mem::forget(db);

    let reopened = Database::new(path).unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
}

#[tokio::test]
async fn malformed_row_is_quarantined_while_valid_rows_sync() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
    seed(&db, &[RiskCategory::Bullying, RiskCategory::Nudity]).await;
    db.execute(|conn| {
        conn.execute(
            "INSERT INTO pending_events (event_uid, timestamp, app_name, risk_category, reasoning, child_id)
             VALUES ('corrupt-row', 1700000000000, 'com.example.app', 'NOT_A_CATEGORY', 'x', 'child-1')",
            [],
        )?;
        Ok(())
    })
    .await
    .unwrap();

    let remote = Arc::new(MemoryDocumentStore::new());
    let engine = SyncEngine::new(db.clone(), remote.clone(), 500);
    let report = engine.run_once().await.unwrap();

    assert_eq!(report.committed, 2);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.synced.len(), 2);
    assert!(report
        .synced
        .iter()
        .all(|event| event.remote_id.as_deref() == Some(event.event_uid.as_str())));
    assert_eq!(remote.commit_count(), 1);
    assert_eq!(remote.document_count(), 2);
    assert_eq!(db.count().await.unwrap(), 0);
    assert_eq!(db.quarantined_count().await.unwrap(), 1);

    let mut categories: Vec<String> = remote
        .logs_for(CHILD_ID)
        .into_iter()
        .map(|log| log.risk_category)
        .collect();
    categories.sort();
    assert_eq!(categories, vec!["BULLYING", "NUDITY"]);
}

#[tokio::test]
async fn failed_commit_removes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
    seed(&db, &[RiskCategory::Threat, RiskCategory::Other]).await;

    let remote = Arc::new(MemoryDocumentStore::new());
    remote.set_offline(true);
    let engine = SyncEngine::new(db.clone(), remote.clone(), 500);

    let result = engine.run_once().await;
    assert!(matches!(result, Err(SyncError::Commit(_))));
    assert_eq!(db.count().await.unwrap(), 2);
    assert_eq!(remote.document_count(), 0);

    remote.set_offline(false);
    let report = engine.drain().await.unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(db.count().await.unwrap(), 0);
}

#[tokio::test]
async fn replayed_event_overwrites_its_remote_document() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
    let events = seed(&db, &[RiskCategory::Violence]).await;

    // The commit landed remotely but the local delete never happened.
    let remote = Arc::new(MemoryDocumentStore::new());
    remote
        .commit_batch(&[LogWrite::from(&events[0])])
        .await
        .unwrap();

    let engine = SyncEngine::new(db.clone(), remote.clone(), 500);
    engine.drain().await.unwrap();

    assert_eq!(remote.document_count(), 1);
    assert_eq!(db.count().await.unwrap(), 0);
}

#[tokio::test]
async fn drain_pages_through_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
    seed(&db, &[RiskCategory::Nudity; 5]).await;

    let remote = Arc::new(MemoryDocumentStore::new());
    let engine = SyncEngine::new(db.clone(), remote.clone(), 2);
    let report = engine.drain().await.unwrap();

    assert_eq!(report.committed, 5);
    assert_eq!(report.remaining, 0);
    assert_eq!(remote.commit_count(), 3);
}

#[tokio::test]
async fn rapid_sync_requests_share_one_runner() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryDocumentStore::new());
    remote.set_commit_delay(Some(Duration::from_millis(200)));
    let store: Arc<dyn DocumentStore> = remote.clone();
    let settings_store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
    let state =
        AppState::with_store(settings_store, test_settings(dir.path()), Some(store)).unwrap();
    let trigger = state.sync_trigger().unwrap();

    seed(&state.db, &[RiskCategory::Nudity]).await;
    assert_eq!(trigger.request(), EnqueueResult::Started);
    seed(&state.db, &[RiskCategory::Bullying]).await;
    assert_eq!(trigger.request(), EnqueueResult::Merged);
    assert_eq!(trigger.request(), EnqueueResult::Merged);
    assert!(state.scheduler.is_pending(SYNC_JOB_NAME));

    tokio::time::timeout(Duration::from_secs(5), state.scheduler.wait_idle(SYNC_JOB_NAME))
        .await
        .unwrap();

    assert!(remote.commit_count() <= 2);
    assert_eq!(remote.document_count(), 2);
    assert_eq!(state.db.count().await.unwrap(), 0);
    state.scheduler.shutdown().await;
}

#[tokio::test]
async fn digest_covers_only_the_last_week() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
    let mut stale = detection(RiskCategory::Threat);
    stale.timestamp = Utc::now() - ChronoDuration::days(10);
    db.append_event(&stale).await.unwrap();
    seed(&db, &[RiskCategory::Nudity, RiskCategory::Nudity, RiskCategory::Bullying]).await;

    let remote = Arc::new(MemoryDocumentStore::new());
    SyncEngine::new(db, remote.clone(), 500)
        .drain()
        .await
        .unwrap();
    assert_eq!(remote.document_count(), 4);

    let digest = weekly_digest(remote.as_ref(), CHILD_ID, "Sam", Utc::now())
        .await
        .unwrap();
    assert_eq!(digest.intervention_count, 3);
    assert_eq!(digest.by_category.get("NUDITY"), Some(&2));
    assert!(!digest.by_category.contains_key("THREAT"));
}
