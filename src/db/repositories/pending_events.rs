use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row, Transaction};

use crate::db::{
    helpers::{loose_integer, loose_text, to_i64, to_u64},
    models::{BufferEntry, EntryDefect},
    Database,
};
use crate::error::BufferError;
use crate::models::DetectionEvent;

const SELECT_COLUMNS: &str =
    "id, event_uid, timestamp, app_name, risk_category, reasoning, child_id";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<BufferEntry> {
    Ok(BufferEntry {
        id: row.get(0)?,
        event_uid: loose_text(row, 1)?,
        timestamp_ms: loose_integer(row, 2)?,
        app_name: loose_text(row, 3)?,
        risk_category: loose_text(row, 4)?,
        reasoning: loose_text(row, 5)?,
        child_id: loose_text(row, 6)?,
    })
}

fn delete_ids(tx: &Transaction<'_>, ids: &[i64]) -> Result<usize> {
    let mut stmt = tx.prepare_cached("DELETE FROM pending_events WHERE id = ?1")?;
    let mut removed = 0;
    for id in ids {
        removed += stmt.execute(params![id])?;
    }
    Ok(removed)
}

impl Database {
    /// Durably append one event. When this returns `Ok`, the row is committed
    /// to disk and will be seen by a later process.
    pub async fn append_event(&self, event: &DetectionEvent) -> Result<BufferEntry, BufferError> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pending_events (event_uid, timestamp, app_name, risk_category, reasoning, child_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.event_uid,
                    record.timestamp.timestamp_millis(),
                    record.source_app_name,
                    record.category.as_str(),
                    record.reasoning,
                    record.child_id,
                ],
            )
            .context("failed to insert pending event")?;

            Ok(BufferEntry {
                id: conn.last_insert_rowid(),
                event_uid: Some(record.event_uid),
                timestamp_ms: Some(record.timestamp.timestamp_millis()),
                app_name: Some(record.source_app_name),
                risk_category: Some(record.category.as_str().to_string()),
                reasoning: Some(record.reasoning),
                child_id: Some(record.child_id),
            })
        })
        .await
        .map_err(BufferError::Write)
    }

    /// Oldest-first page of at most `limit` pending entries.
    pub async fn peek_page(&self, limit: usize) -> Result<Vec<BufferEntry>, BufferError> {
        self.execute(move |conn| {
            let limit = to_i64(limit as u64)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM pending_events ORDER BY id ASC LIMIT ?1"
            ))?;
            let entries = stmt
                .query_map(params![limit], row_to_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
        .map_err(BufferError::Read)
    }

    /// Remove exactly these entries, atomically.
    pub async fn delete_batch(&self, entries: &[BufferEntry]) -> Result<usize, BufferError> {
        let ids: Vec<i64> = entries.iter().map(|entry| entry.id).collect();
        self.settle_batch(ids, Vec::new()).await
    }

    /// Delete committed entries and move defective ones to quarantine in one
    /// local transaction. Returns the number of committed rows removed.
    pub async fn settle_batch(
        &self,
        committed_ids: Vec<i64>,
        quarantined: Vec<(BufferEntry, EntryDefect)>,
    ) -> Result<usize, BufferError> {
        if committed_ids.is_empty() && quarantined.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open settle transaction")?;
            let removed = delete_ids(&tx, &committed_ids)?;

            if !quarantined.is_empty() {
                let now = Utc::now().to_rfc3339();
                {
                    let mut insert = tx.prepare_cached(
                        "INSERT OR REPLACE INTO quarantined_events
                            (id, event_uid, timestamp, app_name, risk_category, reasoning, child_id, defect, quarantined_at)
                         SELECT id, event_uid, timestamp, app_name, risk_category, reasoning, child_id, ?2, ?3
                         FROM pending_events WHERE id = ?1",
                    )?;
                    for (entry, defect) in &quarantined {
                        insert.execute(params![entry.id, defect.to_string(), now])?;
                    }
                }
                let ids: Vec<i64> = quarantined.iter().map(|(entry, _)| entry.id).collect();
                delete_ids(&tx, &ids)?;
            }

            tx.commit().context("failed to commit settle transaction")?;
            Ok(removed)
        })
        .await
        .map_err(BufferError::Write)
    }

    pub async fn count(&self) -> Result<u64, BufferError> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM pending_events", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
        .map_err(BufferError::Read)
    }

    pub async fn quarantined_count(&self) -> Result<u64, BufferError> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM quarantined_events", [], |row| row.get(0))?;
            to_u64(count, "quarantined count")
        })
        .await
        .map_err(BufferError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskCategory;

    fn event(child: &str, category: RiskCategory) -> DetectionEvent {
        DetectionEvent::new(child, "com.example", category, "test", Utc::now())
    }

    #[tokio::test]
    async fn append_peek_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();

        let first = db.append_event(&event("kid", RiskCategory::Nudity)).await.unwrap();
        let second = db.append_event(&event("kid", RiskCategory::Threat)).await.unwrap();
        assert!(first.id < second.id);
        assert_eq!(db.count().await.unwrap(), 2);

        let page = db.peek_page(1).await.unwrap();
        assert_eq!(page, vec![first.clone()]);

        assert_eq!(db.delete_batch(&page).await.unwrap(), 1);
        let rest = db.peek_page(10).await.unwrap();
        assert_eq!(rest, vec![second]);
    }

    #[tokio::test]
    async fn damaged_row_does_not_break_page() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
        db.append_event(&event("kid", RiskCategory::Violence)).await.unwrap();
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO pending_events (event_uid, timestamp, app_name, risk_category, reasoning, child_id)
                 VALUES ('bad', 'not-a-number', 'x', 'NUDITY', 'r', 'kid')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let page = db.peek_page(10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[1].timestamp_ms.is_none());
        assert!(page[1].validate().is_err());
    }

    #[tokio::test]
    async fn settle_moves_defects_to_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("buffer.sqlite3")).unwrap();
        let good = db.append_event(&event("kid", RiskCategory::Bullying)).await.unwrap();
        let bad = db.append_event(&event("kid", RiskCategory::Other)).await.unwrap();

        let removed = db
            .settle_batch(vec![good.id], vec![(bad, EntryDefect::Missing("child_id"))])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(db.count().await.unwrap(), 0);
        assert_eq!(db.quarantined_count().await.unwrap(), 1);
    }
}
