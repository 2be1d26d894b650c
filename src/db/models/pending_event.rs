//! On-disk representation of a detection event pending sync.
//!
//! Columns are held loosely (`Option`) because a row is only trusted after
//! [`BufferEntry::validate`]; the sync engine filters invalid rows out before
//! it builds a batch.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{DetectionEvent, RiskCategory};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferEntry {
    pub id: i64,
    pub event_uid: Option<String>,
    pub timestamp_ms: Option<i64>,
    pub app_name: Option<String>,
    pub risk_category: Option<String>,
    pub reasoning: Option<String>,
    pub child_id: Option<String>,
}

/// Why a buffered row cannot be committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryDefect {
    #[error("missing or empty column '{0}'")]
    Missing(&'static str),
    #[error("timestamp {0} is not a valid epoch-millis value")]
    InvalidTimestamp(i64),
    #[error("unknown risk category '{0}'")]
    UnknownCategory(String),
    #[error("'{0}' is not usable as a document id")]
    InvalidDocumentId(String),
}

impl BufferEntry {
    /// Rebuild the domain event, or report the first defect found.
    pub fn validate(&self) -> Result<DetectionEvent, EntryDefect> {
        let event_uid = required(&self.event_uid, "event_uid")?;
        let child_id = required(&self.child_id, "child_id")?;
        check_document_id(event_uid)?;
        check_document_id(child_id)?;

        let millis = self.timestamp_ms.ok_or(EntryDefect::Missing("timestamp"))?;
        let timestamp = parse_millis(millis)?;

        let raw_category = required(&self.risk_category, "risk_category")?;
        let category: RiskCategory = raw_category
            .parse()
            .map_err(|_| EntryDefect::UnknownCategory(raw_category.to_string()))?;

        Ok(DetectionEvent {
            local_id: Some(self.id),
            remote_id: None,
            event_uid: event_uid.to_string(),
            timestamp,
            source_app_name: self.app_name.clone().unwrap_or_default(),
            category,
            reasoning: self.reasoning.clone().unwrap_or_default(),
            child_id: child_id.to_string(),
        })
    }
}

fn required<'a>(value: &'a Option<String>, column: &'static str) -> Result<&'a str, EntryDefect> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(EntryDefect::Missing(column)),
    }
}

fn check_document_id(value: &str) -> Result<(), EntryDefect> {
    if value.contains('/') || value == "." || value == ".." {
        return Err(EntryDefect::InvalidDocumentId(value.to_string()));
    }
    Ok(())
}

fn parse_millis(millis: i64) -> Result<DateTime<Utc>, EntryDefect> {
    if millis <= 0 {
        return Err(EntryDefect::InvalidTimestamp(millis));
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(EntryDefect::InvalidTimestamp(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BufferEntry {
        BufferEntry {
            id: 3,
            event_uid: Some("abc123".into()),
            timestamp_ms: Some(1_700_000_000_000),
            app_name: Some("com.discord".into()),
            risk_category: Some("THREAT".into()),
            reasoning: Some("threatening message".into()),
            child_id: Some("kid-1".into()),
        }
    }

    #[test]
    fn valid_entry_round_trips_to_event() {
        let event = entry().validate().unwrap();
        assert_eq!(event.local_id, Some(3));
        assert_eq!(event.category, RiskCategory::Threat);
        assert_eq!(event.child_id, "kid-1");
        assert!(event.remote_id.is_none());
    }

    #[test]
    fn defects_are_reported() {
        let mut bad = entry();
        bad.child_id = Some("  ".into());
        assert_eq!(bad.validate(), Err(EntryDefect::Missing("child_id")));

        let mut bad = entry();
        bad.risk_category = Some("BOGUS".into());
        assert_eq!(
            bad.validate(),
            Err(EntryDefect::UnknownCategory("BOGUS".into()))
        );

        let mut bad = entry();
        bad.timestamp_ms = None;
        assert_eq!(bad.validate(), Err(EntryDefect::Missing("timestamp")));

        let mut bad = entry();
        bad.child_id = Some("a/b".into());
        assert!(matches!(
            bad.validate(),
            Err(EntryDefect::InvalidDocumentId(_))
        ));
    }
}
