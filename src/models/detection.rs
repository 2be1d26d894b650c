//! Detection events and their remote document shape.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RiskCategory;

/// A recorded unsafe finding.
///
/// `local_id` is the buffer's surrogate key once appended. `remote_id` is set
/// by [`DetectionEvent::into_synced`] only after the remote commit succeeded
/// and the local row was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub local_id: Option<i64>,
    pub remote_id: Option<String>,
    /// Stable identity assigned at detection time; the remote document id is
    /// derived from it so replayed commits overwrite instead of duplicating.
    pub event_uid: String,
    pub timestamp: DateTime<Utc>,
    pub source_app_name: String,
    pub category: RiskCategory,
    pub reasoning: String,
    pub child_id: String,
}

impl DetectionEvent {
    pub fn new(
        child_id: impl Into<String>,
        source_app_name: impl Into<String>,
        category: RiskCategory,
        reasoning: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id: None,
            remote_id: None,
            event_uid: Uuid::new_v4().simple().to_string(),
            timestamp,
            source_app_name: source_app_name.into(),
            category,
            reasoning: reasoning.into(),
            child_id: child_id.into(),
        }
    }

    pub(crate) fn into_synced(mut self) -> Self {
        self.remote_id = Some(self.remote_document_id());
        self
    }

    /// Remote document id for this event under `childs/{childId}/logs/`.
    pub fn remote_document_id(&self) -> String {
        self.event_uid.clone()
    }

    pub fn to_remote_log(&self) -> RemoteLog {
        RemoteLog {
            id: self.remote_document_id(),
            timestamp: self.timestamp.timestamp_millis(),
            app_name: self.source_app_name.clone(),
            risk_category: self.category.as_str().to_string(),
            ai_reasoning: self.reasoning.clone(),
        }
    }
}

/// Document stored at `childs/{childId}/logs/{logId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLog {
    #[serde(default)]
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub risk_category: String,
    #[serde(default)]
    pub ai_reasoning: String,
}

impl RemoteLog {
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_log_uses_event_uid_and_wire_names() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let event = DetectionEvent::new("kid-1", "com.whatsapp", RiskCategory::Bullying, "x", at);
        let log = event.to_remote_log();
        assert_eq!(log.id, event.event_uid);
        assert_eq!(log.timestamp, 1_700_000_000_000);

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["riskCategory"], "BULLYING");
        assert_eq!(json["appName"], "com.whatsapp");
        assert_eq!(json["aiReasoning"], "x");
    }

    #[test]
    fn event_uids_are_unique() {
        let at = Utc::now();
        let a = DetectionEvent::new("c", "a", RiskCategory::Other, "", at);
        let b = DetectionEvent::new("c", "a", RiskCategory::Other, "", at);
        assert_ne!(a.event_uid, b.event_uid);
    }
}
