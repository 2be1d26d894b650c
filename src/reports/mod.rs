//! Read-only aggregation over synced detections, consumed by the weekly
//! report generator.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::StoreError;
use crate::models::{RemoteLog, RiskCategory};
use crate::sync::DocumentStore;

pub const REPORT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub observed_at: DateTime<Utc>,
    pub app_name: String,
    pub risk_category: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyDigest {
    pub child_id: String,
    pub child_name: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub intervention_count: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_app: BTreeMap<String, usize>,
    /// Newest first.
    pub interventions: Vec<Intervention>,
}

impl WeeklyDigest {
    /// Build from raw logs; `SAFE` entries and entries outside the window are ignored.
    pub fn from_logs(
        child_id: &str,
        child_name: &str,
        logs: Vec<RemoteLog>,
        now: DateTime<Utc>,
    ) -> Self {
        let since = now - Duration::days(REPORT_WINDOW_DAYS);

        let mut interventions: Vec<Intervention> = logs
            .into_iter()
            .filter_map(|log| {
                let observed_at = log.observed_at()?;
                let risk = if log.risk_category.trim().is_empty() {
                    RiskCategory::Safe.as_str().to_string()
                } else {
                    log.risk_category
                };
                let in_window = observed_at >= since && observed_at <= now;
                (in_window && risk != RiskCategory::Safe.as_str()).then(|| Intervention {
                    observed_at,
                    app_name: non_empty_or(log.app_name, "Unknown App"),
                    risk_category: risk,
                    reasoning: non_empty_or(log.ai_reasoning, "No details"),
                })
            })
            .collect();
        interventions.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));

        let mut by_category = BTreeMap::new();
        let mut by_app = BTreeMap::new();
        for intervention in &interventions {
            *by_category
                .entry(intervention.risk_category.clone())
                .or_insert(0) += 1;
            *by_app.entry(intervention.app_name.clone()).or_insert(0) += 1;
        }

        Self {
            child_id: child_id.to_string(),
            child_name: child_name.to_string(),
            since,
            until: now,
            intervention_count: interventions.len(),
            by_category,
            by_app,
            interventions,
        }
    }

    /// Plain-text log listing handed to the narrative generator.
    pub fn to_prompt_context(&self) -> String {
        let mut text = format!(
            "Activity Logs for {} (Last {} Days):\n",
            self.child_name, REPORT_WINDOW_DAYS
        );
        if self.interventions.is_empty() {
            text.push_str(
                "No high-risk interventions occurred this week. The device was used safely.\n",
            );
            return text;
        }
        for item in &self.interventions {
            let _ = writeln!(
                text,
                "- [{}] App: {}, Risk: {}, Context: {}",
                item.observed_at.format("%Y-%m-%d %H:%M"),
                item.app_name,
                item.risk_category,
                item.reasoning
            );
        }
        text
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Query the last seven days of logs for one child and aggregate them.
pub async fn weekly_digest(
    store: &dyn DocumentStore,
    child_id: &str,
    child_name: &str,
    now: DateTime<Utc>,
) -> Result<WeeklyDigest, StoreError> {
    let since = now - Duration::days(REPORT_WINDOW_DAYS);
    let logs = store.query_logs(child_id, since).await?;
    Ok(WeeklyDigest::from_logs(child_id, child_name, logs, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(days_ago: i64, category: &str, app: &str, now: DateTime<Utc>) -> RemoteLog {
        RemoteLog {
            id: format!("{days_ago}-{category}"),
            timestamp: (now - Duration::days(days_ago)).timestamp_millis(),
            app_name: app.into(),
            risk_category: category.into(),
            ai_reasoning: "because".into(),
        }
    }

    #[test]
    fn aggregates_unsafe_logs_in_window() {
        let now = Utc::now();
        let digest = WeeklyDigest::from_logs(
            "kid-1",
            "Sam's tablet",
            vec![
                log(1, "NUDITY", "com.android.chrome", now),
                log(2, "BULLYING", "com.whatsapp", now),
                log(3, "NUDITY", "com.android.chrome", now),
                log(4, "SAFE", "com.whatsapp", now),
                log(9, "THREAT", "com.discord", now),
            ],
            now,
        );

        assert_eq!(digest.intervention_count, 3);
        assert_eq!(digest.by_category.get("NUDITY"), Some(&2));
        assert_eq!(digest.by_app.get("com.whatsapp"), Some(&1));
        assert!(!digest.by_category.contains_key("THREAT"));
        assert_eq!(digest.interventions[0].risk_category, "NUDITY");
        assert!(digest.to_prompt_context().contains("App: com.whatsapp, Risk: BULLYING"));
    }

    #[test]
    fn quiet_week_says_so() {
        let digest = WeeklyDigest::from_logs("kid-1", "Tab", Vec::new(), Utc::now());
        assert_eq!(digest.intervention_count, 0);
        assert!(digest
            .to_prompt_context()
            .contains("No high-risk interventions occurred this week."));
    }
}
