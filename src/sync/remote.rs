//! Remote document store boundary.
//!
//! Documents live under `childs/{childId}` (status) and
//! `childs/{childId}/logs/{logId}` (one per detection).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;
use crate::models::{ChildStatus, DetectionEvent, RemoteLog};
use crate::log_info;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "remote";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const HEALTH_TIMEOUT_SECS: u64 = 5;

/// One log document in a batch write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogWrite {
    pub path: String,
    pub data: RemoteLog,
}

impl LogWrite {
    pub fn path_for(child_id: &str, log_id: &str) -> String {
        format!("childs/{child_id}/logs/{log_id}")
    }
}

impl From<&DetectionEvent> for LogWrite {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            path: Self::path_for(&event.child_id, &event.remote_document_id()),
            data: event.to_remote_log(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write every document or none of them.
    async fn commit_batch(&self, writes: &[LogWrite]) -> Result<(), StoreError>;

    async fn update_child_status(
        &self,
        child_id: &str,
        status: ChildStatus,
    ) -> Result<(), StoreError>;

    /// Logs for `child_id` observed at or after `since`.
    async fn query_logs(
        &self,
        child_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteLog>, StoreError>;

    async fn is_reachable(&self) -> bool;
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    writes: &'a [LogWrite],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPatch {
    current_status: ChildStatus,
}

#[derive(Deserialize)]
struct LogsResponse {
    documents: Vec<RemoteLog>,
}

/// REST client for the document store gateway.
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDocumentStore {
    /// `base_url` like `https://store.example.com` (a trailing slash is ignored).
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Server {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn commit_batch(&self, writes: &[LogWrite]) -> Result<(), StoreError> {
        let url = format!("{}/v1/batch", self.base_url);
        let resp = self
            .authorized(self.client.post(&url))
            .json(&BatchRequest { writes })
            .send()
            .await?;
        Self::check(resp).await?;
        log_info!("committed batch of {} documents", writes.len());
        Ok(())
    }

    async fn update_child_status(
        &self,
        child_id: &str,
        status: ChildStatus,
    ) -> Result<(), StoreError> {
        let url = format!("{}/v1/documents/childs/{child_id}", self.base_url);
        let resp = self
            .authorized(self.client.patch(&url))
            .json(&StatusPatch {
                current_status: status,
            })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn query_logs(
        &self,
        child_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteLog>, StoreError> {
        let url = format!(
            "{}/v1/documents/childs/{child_id}/logs?since={}",
            self.base_url,
            since.timestamp_millis()
        );
        let resp = self.authorized(self.client.get(&url)).send().await?;
        let resp = Self::check(resp).await?;
        let body = resp.text().await?;
        let parsed: LogsResponse = serde_json::from_str(&body)?;
        Ok(parsed.documents)
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/v1/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<String, RemoteLog>,
    statuses: HashMap<String, ChildStatus>,
    offline: bool,
    commits: u64,
    commit_delay: Option<Duration>,
}

/// In-process document store used for offline runs and tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make each commit take this long, to observe in-flight behaviour.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.lock().commit_delay = delay;
    }

    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn logs_for(&self, child_id: &str) -> Vec<RemoteLog> {
        let prefix = format!("childs/{child_id}/logs/");
        self.lock()
            .documents
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(_, log)| log.clone())
            .collect()
    }

    pub fn status_of(&self, child_id: &str) -> Option<ChildStatus> {
        self.lock().statuses.get(child_id).copied()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn commit_batch(&self, writes: &[LogWrite]) -> Result<(), StoreError> {
        let delay = {
            let state = self.lock();
            if state.offline {
                return Err(StoreError::Offline);
            }
            state.commit_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.offline {
            return Err(StoreError::Offline);
        }
        for write in writes {
            state.documents.insert(write.path.clone(), write.data.clone());
        }
        state.commits += 1;
        Ok(())
    }

    async fn update_child_status(
        &self,
        child_id: &str,
        status: ChildStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.offline {
            return Err(StoreError::Offline);
        }
        state.statuses.insert(child_id.to_string(), status);
        Ok(())
    }

    async fn query_logs(
        &self,
        child_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteLog>, StoreError> {
        if self.lock().offline {
            return Err(StoreError::Offline);
        }
        let since_ms = since.timestamp_millis();
        Ok(self
            .logs_for(child_id)
            .into_iter()
            .filter(|log| log.timestamp >= since_ms)
            .collect())
    }

    async fn is_reachable(&self) -> bool {
        !self.lock().offline
    }
}
