//! Wiring of acquisition, classification, alerting and buffering.
//!
//! The capture context only admits frames and applies verdicts; frame
//! preparation, classification and buffer writes run on spawned tasks and
//! hand results back by message.

mod controller;
mod status;
mod teardown;
mod text;
mod worker;

pub use controller::{PipelineController, TextSource};
pub use teardown::TeardownGuard;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::db::{BufferEntry, Database};
use crate::metrics::{MetricsCollector, PipelineEvent};
use crate::models::{DetectionEvent, RiskCategory};
use crate::sensing::ForegroundResolver;
use crate::settings::Settings;
use crate::sync::{DocumentStore, SyncTrigger};
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "pipeline";

/// Explicitly constructed services shared by the pipeline tasks.
pub struct PipelineServices {
    pub settings: Settings,
    pub db: Database,
    pub classifier: Arc<dyn Classifier>,
    pub foreground: ForegroundResolver,
    pub sync: Option<SyncTrigger>,
    /// Where `currentStatus` is reported; `None` skips status updates.
    pub status_store: Option<Arc<dyn DocumentStore>>,
    pub metrics: MetricsCollector,
}

impl PipelineServices {
    /// Buffer first, then ask for a sync. A failed append loses this event;
    /// it is logged and never retried.
    pub(crate) async fn record_detection(
        &self,
        source_app: String,
        category: RiskCategory,
        reasoning: String,
        observed_at: DateTime<Utc>,
    ) -> Option<BufferEntry> {
        let event = DetectionEvent::new(
            self.settings.child_id.clone(),
            source_app,
            category,
            reasoning,
            observed_at,
        );

        match self.db.append_event(&event).await {
            Ok(entry) => {
                self.metrics.record(PipelineEvent::Detection).await;
                log_warn!(
                    "detection recorded: {} in {}",
                    event.category,
                    event.source_app_name
                );
                if let Some(sync) = &self.sync {
                    sync.request();
                }
                Some(entry)
            }
            Err(err) => {
                self.metrics.record(PipelineEvent::BufferWriteFailure).await;
                log_error!("CRITICAL: detection {} lost: {err}", event.event_uid);
                None
            }
        }
    }

    /// Count what a previous process left behind and ask for it to be synced.
    pub(crate) async fn recover_pending(&self) {
        match self.db.count().await {
            Ok(0) => {}
            Ok(pending) => {
                log_info!("{pending} detections pending from a previous run");
                if let Some(sync) = &self.sync {
                    sync.request();
                }
            }
            Err(err) => log_error!("could not inspect pending detections: {err}"),
        }
    }
}
