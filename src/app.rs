//! Composition root: builds the services once and hands them to each command.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{CommandOverlay, LogOverlay, OverlaySurface};
use crate::classifier::{Classifier, GeminiClassifier};
use crate::db::Database;
use crate::metrics::MetricsCollector;
use crate::pipeline::{PipelineController, PipelineServices, TextSource};
use crate::sensing::{
    CommandCapture, CommandUsageStats, ForegroundResolver, NotificationFilter, UsageStatsSource,
};
use crate::settings::{Settings, SettingsStore};
use crate::sync::{
    sync_job_spec, DocumentStore, HttpDocumentStore, JobScheduler, SyncEngine, SyncTrigger,
};

use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "screenguard";

/// Long-lived services shared by every command.
pub struct AppState {
    pub settings_store: SettingsStore,
    pub settings: Settings,
    pub db: Database,
    pub metrics: MetricsCollector,
    pub scheduler: JobScheduler,
    pub store: Option<Arc<dyn DocumentStore>>,
}

impl AppState {
    pub fn open(settings_path: PathBuf) -> Result<Self> {
        let settings_store = SettingsStore::new(settings_path)?;
        let settings = settings_store.effective();
        let store: Option<Arc<dyn DocumentStore>> = match &settings.sync.endpoint {
            Some(endpoint) => Some(Arc::new(
                HttpDocumentStore::new(endpoint, settings.sync.token.clone())
                    .context("failed to build document store client")?,
            )),
            None => None,
        };
        Self::with_store(settings_store, settings, store)
    }

    /// Assemble services around an explicit store (`None` keeps events local).
    pub fn with_store(
        settings_store: SettingsStore,
        settings: Settings,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Result<Self> {
        let db = Database::new(settings.database_path())?;
        Ok(Self {
            settings_store,
            settings,
            db,
            metrics: MetricsCollector::new(),
            scheduler: JobScheduler::new(),
            store,
        })
    }

    pub fn sync_engine(&self) -> Option<SyncEngine> {
        let store = self.store.clone()?;
        Some(
            SyncEngine::new(self.db.clone(), store, self.settings.sync.batch_size)
                .with_metrics(self.metrics.clone()),
        )
    }

    pub fn sync_trigger(&self) -> Option<SyncTrigger> {
        let engine = self.sync_engine()?;
        Some(SyncTrigger::new(
            self.scheduler.clone(),
            sync_job_spec(engine, &self.settings.sync),
        ))
    }

    pub fn pipeline_services(&self, classifier: Arc<dyn Classifier>) -> PipelineServices {
        let usage: Option<Box<dyn UsageStatsSource>> = self
            .settings
            .usage
            .command
            .as_deref()
            .and_then(CommandUsageStats::new)
            .map(|source| Box::new(source) as Box<dyn UsageStatsSource>);

        PipelineServices {
            settings: self.settings.clone(),
            db: self.db.clone(),
            classifier,
            foreground: ForegroundResolver::new(usage, self.settings.usage.window_secs),
            sync: self.sync_trigger(),
            status_store: self.store.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn classifier(&self) -> Result<Arc<dyn Classifier>> {
        Ok(Arc::new(GeminiClassifier::new(&self.settings.classifier)?))
    }
}

/// Run the pipeline with the configured adapters until `shutdown` resolves
/// or the capture surface is lost.
pub async fn run<F>(state: &AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let settings = &state.settings;
    if settings.child_id.trim().is_empty() {
        bail!("no child id configured (set childId or SCREENGUARD_CHILD_ID)");
    }

    let surface = CommandCapture::new(&settings.capture.command)?;
    let overlay: Box<dyn OverlaySurface> = match settings
        .overlay
        .command
        .as_deref()
        .and_then(CommandOverlay::new)
    {
        Some(overlay) => Box::new(overlay),
        None => Box::new(LogOverlay),
    };
    let texts = match &settings.notifications.feed_path {
        Some(path) => TextSource::Feed {
            path: path.clone(),
            filter: NotificationFilter::new(settings.notifications.monitored_packages.clone()),
            capacity: settings.notifications.queue_capacity,
        },
        None => TextSource::None,
    };

    let services = Arc::new(state.pipeline_services(state.classifier()?));
    let periodic = services.sync.as_ref().map(|trigger| {
        state.scheduler.schedule_periodic(
            trigger.spec().clone(),
            Duration::from_secs(settings.sync.periodic_secs),
        )
    });
    if services.sync.is_none() {
        log_warn!("no sync endpoint configured; detections stay in the local buffer");
    }

    let mut controller = PipelineController::new();
    controller.start(services, surface, overlay, texts).await?;

    let result = tokio::select! {
        _ = shutdown => {
            log_info!("shutdown requested");
            Ok(())
        }
        ended = controller.wait() => ended,
    };

    controller.stop().await?;
    state.scheduler.shutdown().await;
    if let Some(handle) = periodic {
        handle.abort();
    }
    result
}
