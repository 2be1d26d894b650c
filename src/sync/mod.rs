//! Reconciles the local event buffer with the remote document store.

pub mod engine;
pub mod remote;
pub mod scheduler;

pub use engine::{SyncEngine, SyncReport};
pub use remote::{DocumentStore, HttpDocumentStore, LogWrite, MemoryDocumentStore};
pub use scheduler::{
    BackoffPolicy, EnqueueResult, ExistingJobPolicy, Job, JobOutcome, JobScheduler, JobSpec,
    RunConstraint,
};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncError;
use crate::settings::SyncSettings;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "sync";

/// Unique name shared by the on-demand and periodic sync triggers.
pub const SYNC_JOB_NAME: &str = "sync_logs";

pub struct SyncJob {
    engine: SyncEngine,
}

#[async_trait]
impl Job for SyncJob {
    async fn run(&self) -> JobOutcome {
        match self.engine.drain().await {
            Ok(report) => {
                if report.committed > 0 || report.quarantined > 0 {
                    log_info!(
                        "sync run finished: {} committed, {} quarantined",
                        report.committed,
                        report.quarantined
                    );
                }
                JobOutcome::Success
            }
            Err(SyncError::Commit(err)) => {
                log_warn!("sync commit failed, will retry: {err}");
                JobOutcome::Retry
            }
            Err(SyncError::Buffer(err)) => {
                log_warn!("sync could not read the buffer, will retry: {err}");
                JobOutcome::Retry
            }
        }
    }
}

/// Only attempt a sync while the store answers.
pub struct StoreReachable(pub Arc<dyn DocumentStore>);

#[async_trait]
impl RunConstraint for StoreReachable {
    async fn satisfied(&self) -> bool {
        self.0.is_reachable().await
    }
}

pub fn sync_job_spec(engine: SyncEngine, settings: &SyncSettings) -> JobSpec {
    let constraint: Option<Arc<dyn RunConstraint>> = if settings.require_network {
        Some(Arc::new(StoreReachable(Arc::clone(engine.store()))))
    } else {
        None
    };
    JobSpec {
        name: SYNC_JOB_NAME.to_string(),
        job: Arc::new(SyncJob { engine }),
        backoff: BackoffPolicy::new(
            Duration::from_secs(settings.backoff_min_secs.max(1)),
            Duration::from_secs(settings.backoff_max_secs),
        ),
        constraint,
        run_timeout: Duration::from_secs(settings.run_timeout_secs.max(1)),
    }
}

/// Handle the pipeline uses to ask for a sync after each append.
#[derive(Clone)]
pub struct SyncTrigger {
    scheduler: JobScheduler,
    spec: JobSpec,
}

impl SyncTrigger {
    pub fn new(scheduler: JobScheduler, spec: JobSpec) -> Self {
        Self { scheduler, spec }
    }

    /// Request a sync, merging into any sync already pending.
    pub fn request(&self) -> EnqueueResult {
        self.scheduler
            .enqueue(self.spec.clone(), ExistingJobPolicy::Append)
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }
}
