//! Ordered delivery of `currentStatus` updates.
//!
//! Every update goes through one queue drained by a single task, so the
//! remote record always ends at the last status reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::ChildStatus;
use crate::sync::DocumentStore;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "status";

const STATUS_TIMEOUT_SECS: u64 = 5;

/// Cloneable sending side. Reports are dropped when no store is configured.
#[derive(Clone)]
pub(crate) struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<ChildStatus>>,
}

impl StatusReporter {
    pub(crate) fn report(&self, status: ChildStatus) {
        if let Some(tx) = &self.tx {
            if tx.send(status).is_err() {
                log_warn!("status publisher is gone, {status} not reported");
            }
        }
    }
}

/// Owns the draining task. `finish` reports a final status and waits for
/// the queue to empty.
pub(crate) struct StatusPublisher {
    reporter: StatusReporter,
    handle: Option<JoinHandle<()>>,
}

impl StatusPublisher {
    pub(crate) fn spawn(store: Option<Arc<dyn DocumentStore>>, child_id: String) -> Self {
        let Some(store) = store else {
            return Self {
                reporter: StatusReporter { tx: None },
                handle: None,
            };
        };
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            reporter: StatusReporter { tx: Some(tx) },
            handle: Some(tokio::spawn(drain_statuses(store, child_id, rx))),
        }
    }

    pub(crate) fn reporter(&self) -> StatusReporter {
        self.reporter.clone()
    }

    /// Every other reporter clone must already be dropped, or this waits
    /// until they are.
    pub(crate) async fn finish(self, last: ChildStatus) {
        self.reporter.report(last);
        drop(self.reporter);
        if let Some(handle) = self.handle {
            if let Err(err) = handle.await {
                log_warn!("status publisher failed to join: {err}");
            }
        }
    }
}

async fn drain_statuses(
    store: Arc<dyn DocumentStore>,
    child_id: String,
    mut rx: mpsc::UnboundedReceiver<ChildStatus>,
) {
    while let Some(mut status) = rx.recv().await {
        // Only the newest queued status matters.
        while let Ok(newer) = rx.try_recv() {
            status = newer;
        }
        publish(store.as_ref(), &child_id, status).await;
    }
}

async fn publish(store: &dyn DocumentStore, child_id: &str, status: ChildStatus) {
    let update = store.update_child_status(child_id, status);
    match tokio::time::timeout(Duration::from_secs(STATUS_TIMEOUT_SECS), update).await {
        Ok(Ok(())) => log_info!("status for {child_id} set to {status}"),
        Ok(Err(err)) => log_warn!("status update to {status} failed: {err}"),
        Err(_) => log_warn!("status update to {status} timed out"),
    }
}
