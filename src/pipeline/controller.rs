use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::status::StatusPublisher;
use super::text::text_loop;
use super::worker::capture_loop;
use super::PipelineServices;
use crate::alert::OverlaySurface;
use crate::error::CaptureError;
use crate::models::{ChildStatus, TextSample};
use crate::sensing::{
    latest_slot, run_frame_source, run_notification_feed, CaptureSurface, NotificationFilter,
};
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "controller";

/// Where notification texts come from.
pub enum TextSource {
    None,
    /// Tail a JSON-lines feed, keeping only monitored apps.
    Feed {
        path: PathBuf,
        filter: NotificationFilter,
        capacity: usize,
    },
    /// Already-filtered texts pushed by the caller.
    Channel(mpsc::Receiver<TextSample>),
}

pub struct PipelineController {
    services: Option<Arc<PipelineServices>>,
    status: Option<StatusPublisher>,
    capture_handle: Option<JoinHandle<Result<(), CaptureError>>>,
    aux_handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl PipelineController {
    pub fn new() -> Self {
        Self {
            services: None,
            status: None,
            capture_handle: None,
            aux_handles: Vec::new(),
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.capture_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn start<S, O>(
        &mut self,
        services: Arc<PipelineServices>,
        surface: S,
        overlay: O,
        texts: TextSource,
    ) -> Result<(), CaptureError>
    where
        S: CaptureSurface + 'static,
        O: OverlaySurface + 'static,
    {
        if self.capture_handle.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        services.recover_pending().await;

        let cancel_token = CancellationToken::new();
        let source_cancel = cancel_token.child_token();
        let capture = &services.settings.capture;

        let (frame_tx, frame_rx) = latest_slot();
        self.aux_handles.push(tokio::spawn(run_frame_source(
            surface,
            frame_tx,
            Duration::from_millis(capture.interval_ms.max(1)),
            capture.failure_limit,
            source_cancel.clone(),
        )));

        let text_rx = match texts {
            TextSource::None => None,
            TextSource::Channel(rx) => Some(rx),
            TextSource::Feed {
                path,
                filter,
                capacity,
            } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                self.aux_handles.push(tokio::spawn(run_notification_feed(
                    path,
                    filter,
                    tx,
                    cancel_token.clone(),
                )));
                Some(rx)
            }
        };
        if let Some(rx) = text_rx {
            self.aux_handles.push(tokio::spawn(text_loop(
                Arc::clone(&services),
                rx,
                cancel_token.clone(),
            )));
        }

        let status = StatusPublisher::spawn(
            services.status_store.clone(),
            services.settings.child_id.clone(),
        );
        self.capture_handle = Some(tokio::spawn(capture_loop(
            Arc::clone(&services),
            frame_rx,
            overlay,
            status.reporter(),
            source_cancel,
            cancel_token.clone(),
        )));
        self.cancel_token = Some(cancel_token);
        self.status = Some(status);
        self.services = Some(services);

        log_info!("pipeline started");
        Ok(())
    }

    /// Wait until the capture context ends on its own (surface lost) or is cancelled.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.capture_handle.as_mut() else {
            return Ok(());
        };
        let result = handle.await.context("capture loop task failed to join");
        self.capture_handle = None;
        result?.map_err(Into::into)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let capture_result = match self.capture_handle.take() {
            Some(handle) => handle
                .await
                .context("capture loop task failed to join")
                .map(|_| ()),
            None => Ok(()),
        };

        for handle in self.aux_handles.drain(..) {
            if let Err(err) = handle.await {
                log_warn!("pipeline task failed to join: {err}");
            }
        }

        // The capture loop held the only other reporter, so OFFLINE is the
        // last status written.
        if let Some(status) = self.status.take() {
            status.finish(ChildStatus::Offline).await;
        }

        if let Some(services) = self.services.take() {
            let snapshot = services.metrics.get_snapshot().await;
            log_info!(
                "pipeline stopped: {:?} (cpu {:.1}%, {:.1} MiB)",
                snapshot.counters,
                snapshot.system.cpu_percent,
                snapshot.system.memory_mb
            );
        }

        capture_result
    }
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new()
    }
}
