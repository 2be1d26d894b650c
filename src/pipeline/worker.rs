use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::status::StatusReporter;
use super::teardown::TeardownGuard;
use super::PipelineServices;
use crate::alert::{AlertStateMachine, OverlayState, OverlaySurface};
use crate::classifier::{classify_within, prepare_frame, resolve_outcome, ClassifierInput};
use crate::error::CaptureError;
use crate::metrics::{ClassificationMetrics, PipelineEvent};
use crate::models::{ChildStatus, FrameSample, Verdict};
use crate::sensing::phash::UnchangedFrameFilter;
use crate::sensing::{GatePermit, SlotClosed, SlotReceiver, ThrottleGate};
use crate::{log_debug, log_error, log_info};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "capture_loop";

const VERDICT_QUEUE: usize = 8;

/// The capture context: admits frames through the gate and applies screen
/// verdicts to the overlay. Returns an error only when the capture surface
/// is lost.
pub async fn capture_loop<O: OverlaySurface>(
    services: Arc<PipelineServices>,
    frames: SlotReceiver<FrameSample>,
    overlay: O,
    status: StatusReporter,
    source_cancel: CancellationToken,
    cancel: CancellationToken,
) -> Result<(), CaptureError> {
    let frames = Arc::new(frames);
    let mut guard = TeardownGuard::new(
        AlertStateMachine::new(overlay),
        Arc::clone(&frames),
        source_cancel,
    );

    let gate = Arc::new(ThrottleGate::new(services.settings.capture_cooldown()));
    let unchanged = Arc::new(Mutex::new(UnchangedFrameFilter::new(
        services.settings.capture.unchanged_threshold,
        std::time::Duration::from_secs(services.settings.capture.unchanged_reuse_secs),
    )));
    let (verdict_tx, mut verdict_rx) = mpsc::channel::<Verdict>(VERDICT_QUEUE);

    status.report(ChildStatus::Active);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log_info!("capture loop shutting down");
                break Ok(());
            }
            next = frames.recv() => match next {
                Ok(frame) => {
                    services.metrics.record(PipelineEvent::FrameAcquired).await;
                    services
                        .metrics
                        .record(PipelineEvent::FramesSuperseded(frames.superseded()))
                        .await;
                    match gate.try_acquire(Instant::now()) {
                        Ok(permit) => {
                            tokio::spawn(classify_frame(
                                Arc::clone(&services),
                                frame,
                                permit,
                                verdict_tx.clone(),
                                Arc::clone(&unchanged),
                            ));
                        }
                        Err(refused) => {
                            log_debug!("frame dropped: {refused:?}");
                            services.metrics.record(PipelineEvent::FrameRefused(refused)).await;
                        }
                    }
                }
                Err(SlotClosed::Finished) => {
                    log_info!("frame source finished");
                    break Ok(());
                }
                Err(SlotClosed::Failed(reason)) => {
                    log_error!("capture surface lost: {reason}");
                    break Err(CaptureError::Unavailable(reason));
                }
            },
            Some(verdict) = verdict_rx.recv() => {
                if let Some(transition) = guard.machine.apply(&verdict) {
                    log_info!("overlay {:?} -> {:?}", transition.from, transition.to);
                    status.report(match transition.to {
                        OverlayState::Shown => ChildStatus::Alert,
                        OverlayState::Hidden => ChildStatus::Active,
                    });
                }
            }
        }
    };

    drop(guard);
    result
}

async fn classify_frame(
    services: Arc<PipelineServices>,
    frame: FrameSample,
    permit: GatePermit,
    verdicts: mpsc::Sender<Verdict>,
    unchanged: Arc<Mutex<UnchangedFrameFilter>>,
) {
    // Held until this task ends so the gate reopens on every path.
    let _permit = permit;
    let started = Instant::now();
    let captured_at = frame.captured_at;
    let capture = &services.settings.capture;

    let max_width = capture.max_width;
    let prepared = match tokio::task::spawn_blocking(move || prepare_frame(frame, max_width)).await
    {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(err)) => {
            log_error!("frame preparation failed: {err}");
            return;
        }
        Err(err) => {
            log_error!("frame preparation worker failed: {err}");
            return;
        }
    };
    let prepare_ms = started.elapsed().as_millis() as u64;

    let unchanged_frame = capture.skip_unchanged_frames
        && lock(&unchanged).is_unchanged(&prepared.phash, Instant::now());
    if unchanged_frame {
        log_debug!("screen unchanged since last verdict, not re-sending");
        services.metrics.record(PipelineEvent::FrameUnchanged).await;
        return;
    }

    let payload_bytes = prepared.png.len();
    let classify_start = Instant::now();
    let result = classify_within(
        services.classifier.as_ref(),
        ClassifierInput::Image { png: prepared.png },
        services.settings.classifier_timeout(),
    )
    .await;
    let classify_ms = classify_start.elapsed().as_millis() as u64;
    if result.is_err() {
        services.metrics.record(PipelineEvent::ClassifierFailure).await;
    }

    let outcome = resolve_outcome(result, &services.settings.classifier);
    {
        let mut filter = lock(&unchanged);
        match &outcome {
            Some(_) => filter.remember(prepared.phash, Instant::now()),
            None => filter.forget(),
        }
    }

    let mut buffer_write_ms = None;
    if let Some(verdict) = &outcome {
        if verdicts.send(verdict.clone()).await.is_err() {
            log_debug!("capture loop gone, verdict not applied");
        }
        if !verdict.is_safe {
            let app = services.foreground.current_foreground_app().await;
            let write_start = Instant::now();
            services
                .record_detection(app, verdict.category, verdict.reasoning.clone(), captured_at)
                .await;
            buffer_write_ms = Some(write_start.elapsed().as_millis() as u64);
        }
    }

    let (cpu_percent, memory_mb) = services.metrics.sample_system_metrics().await;
    services
        .metrics
        .record_classification(ClassificationMetrics {
            timestamp: Utc::now(),
            kind: "frame".into(),
            prepare_ms: Some(prepare_ms),
            payload_bytes: Some(payload_bytes),
            classify_ms,
            outcome: outcome_label(outcome.as_ref()).into(),
            buffer_write_ms,
            total_ms: started.elapsed().as_millis() as u64,
            cpu_percent,
            memory_mb,
        })
        .await;
}

pub(super) fn outcome_label(verdict: Option<&Verdict>) -> &'static str {
    match verdict {
        Some(verdict) if verdict.is_safe => "safe",
        Some(_) => "unsafe",
        None => "inconclusive",
    }
}

fn lock(filter: &Mutex<UnchangedFrameFilter>) -> std::sync::MutexGuard<'_, UnchangedFrameFilter> {
    match filter.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
