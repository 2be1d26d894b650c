use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::worker::outcome_label;
use super::PipelineServices;
use crate::classifier::{classify_within, resolve_outcome, ClassifierInput};
use crate::metrics::{ClassificationMetrics, PipelineEvent};
use crate::models::TextSample;
use crate::log_info;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "text_worker";

/// Classify queued notification texts one at a time. Text detections are
/// recorded and synced but never drive the overlay.
pub async fn text_loop(
    services: Arc<PipelineServices>,
    mut texts: mpsc::Receiver<TextSample>,
    cancel: CancellationToken,
) {
    loop {
        let sample = tokio::select! {
            _ = cancel.cancelled() => break,
            next = texts.recv() => match next {
                Some(sample) => sample,
                None => break,
            },
        };
        services.metrics.record(PipelineEvent::TextReceived).await;
        classify_text(&services, sample).await;
    }
    log_info!("text worker stopped");
}

async fn classify_text(services: &PipelineServices, sample: TextSample) {
    let started = Instant::now();
    let source_app = sample.source_app.clone();
    let sender = sample.sender.clone();
    let posted_at = sample.posted_at;

    let result = classify_within(
        services.classifier.as_ref(),
        ClassifierInput::from(sample),
        services.settings.classifier_timeout(),
    )
    .await;
    let classify_ms = started.elapsed().as_millis() as u64;
    if result.is_err() {
        services.metrics.record(PipelineEvent::ClassifierFailure).await;
    }

    let outcome = resolve_outcome(result, &services.settings.classifier);
    let mut buffer_write_ms = None;
    if let Some(verdict) = outcome.as_ref().filter(|verdict| !verdict.is_safe) {
        let write_start = Instant::now();
        services
            .record_detection(
                source_app,
                verdict.category,
                format!("Message from {sender}: {}", verdict.reasoning),
                posted_at,
            )
            .await;
        buffer_write_ms = Some(write_start.elapsed().as_millis() as u64);
    }

    let (cpu_percent, memory_mb) = services.metrics.sample_system_metrics().await;
    services
        .metrics
        .record_classification(ClassificationMetrics {
            timestamp: Utc::now(),
            kind: "text".into(),
            prepare_ms: None,
            payload_bytes: None,
            classify_ms,
            outcome: outcome_label(outcome.as_ref()).into(),
            buffer_write_ms,
            total_ms: started.elapsed().as_millis() as u64,
            cpu_percent,
            memory_mb,
        })
        .await;
}
