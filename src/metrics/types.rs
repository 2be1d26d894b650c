use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub timestamp: DateTime<Utc>,
    /// `frame` or `text`.
    pub kind: String,
    pub prepare_ms: Option<u64>,
    pub payload_bytes: Option<usize>,
    pub classify_ms: u64,
    /// `safe`, `unsafe` or `inconclusive`.
    pub outcome: String,
    pub buffer_write_ms: Option<u64>,
    pub total_ms: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounters {
    pub frames_acquired: u64,
    pub frames_dropped_busy: u64,
    pub frames_dropped_cooling: u64,
    pub frames_unchanged: u64,
    pub frames_superseded: u64,
    pub texts_received: u64,
    pub classifications: u64,
    pub classifier_failures: u64,
    pub detections: u64,
    pub buffer_write_failures: u64,
    pub sync_commits: u64,
    pub events_synced: u64,
    pub events_quarantined: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub counters: PipelineCounters,
    pub recent_classifications: Vec<ClassificationMetrics>,
}
