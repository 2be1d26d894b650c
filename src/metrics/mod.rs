mod types;

pub use types::{ClassificationMetrics, MetricsSnapshot, PipelineCounters, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::sensing::Admission;

const MAX_RECENT_CLASSIFICATIONS: usize = 20;

/// Countable pipeline occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    FrameAcquired,
    FrameRefused(Admission),
    FrameUnchanged,
    FramesSuperseded(u64),
    TextReceived,
    ClassifierFailure,
    Detection,
    BufferWriteFailure,
}

/// Counters and the sysinfo sampler have separate locks; a process refresh
/// never blocks counting.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
    process: Arc<Mutex<ProcessSampler>>,
}

struct MetricsState {
    recent: Vec<ClassificationMetrics>,
    counters: PipelineCounters,
}

struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent: Vec::with_capacity(MAX_RECENT_CLASSIFICATIONS),
                counters: PipelineCounters::default(),
            })),
            process: Arc::new(Mutex::new(ProcessSampler { system, pid })),
        }
    }

    /// Current process CPU percent and resident memory in MiB.
    pub async fn sample_system_metrics(&self) -> (f32, f64) {
        let metrics = self.process.lock().await.refresh();
        (metrics.cpu_percent, metrics.memory_mb)
    }

    pub async fn record(&self, event: PipelineEvent) {
        let mut state = self.inner.lock().await;
        let counters = &mut state.counters;
        match event {
            PipelineEvent::FrameAcquired => counters.frames_acquired += 1,
            PipelineEvent::FrameRefused(Admission::Busy) => counters.frames_dropped_busy += 1,
            PipelineEvent::FrameRefused(Admission::CoolingDown) => {
                counters.frames_dropped_cooling += 1
            }
            PipelineEvent::FrameRefused(Admission::Admitted) => {}
            PipelineEvent::FrameUnchanged => counters.frames_unchanged += 1,
            PipelineEvent::FramesSuperseded(total) => counters.frames_superseded = total,
            PipelineEvent::TextReceived => counters.texts_received += 1,
            PipelineEvent::ClassifierFailure => counters.classifier_failures += 1,
            PipelineEvent::Detection => counters.detections += 1,
            PipelineEvent::BufferWriteFailure => counters.buffer_write_failures += 1,
        }
    }

    pub async fn record_classification(&self, metrics: ClassificationMetrics) {
        let mut state = self.inner.lock().await;
        state.counters.classifications += 1;
        state.recent.push(metrics);
        if state.recent.len() > MAX_RECENT_CLASSIFICATIONS {
            state.recent.remove(0);
        }
    }

    pub async fn record_sync(&self, synced: usize, quarantined: usize) {
        let mut state = self.inner.lock().await;
        if synced > 0 {
            state.counters.sync_commits += 1;
        }
        state.counters.events_synced += synced as u64;
        state.counters.events_quarantined += quarantined as u64;
    }

    pub async fn counters(&self) -> PipelineCounters {
        self.inner.lock().await.counters
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let system = self.process.lock().await.refresh();
        let state = self.inner.lock().await;
        MetricsSnapshot {
            system,
            counters: state.counters,
            recent_classifications: state.recent.clone(),
        }
    }

    pub async fn reset(&self) {
        {
            let mut state = self.inner.lock().await;
            state.recent.clear();
            state.counters = PipelineCounters::default();
        }
        self.process.lock().await.refresh();
    }
}

impl ProcessSampler {
    fn refresh(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            process: Arc::clone(&self.process),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_pipeline_events() {
        let metrics = MetricsCollector::new();
        metrics.record(PipelineEvent::FrameAcquired).await;
        metrics.record(PipelineEvent::FrameRefused(Admission::Busy)).await;
        metrics.record(PipelineEvent::FrameRefused(Admission::CoolingDown)).await;
        metrics.record(PipelineEvent::Detection).await;
        metrics.record_sync(3, 1).await;

        let counters = metrics.counters().await;
        assert_eq!(counters.frames_acquired, 1);
        assert_eq!(counters.frames_dropped_busy, 1);
        assert_eq!(counters.frames_dropped_cooling, 1);
        assert_eq!(counters.detections, 1);
        assert_eq!(counters.sync_commits, 1);
        assert_eq!(counters.events_synced, 3);
        assert_eq!(counters.events_quarantined, 1);

        metrics.reset().await;
        assert_eq!(metrics.counters().await, PipelineCounters::default());
    }

    #[tokio::test]
    async fn counting_does_not_wait_for_a_process_refresh() {
        let metrics = MetricsCollector::new();
        let _refreshing = metrics.process.lock().await;

        tokio::time::timeout(
            std::time::Duration::from_millis(200),
            metrics.record(PipelineEvent::FrameAcquired),
        )
        .await
        .expect("counter update blocked behind the process sampler");
        assert_eq!(metrics.counters().await.frames_acquired, 1);
    }
}
