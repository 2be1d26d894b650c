//! Named, deduplicated background jobs with retry backoff.
//!
//! A job name maps to at most one runner task. Enqueueing a name that is
//! already in flight either keeps the existing work or marks it for one more
//! run after the current one finishes; it never starts a second runner.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    /// Transient failure; run again after backoff.
    Retry,
    /// Permanent failure; give up until the next enqueue.
    Failure,
}

#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self) -> JobOutcome;
}

/// Precondition checked before every attempt, e.g. network reachability.
#[async_trait]
pub trait RunConstraint: Send + Sync {
    async fn satisfied(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingJobPolicy {
    /// Leave in-flight work alone and drop the new request.
    Keep,
    /// Merge into in-flight work: run once more after it completes.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Started,
    Merged,
    Kept,
    ShuttingDown,
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Base delay before retry `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.min
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Base delay plus up to 10% jitter, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = (base.as_millis() / 10) as u64;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        (base + Duration::from_millis(jitter)).min(self.max)
    }
}

#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub job: Arc<dyn Job>,
    pub backoff: BackoffPolicy,
    pub constraint: Option<Arc<dyn RunConstraint>>,
    /// Attempts exceeding this count as a retryable failure.
    pub run_timeout: Duration,
}

#[derive(Debug, Default)]
struct JobSlot {
    rerun: bool,
}

struct SchedulerInner {
    slots: Mutex<HashMap<String, JobSlot>>,
    tasks: Mutex<JoinSet<()>>,
    idle: Notify,
    cancel: CancellationToken,
}

impl SchedulerInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, JobSlot>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                slots: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                idle: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn enqueue(&self, spec: JobSpec, policy: ExistingJobPolicy) -> EnqueueResult {
        if self.inner.cancel.is_cancelled() {
            return EnqueueResult::ShuttingDown;
        }

        {
            let mut slots = self.inner.slots();
            if let Some(slot) = slots.get_mut(&spec.name) {
                return match policy {
                    ExistingJobPolicy::Keep => {
                        log_debug!("job '{}' already pending, keeping it", spec.name);
                        EnqueueResult::Kept
                    }
                    ExistingJobPolicy::Append => {
                        slot.rerun = true;
                        log_debug!("job '{}' already pending, merged request", spec.name);
                        EnqueueResult::Merged
                    }
                };
            }
            slots.insert(spec.name.clone(), JobSlot::default());
        }

        let inner = Arc::clone(&self.inner);
        let mut tasks = self.inner.tasks();
        // Reap runners that already finished so the set stays small.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(run_job(inner, spec));
        EnqueueResult::Started
    }

    /// Whether `name` is running, retrying or queued.
    pub fn is_pending(&self, name: &str) -> bool {
        self.inner.slots().contains_key(name)
    }

    /// Resolve once `name` is no longer pending.
    pub async fn wait_idle(&self, name: &str) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.is_pending(name) {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    /// Enqueue `spec` with [`ExistingJobPolicy::Keep`] every `every` until shutdown.
    pub fn schedule_periodic(&self, spec: JobSpec, every: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = scheduler.inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.enqueue(spec.clone(), ExistingJobPolicy::Keep);
                    }
                }
            }
            log_debug!("periodic trigger for '{}' stopped", spec.name);
        })
    }

    /// Cancel backoff waits and wait for every runner to finish its current attempt.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.inner.tasks());
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                log_error!("job runner failed to join: {err}");
            }
        }
        log_info!("scheduler stopped");
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job(inner: Arc<SchedulerInner>, spec: JobSpec) {
    loop {
        let outcome = run_until_settled(&inner.cancel, &spec).await;
        log_debug!("job '{}' settled with {outcome:?}", spec.name);

        let mut slots = inner.slots();
        let rerun = match slots.get_mut(&spec.name) {
            Some(slot) if slot.rerun && !inner.cancel.is_cancelled() => {
                slot.rerun = false;
                true
            }
            _ => false,
        };
        if !rerun {
            slots.remove(&spec.name);
            drop(slots);
            inner.idle.notify_waiters();
            return;
        }
    }
}

/// Attempt until success, permanent failure or cancellation.
async fn run_until_settled(cancel: &CancellationToken, spec: &JobSpec) -> JobOutcome {
    let mut attempt: u32 = 0;
    loop {
        if let Some(constraint) = &spec.constraint {
            while !constraint.satisfied().await {
                log_debug!("job '{}' waiting for its constraint", spec.name);
                tokio::select! {
                    _ = cancel.cancelled() => return JobOutcome::Retry,
                    _ = tokio::time::sleep(spec.backoff.min) => {}
                }
            }
        }

        let outcome = match tokio::time::timeout(spec.run_timeout, spec.job.run()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log_warn!("job '{}' timed out after {:?}", spec.name, spec.run_timeout);
                JobOutcome::Retry
            }
        };

        match outcome {
            JobOutcome::Success | JobOutcome::Failure => return outcome,
            JobOutcome::Retry => {
                attempt = attempt.saturating_add(1);
                let delay = spec.backoff.delay(attempt);
                log_warn!(
                    "job '{}' attempt {attempt} failed, retrying in {:?}",
                    spec.name,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return JobOutcome::Retry,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
