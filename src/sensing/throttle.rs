//! Admission control in front of the classifier.
//!
//! While one sample is in flight every newly acquired sample is dropped, and
//! after it completes the gate stays shut for a fixed cool-down. The gate
//! keeps no sample state: one atomic busy flag and one next-eligible instant.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// A previous sample is still being classified.
    Busy,
    /// Inside the dwell period after the last classification.
    CoolingDown,
}

#[derive(Debug)]
pub struct ThrottleGate {
    busy: AtomicBool,
    next_eligible: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl ThrottleGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            busy: AtomicBool::new(false),
            next_eligible: Mutex::new(None),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit a ready sample at `now`, marking the gate busy on success.
    pub fn admit(&self, now: Instant) -> bool {
        self.check(now) == Admission::Admitted
    }

    /// Like [`admit`](Self::admit) but says why a sample was refused.
    pub fn check(&self, now: Instant) -> Admission {
        if self.busy.load(Ordering::Acquire) {
            return Admission::Busy;
        }
        if let Some(next) = *self.lock_next() {
            if now < next {
                return Admission::CoolingDown;
            }
        }
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Admission::Admitted,
            Err(_) => Admission::Busy,
        }
    }

    /// Mark the in-flight classification finished (success or failure) and
    /// start the cool-down from `now`.
    pub fn complete(&self, now: Instant) {
        *self.lock_next() = Some(now + self.cooldown);
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Admit and wrap the busy period in a guard that completes on drop, so
    /// the gate reopens on every exit path of the classification task.
    pub fn try_acquire(self: &Arc<Self>, now: Instant) -> Result<GatePermit, Admission> {
        match self.check(now) {
            Admission::Admitted => Ok(GatePermit {
                gate: Arc::clone(self),
            }),
            refused => Err(refused),
        }
    }

    fn lock_next(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        match self.next_eligible.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[must_use = "dropping the permit immediately reopens the gate"]
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<ThrottleGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.complete(Instant::now());
    }
}
