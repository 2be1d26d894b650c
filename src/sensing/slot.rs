//! Single-slot "latest value" mailbox between a producer and one consumer.
//!
//! Publishing replaces whatever the consumer has not picked up yet, so the
//! consumer only ever sees the freshest sample and memory stays bounded at
//! one sample regardless of how slow the consumer is.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Why a slot stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClosed {
    /// Producer finished normally.
    Finished,
    /// Producer lost its source; the consumer must not expect more values.
    Failed(String),
}

struct SlotState<T> {
    value: Option<T>,
    closed: Option<SlotClosed>,
    superseded: u64,
}

struct Shared<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn latest_slot<T>() -> (SlotSender<T>, SlotReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SlotState {
            value: None,
            closed: None,
            superseded: 0,
        }),
        notify: Notify::new(),
    });
    (
        SlotSender {
            shared: Arc::clone(&shared),
        },
        SlotReceiver { shared },
    )
}

pub struct SlotSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for SlotSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> SlotSender<T> {
    /// Store `value` as the latest sample. Returns `false` once the slot is closed.
    pub fn publish(&self, value: T) -> bool {
        {
            let mut state = self.shared.lock();
            if state.closed.is_some() {
                return false;
            }
            if state.value.replace(value).is_some() {
                state.superseded += 1;
            }
        }
        self.shared.notify.notify_one();
        true
    }

    pub fn close(&self) {
        self.close_with(SlotClosed::Finished);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.close_with(SlotClosed::Failed(reason.into()));
    }

    fn close_with(&self, reason: SlotClosed) {
        {
            let mut state = self.shared.lock();
            if state.closed.is_none() {
                state.closed = Some(reason);
            }
        }
        self.shared.notify.notify_one();
    }
}

pub struct SlotReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SlotReceiver<T> {
    /// Wait for the next sample. A pending sample is still handed out after
    /// the producer closes; afterwards the close reason is returned.
    pub async fn recv(&self) -> Result<T, SlotClosed> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(value) = state.value.take() {
                    return Ok(value);
                }
                if let Some(reason) = &state.closed {
                    return Err(reason.clone());
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.shared.lock().value.take()
    }

    /// Samples overwritten before the consumer picked them up.
    pub fn superseded(&self) -> u64 {
        self.shared.lock().superseded
    }

    /// Close from the consumer side and drop any pending sample.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.value = None;
        if state.closed.is_none() {
            state.closed = Some(SlotClosed::Finished);
        }
    }
}
