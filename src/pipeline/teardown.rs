use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::alert::{AlertStateMachine, OverlaySurface};
use crate::models::FrameSample;
use crate::sensing::SlotReceiver;
use crate::log_info;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "teardown";

/// Scoped cleanup for the capture context.
///
/// Dropping it stops the frame source (which releases the capture surface),
/// closes the frame slot and hides the overlay. It runs on normal exit, on
/// error returns and while unwinding from a panic.
pub struct TeardownGuard<O: OverlaySurface> {
    pub machine: AlertStateMachine<O>,
    frames: Arc<SlotReceiver<FrameSample>>,
    source_cancel: CancellationToken,
}

impl<O: OverlaySurface> TeardownGuard<O> {
    pub fn new(
        machine: AlertStateMachine<O>,
        frames: Arc<SlotReceiver<FrameSample>>,
        source_cancel: CancellationToken,
    ) -> Self {
        Self {
            machine,
            frames,
            source_cancel,
        }
    }
}

impl<O: OverlaySurface> Drop for TeardownGuard<O> {
    fn drop(&mut self) {
        self.source_cancel.cancel();
        self.frames.close();
        if self.machine.teardown().is_some() {
            log_info!("overlay removed during teardown");
        }
        if std::thread::panicking() {
            log_info!("capture context unwound, cleanup done");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::OverlayState;
    use crate::models::{RiskCategory, Verdict};
    use crate::sensing::{latest_slot, SlotClosed};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Default)]
    struct Flag(Arc<AtomicBool>);

    impl OverlaySurface for Flag {
        fn show(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn hide(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cleanup_runs_when_panicking() {
        let overlay = Flag::default();
        let (tx, rx) = latest_slot::<FrameSample>();
        let rx = Arc::new(rx);
        let cancel = CancellationToken::new();

        let task = {
            let overlay = overlay.clone();
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut guard = TeardownGuard::new(AlertStateMachine::new(overlay), rx, cancel);
                guard.machine.apply(&Verdict {
                    is_safe: false,
                    category: RiskCategory::Nudity,
                    confidence: 1.0,
                    reasoning: String::new(),
                });
                assert_eq!(guard.machine.state(), OverlayState::Shown);
                panic!("classifier task blew up");
            })
        };

        assert!(task.await.is_err());
        assert!(!overlay.0.load(Ordering::SeqCst));
        assert!(cancel.is_cancelled());
        assert!(!tx.publish(FrameSample::new(image::RgbaImage::new(1, 1), chrono::Utc::now())));
        assert_eq!(rx.recv().await.err(), Some(SlotClosed::Finished));
    }
}
