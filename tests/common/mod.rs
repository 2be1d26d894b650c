//! Scripted adapters shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use screenguard::alert::OverlaySurface;
use screenguard::classifier::{Classifier, ClassifierInput};
use screenguard::db::Database;
use screenguard::error::{CaptureError, ClassifierError};
use screenguard::metrics::MetricsCollector;
use screenguard::models::{FrameSample, Verdict};
use screenguard::pipeline::PipelineServices;
use screenguard::sensing::{CaptureSurface, ForegroundResolver};
use screenguard::settings::Settings;
use screenguard::sync::DocumentStore;

pub const CHILD_ID: &str = "child-1";

pub const NUDITY_RESPONSE: &str =
    r#"{"isSafe": false, "category": "NUDITY", "confidence": 0.9, "reasoning": "x"}"#;

/// Settings tuned for fast test loops.
pub fn test_settings(data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.child_id = CHILD_ID.to_string();
    settings.data_dir = data_dir.to_path_buf();
    settings.capture.interval_ms = 10;
    settings.capture.cooldown_secs = 0;
    settings.capture.failure_limit = 2;
    settings.capture.skip_unchanged_frames = false;
    settings.classifier.timeout_secs = 5;
    settings
}

pub fn services(
    settings: Settings,
    db: Database,
    classifier: Arc<dyn Classifier>,
    status_store: Option<Arc<dyn DocumentStore>>,
) -> Arc<PipelineServices> {
    Arc::new(PipelineServices {
        settings,
        db,
        classifier,
        foreground: ForegroundResolver::unavailable(),
        sync: None,
        status_store,
        metrics: MetricsCollector::new(),
    })
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until the buffer holds exactly `expected` pending rows.
pub async fn wait_for_pending(db: &Database, expected: u64) {
    for _ in 0..200 {
        if db.count().await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {expected} pending events");
}

/// Produces a slightly different frame on every grab until `lose` is called.
pub struct ScriptedSurface {
    counter: u8,
    lost: Arc<AtomicBool>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self {
            counter: 0,
            lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that makes every later grab fail.
    pub fn loss_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.lost)
    }
}

#[async_trait]
impl CaptureSurface for ScriptedSurface {
    async fn grab(&mut self) -> Result<FrameSample, CaptureError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(CaptureError::Unavailable("display disconnected".into()));
        }
        self.counter = self.counter.wrapping_add(1);
        let shade = self.counter;
        let pixels = RgbaImage::from_pixel(16, 16, Rgba([shade, shade, shade, 255]));
        Ok(FrameSample::new(pixels, Utc::now()))
    }

    fn release(&mut self) {}
}

type Reply = dyn Fn(&ClassifierInput, usize) -> Result<Verdict, ClassifierError> + Send + Sync;

/// Answers from a closure and tracks call concurrency.
pub struct ScriptedClassifier {
    reply: Box<Reply>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(&ClassifierInput, usize) -> Result<Verdict, ClassifierError> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, reply)
    }

    pub fn with_delay<F>(delay: Duration, reply: F) -> Arc<Self>
    where
        F: Fn(&ClassifierInput, usize) -> Result<Verdict, ClassifierError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Box::new(reply),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, input: ClassifierInput) -> Result<Verdict, ClassifierError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.reply)(&input, call)
    }
}

/// Records every show/hide call.
#[derive(Clone, Default)]
pub struct RecordingOverlay {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingOverlay {
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

impl OverlaySurface for RecordingOverlay {
    fn show(&mut self) {
        self.events.lock().unwrap().push("show");
    }

    fn hide(&mut self) {
        self.events.lock().unwrap().push("hide");
    }
}
