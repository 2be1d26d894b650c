//! Classification of one sample by an external content-safety service.
//!
//! Remote-call and parsing failures are isolated here: callers get either a
//! verdict or nothing, decided by the configured [`FailPolicy`].

pub mod client;
pub mod input;
pub mod parse;
pub mod prompt;

pub use client::GeminiClassifier;
pub use input::{prepare_frame, PreparedFrame};
pub use parse::parse_verdict;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ClassifierError;
use crate::models::{SampleKind, TextSample, Verdict};
use crate::settings::{ClassifierSettings, FailPolicy};
use crate::{log_error, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "classifier";

/// Payload for one classification call.
#[derive(Debug, Clone)]
pub enum ClassifierInput {
    Image { png: Vec<u8> },
    Text { sender: String, body: String },
}

impl ClassifierInput {
    pub fn kind(&self) -> SampleKind {
        match self {
            ClassifierInput::Image { .. } => SampleKind::Frame,
            ClassifierInput::Text { .. } => SampleKind::Text,
        }
    }
}

impl From<TextSample> for ClassifierInput {
    fn from(sample: TextSample) -> Self {
        ClassifierInput::Text {
            sender: sample.sender,
            body: sample.body,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, input: ClassifierInput) -> Result<Verdict, ClassifierError>;
}

/// Classify with a caller-enforced deadline. The in-flight request is
/// dropped (and its connection aborted) when the deadline passes.
pub async fn classify_within(
    classifier: &dyn Classifier,
    input: ClassifierInput,
    timeout: Duration,
) -> Result<Verdict, ClassifierError> {
    match tokio::time::timeout(timeout, classifier.classify(input)).await {
        Ok(result) => result,
        Err(_) => Err(ClassifierError::TimedOut(timeout)),
    }
}

/// Apply the fail policy to a classification result.
///
/// `None` means inconclusive: the overlay is left alone and nothing is recorded.
pub fn resolve_outcome(
    result: Result<Verdict, ClassifierError>,
    settings: &ClassifierSettings,
) -> Option<Verdict> {
    match result {
        Ok(verdict) => Some(verdict),
        Err(ClassifierError::SafetyBlocked(reason)) => {
            log_warn!("classifier refused to judge sample ({reason})");
            match settings.on_safety_block {
                FailPolicy::Open => None,
                FailPolicy::Closed => Some(Verdict::fail_closed(format!(
                    "Classifier refused to analyze content ({reason})"
                ))),
            }
        }
        Err(err) => {
            log_error!("classification failed: {err}");
            match settings.on_error {
                FailPolicy::Open => None,
                FailPolicy::Closed => Some(Verdict::fail_closed(format!(
                    "Content could not be verified: {err}"
                ))),
            }
        }
    }
}
