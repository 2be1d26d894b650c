//! Stage-boundary error types.
//!
//! Each pipeline stage converts its own I/O failures into one of these and
//! never lets them unwind into a neighbouring stage.

use thiserror::Error;

/// Loss of the capture surface. Fatal to the running pipeline instance.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture surface unavailable: {0}")]
    Unavailable(String),
    #[error("capture already started")]
    AlreadyStarted,
    #[error("failed to decode captured frame: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier unreachable: {0}")]
    Unreachable(String),
    #[error("classifier rate limited")]
    RateLimited,
    #[error("classifier refused to answer: {0}")]
    SafetyBlocked(String),
    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),
    #[error("classification timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Failure of the local durable buffer. A failed append loses that event.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("buffer write failed: {0:#}")]
    Write(anyhow::Error),
    #[error("buffer read failed: {0:#}")]
    Read(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("remote store request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("remote store returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("remote store payload error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("remote store offline")]
    Offline,
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// Retryable: nothing was removed locally.
    #[error("batch commit failed: {0}")]
    Commit(#[from] StoreError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}
