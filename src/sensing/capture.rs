//! Screen capture surface and the frame source task that drives it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::slot::SlotSender;
use crate::error::CaptureError;
use crate::models::FrameSample;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "capture";

const CAPTURE_TIMEOUT_SECS: u64 = 10;

/// A platform surface that can produce the current screen contents.
#[async_trait]
pub trait CaptureSurface: Send {
    async fn grab(&mut self) -> Result<FrameSample, CaptureError>;

    /// Give the surface back to the platform. Must be idempotent.
    fn release(&mut self);
}

/// Captures by running an external screenshot tool that writes an encoded
/// image (PNG, JPEG, ...) to stdout.
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    released: bool,
}

impl CommandCapture {
    pub fn new(command: &[String]) -> Result<Self, CaptureError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CaptureError::Unavailable("no capture command configured".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            released: false,
        })
    }
}

#[async_trait]
impl CaptureSurface for CommandCapture {
    async fn grab(&mut self) -> Result<FrameSample, CaptureError> {
        if self.released {
            return Err(CaptureError::Unavailable("capture surface released".into()));
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| CaptureError::Unavailable(format!("{}: {err}", self.program)))?;

        let output = tokio::time::timeout(
            Duration::from_secs(CAPTURE_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| CaptureError::Unavailable("capture command timed out".into()))?
        .map_err(|err| CaptureError::Unavailable(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Unavailable(format!(
                "capture command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let captured_at = Utc::now();
        let bytes = output.stdout;
        let pixels = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|err| CaptureError::Unavailable(format!("decode worker failed: {err}")))??
            .into_rgba8();

        Ok(FrameSample::new(pixels, captured_at))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log_info!("capture surface released");
        }
    }
}

impl Drop for CommandCapture {
    fn drop(&mut self) {
        self.release();
    }
}

/// Poll `surface` every `interval` and publish each frame into the slot.
///
/// `failure_limit` consecutive failures mean the surface is gone (permission
/// revoked, display lost): the slot is failed and the task ends. The surface
/// is released and the slot closed on every exit path.
pub async fn run_frame_source<S: CaptureSurface>(
    mut surface: S,
    frames: SlotSender<FrameSample>,
    interval: Duration,
    failure_limit: u32,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log_info!("frame source shutting down");
                frames.close();
                break;
            }
            _ = ticker.tick() => {
                match surface.grab().await {
                    Ok(frame) => {
                        consecutive_failures = 0;
                        if !frames.publish(frame) {
                            log_info!("frame slot closed by consumer");
                            break;
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        log_warn!(
                            "capture failed ({consecutive_failures}/{failure_limit}): {err}"
                        );
                        if consecutive_failures >= failure_limit.max(1) {
                            frames.fail(err.to_string());
                            break;
                        }
                    }
                }
            }
        }
    }

    surface.release();
}
