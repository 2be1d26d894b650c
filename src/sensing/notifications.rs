//! Notification text acquisition.
//!
//! Posted notifications arrive as JSON lines (`{"sourceApp": ..., "sender":
//! ..., "body": ...}`) on a file or FIFO written by the platform listener.
//! Only monitored messaging apps are screened.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::models::TextSample;
use crate::{log_debug, log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "notifications";

const FEED_POLL_MS: u64 = 500;

const SYSTEM_MESSAGE_MARKERS: [&str; 4] =
    ["new messages", "missed call", "listening to", "battery"];

#[derive(Debug, Clone)]
pub struct NotificationFilter {
    monitored: HashSet<String>,
}

impl NotificationFilter {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            monitored: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accepts(&self, sample: &TextSample) -> bool {
        self.monitored.contains(&sample.source_app)
            && !sample.sender.trim().is_empty()
            && !sample.body.trim().is_empty()
            && !is_system_message(&sample.body)
    }
}

fn is_system_message(text: &str) -> bool {
    SYSTEM_MESSAGE_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Tail `path`, forwarding accepted notifications into `queue`.
///
/// The queue is bounded; when the classifier falls behind, newly posted
/// notifications are dropped with a warning rather than buffered without limit.
pub async fn run_notification_feed(
    path: PathBuf,
    filter: NotificationFilter,
    queue: mpsc::Sender<TextSample>,
    cancel: CancellationToken,
) {
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            log_error!("cannot open notification feed {}: {err}", path.display());
            return;
        }
    };
    log_info!("reading notifications from {}", path.display());

    let mut reader = BufReader::new(file);
    // Bytes of a record whose newline has not been written yet.
    let mut pending = Vec::new();
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_until(b'\n', &mut pending) => read,
        };

        match read {
            Ok(_) if pending.ends_with(b"\n") => {
                let open = forward_record(&pending, &filter, &queue);
                pending.clear();
                if !open {
                    break;
                }
            }
            Ok(_) => {
                // End of what has been written so far; keep tailing.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(FEED_POLL_MS)) => {}
                }
            }
            Err(err) => {
                log_error!("notification feed read failed: {err}");
                break;
            }
        }
    }

    log_info!("notification feed stopped");
}

/// Parse one complete line and queue it. Returns false once the queue is closed.
fn forward_record(
    line: &[u8],
    filter: &NotificationFilter,
    queue: &mpsc::Sender<TextSample>,
) -> bool {
    if line.iter().all(u8::is_ascii_whitespace) {
        return true;
    }
    let sample: TextSample = match serde_json::from_slice(line) {
        Ok(sample) => sample,
        Err(err) => {
            log_warn!("skipping unparsable notification line: {err}");
            return true;
        }
    };
    if !filter.accepts(&sample) {
        return true;
    }
    log_debug!("intercepted notification from {}", sample.source_app);
    match queue.try_send(sample) {
        Ok(()) => true,
        Err(TrySendError::Full(dropped)) => {
            log_warn!(
                "text queue full, dropping notification from {}",
                dropped.source_app
            );
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
