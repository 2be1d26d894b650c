//! Attribution of a detection to the app that was in the foreground.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Duration;

use crate::{log_debug, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "foreground";

pub const UNKNOWN_APP: &str = "Unknown";

const USAGE_QUERY_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub app_id: String,
    pub last_used: DateTime<Utc>,
}

/// Platform usage statistics for a time window.
#[async_trait]
pub trait UsageStatsSource: Send + Sync {
    async fn query(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UsageRecord>>;
}

/// Runs a helper that prints one `<app-id>\t<last-used-epoch-ms>` line per app.
/// The window bounds are passed as two trailing epoch-millis arguments.
pub struct CommandUsageStats {
    program: String,
    args: Vec<String>,
}

impl CommandUsageStats {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl UsageStatsSource for CommandUsageStats {
    async fn query(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<UsageRecord>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(begin.timestamp_millis().to_string())
            .arg(end.timestamp_millis().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(USAGE_QUERY_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("usage stats query timed out"))??;

        if !output.status.success() {
            anyhow::bail!("usage stats command exited with {}", output.status);
        }

        Ok(parse_usage_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_usage_lines(text: &str) -> Vec<UsageRecord> {
    text.lines()
        .filter_map(|line| {
            let (app_id, millis) = line.trim().split_once('\t')?;
            let millis: i64 = millis.trim().parse().ok()?;
            let last_used = Utc.timestamp_millis_opt(millis).single()?;
            let app_id = app_id.trim();
            (!app_id.is_empty()).then(|| UsageRecord {
                app_id: app_id.to_string(),
                last_used,
            })
        })
        .collect()
}

/// Resolves the most recently used app within a short trailing window.
pub struct ForegroundResolver {
    source: Option<Box<dyn UsageStatsSource>>,
    window: ChronoDuration,
}

impl ForegroundResolver {
    pub fn new(source: Option<Box<dyn UsageStatsSource>>, window_secs: u64) -> Self {
        let window_secs = i64::try_from(window_secs.clamp(1, 86_400)).unwrap_or(86_400);
        Self {
            source,
            window: ChronoDuration::seconds(window_secs),
        }
    }

    pub fn unavailable() -> Self {
        Self::new(None, 10)
    }

    /// Never fails: any error or empty window yields [`UNKNOWN_APP`].
    pub async fn current_foreground_app(&self) -> String {
        let Some(source) = &self.source else {
            return UNKNOWN_APP.to_string();
        };

        let end = Utc::now();
        let begin = end - self.window;
        match source.query(begin, end).await {
            Ok(records) => records
                .into_iter()
                .filter(|record| record.last_used >= begin)
                .max_by_key(|record| record.last_used)
                .map(|record| record.app_id)
                .unwrap_or_else(|| {
                    log_debug!("no app used in the last {}s", self.window.num_seconds());
                    UNKNOWN_APP.to_string()
                }),
            Err(err) => {
                log_warn!("usage stats unavailable: {err:#}");
                UNKNOWN_APP.to_string()
            }
        }
    }
}
