use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{FetchSection, ToolsSection};
use crate::exec::{describe, CommandExecutor};
use crate::ytdlp;

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("channel listing timed out after {0:?}")]
    Timeout(Duration),
    #[error("yt-dlp failed ({command}): status {status:?}: {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("channel listing produced no identifiers")]
    Empty,
    #[error("io error running yt-dlp: {0}")]
    Io(#[from] std::io::Error),
}

pub type EnumerationResult<T> = std::result::Result<T, EnumerationError>;

#[async_trait::async_trait]
pub trait Enumerator: Send + Sync {
    /// Cheap ordered listing of a channel's video ids, no per-video metadata.
    /// Order is preserved as returned; duplicates are not removed here.
    async fn list(&self, channel_url: &str) -> EnumerationResult<Vec<String>>;
}

/// Flat-playlist listing via `yt-dlp --flat-playlist --get-id`. Enumeration
/// sits on the critical path of every refresh cycle, so the call is bounded
/// by a hard timeout.
pub struct YtDlpEnumerator {
    executor: Arc<dyn CommandExecutor>,
    tools: ToolsSection,
    timeout: Duration,
}

impl YtDlpEnumerator {
    pub fn new(executor: Arc<dyn CommandExecutor>, tools: ToolsSection, fetch: &FetchSection) -> Self {
        Self {
            executor,
            tools,
            timeout: Duration::from_secs(fetch.enumerate_timeout_seconds),
        }
    }

    fn command(&self, channel_url: &str) -> Command {
        let mut command = ytdlp::base_command(&self.tools);
        command.arg("--flat-playlist").arg("--get-id").arg(channel_url);
        ytdlp::extractor_args(&mut command);
        command
    }
}

#[async_trait::async_trait]
impl Enumerator for YtDlpEnumerator {
    async fn list(&self, channel_url: &str) -> EnumerationResult<Vec<String>> {
        let mut command = self.command(channel_url);
        let output = timeout(self.timeout, self.executor.run(&mut command))
            .await
            .map_err(|_| EnumerationError::Timeout(self.timeout))??;
        if !output.status.success() {
            return Err(EnumerationError::CommandFailure {
                command: describe(&command),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if ids.is_empty() {
            return Err(EnumerationError::Empty);
        }
        debug!(channel = channel_url, count = ids.len(), "enumerated channel uploads");
        Ok(ids)
    }
}
