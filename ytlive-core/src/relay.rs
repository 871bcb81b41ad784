use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{IngestSection, RelaySection, ToolsSection};
use crate::exec::{describe, CommandExecutor};
use crate::select::is_channel_ref;
use crate::ytdlp;

/// Fixed re-encode preset used when stream-copy is rejected by the ingest.
const REENCODE_ARGS: [&str; 16] = [
    "-c:v", "libx264", "-preset", "veryfast", "-maxrate", "1500k", "-bufsize", "3000k",
    "-b:v", "1200k", "-c:a", "aac", "-b:a", "96k", "-ar", "44100",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    Copy,
    Transcode,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("download failed for {id}: {reason}")]
    Download { id: String, reason: String },
    #[error("publish failed in {mode:?} mode: {reason}")]
    Publish { mode: PublishMode, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Download + publish capability pair. Both calls are long-running by nature
/// (proportional to video length) and intentionally unbounded in time.
#[async_trait::async_trait]
pub trait MediaRelay: Send + Sync {
    /// Download one video into `work_dir`, returning the produced file.
    async fn download(&self, video_id: &str, work_dir: &Path) -> RelayResult<PathBuf>;
    /// Publish a local file to the ingest endpoint in the given mode.
    async fn publish(&self, input: &Path, mode: PublishMode) -> RelayResult<()>;
}

/// yt-dlp download + ffmpeg publish against an RTMP(S) ingest.
pub struct ToolMediaRelay {
    executor: Arc<dyn CommandExecutor>,
    tools: ToolsSection,
    destination: String,
}

impl ToolMediaRelay {
    pub fn new(executor: Arc<dyn CommandExecutor>, tools: ToolsSection, ingest: &IngestSection) -> Self {
        Self {
            executor,
            tools,
            destination: ingest.destination(),
        }
    }
}

#[async_trait::async_trait]
impl MediaRelay for ToolMediaRelay {
    async fn download(&self, video_id: &str, work_dir: &Path) -> RelayResult<PathBuf> {
        let template = work_dir.join(format!("{video_id}.%(ext)s"));
        let mut command = ytdlp::base_command(&self.tools);
        command.arg("-o").arg(&template).arg(ytdlp::watch_url(video_id));
        ytdlp::extractor_args(&mut command);
        debug!(command = %describe(&command), "starting download");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| RelayError::Download {
                id: video_id.to_string(),
                reason: source.to_string(),
            })?;
        if !output.status.success() {
            return Err(RelayError::Download {
                id: video_id.to_string(),
                reason: format!(
                    "yt-dlp exited with status {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        // yt-dlp picks the extension, so discover the newest file for the id
        newest_output_file(work_dir, video_id)
            .await?
            .ok_or_else(|| RelayError::Download {
                id: video_id.to_string(),
                reason: "no output file produced".to_string(),
            })
    }

    async fn publish(&self, input: &Path, mode: PublishMode) -> RelayResult<()> {
        let mut command = Command::new(&self.tools.ffmpeg);
        command.arg("-re").arg("-i").arg(input);
        match mode {
            PublishMode::Copy => {
                command.arg("-c").arg("copy");
            }
            PublishMode::Transcode => {
                command.args(REENCODE_ARGS);
            }
        }
        command.arg("-f").arg("flv").arg(&self.destination);
        info!(command = %describe(&command), "starting publish");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| RelayError::Publish {
                mode,
                reason: source.to_string(),
            })?;
        if !output.status.success() {
            return Err(RelayError::Publish {
                mode,
                reason: format!(
                    "ffmpeg exited with status {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

async fn newest_output_file(work_dir: &Path, video_id: &str) -> RelayResult<Option<PathBuf>> {
    let io_error = |source: std::io::Error| RelayError::Io {
        source,
        path: work_dir.to_path_buf(),
    };
    let prefix = format!("{video_id}.");
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut entries = fs::read_dir(work_dir).await.map_err(io_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().map_or(true, |(when, _)| modified >= *when) {
            best = Some((modified, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Done,
    RejectedId,
    DownloadFailed,
    PublishFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: String,
    pub outcome: JobOutcome,
    pub mode: Option<PublishMode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayReport {
    pub jobs: Vec<JobReport>,
    pub interrupted: bool,
}

impl RelayReport {
    pub fn done(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.outcome == JobOutcome::Done)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.done()
    }
}

/// Requests the engine to stop scheduling further videos. The job in flight
/// still runs its cleanup to completion.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Per-video lifecycle. Every branch that acquires the downloaded file must
/// pass through `Cleanup` before finishing.
enum JobState {
    Pending,
    Downloading,
    PublishingCopy(PathBuf),
    PublishingReencode(PathBuf),
    Cleanup {
        file: PathBuf,
        outcome: JobOutcome,
        mode: Option<PublishMode>,
    },
    Finished {
        outcome: JobOutcome,
        mode: Option<PublishMode>,
    },
}

/// Drives selected videos through download and publish, strictly one at a
/// time: the publish step contends for a single ingest endpoint.
pub struct RelayEngine {
    relay: Arc<dyn MediaRelay>,
    work_dir: PathBuf,
    pause_between: Duration,
    stop: StopHandle,
}

impl RelayEngine {
    pub fn new(relay: Arc<dyn MediaRelay>, config: &RelaySection) -> Self {
        Self {
            relay,
            work_dir: config.work_dir.clone(),
            pause_between: Duration::from_secs(config.pause_between_seconds),
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Process the selection sequentially, best effort over the batch: a
    /// per-video failure is logged and the next video still runs.
    pub async fn run(&self, ids: &[String]) -> RelayResult<RelayReport> {
        fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|source| RelayError::Io {
                source,
                path: self.work_dir.clone(),
            })?;
        let mut report = RelayReport::default();
        for (index, id) in ids.iter().enumerate() {
            if self.stop.is_stopped() {
                report.interrupted = true;
                warn!(remaining = ids.len() - index, "relay run interrupted, stopping");
                break;
            }
            let job = self.run_job(id).await;
            info!(video = %id, outcome = ?job.outcome, "relay job finished");
            report.jobs.push(job);
            if index + 1 < ids.len() && !self.pause_between.is_zero() {
                // pacing so the external tools are not hammered back-to-back
                sleep(self.pause_between).await;
            }
        }
        self.remove_work_dir_if_empty().await;
        Ok(report)
    }

    async fn run_job(&self, id: &str) -> JobReport {
        let mut state = JobState::Pending;
        loop {
            state = match state {
                JobState::Pending => {
                    if id.is_empty() || is_channel_ref(id) {
                        warn!(video = %id, "rejecting empty or channel-shaped identifier");
                        JobState::Finished {
                            outcome: JobOutcome::RejectedId,
                            mode: None,
                        }
                    } else {
                        JobState::Downloading
                    }
                }
                JobState::Downloading => match self.relay.download(id, &self.work_dir).await {
                    Ok(file) => JobState::PublishingCopy(file),
                    Err(error) => {
                        // no file was produced, so there is nothing to clean
                        warn!(video = %id, %error, "download failed, skipping video");
                        JobState::Finished {
                            outcome: JobOutcome::DownloadFailed,
                            mode: None,
                        }
                    }
                },
                JobState::PublishingCopy(file) => {
                    match self.relay.publish(&file, PublishMode::Copy).await {
                        Ok(()) => JobState::Cleanup {
                            file,
                            outcome: JobOutcome::Done,
                            mode: Some(PublishMode::Copy),
                        },
                        Err(error) => {
                            info!(video = %id, %error, "stream-copy publish failed, falling back to transcode");
                            JobState::PublishingReencode(file)
                        }
                    }
                }
                JobState::PublishingReencode(file) => {
                    match self.relay.publish(&file, PublishMode::Transcode).await {
                        Ok(()) => JobState::Cleanup {
                            file,
                            outcome: JobOutcome::Done,
                            mode: Some(PublishMode::Transcode),
                        },
                        Err(error) => {
                            warn!(video = %id, %error, "transcode publish failed");
                            JobState::Cleanup {
                                file,
                                outcome: JobOutcome::PublishFailed,
                                mode: Some(PublishMode::Transcode),
                            }
                        }
                    }
                }
                JobState::Cleanup { file, outcome, mode } => {
                    if let Err(error) = fs::remove_file(&file).await {
                        warn!(path = %file.display(), %error, "failed to remove downloaded artifact");
                    }
                    JobState::Finished { outcome, mode }
                }
                JobState::Finished { outcome, mode } => {
                    return JobReport {
                        id: id.to_string(),
                        outcome,
                        mode,
                    };
                }
            };
        }
    }

    async fn remove_work_dir_if_empty(&self) {
        let Ok(mut entries) = fs::read_dir(&self.work_dir).await else {
            return;
        };
        if let Ok(None) = entries.next_entry().await {
            if let Err(error) = fs::remove_dir(&self.work_dir).await {
                debug!(path = %self.work_dir.display(), %error, "failed to remove working directory");
            }
        }
    }
}
