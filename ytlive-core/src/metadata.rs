use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::config::{FetchSection, ToolsSection};
use crate::exec::{describe, CommandExecutor};
use crate::ytdlp;

/// Uploads at or below this length count as shorts when the URL gives no hint.
const SHORT_MAX_SECONDS: u64 = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Live,
    Short,
    Video,
}

/// One fully validated cache entry. Records are either complete when they
/// leave the fetcher or they never exist; nothing downstream re-validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub upload_date: Option<NaiveDate>,
    pub duration_seconds: Option<u64>,
    pub view_count: u64,
    pub description: String,
    pub thumbnail_url: String,
    pub channel_name: String,
    pub channel_url: String,
    pub kind: VideoKind,
}

/// Whole-batch failure: one bad record or unparseable line rejects every
/// record in the call, because a single malformed line desynchronizes the
/// positional correlation between input ids and output lines.
#[derive(Debug, Error)]
pub enum BatchFailure {
    #[error("metadata fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("yt-dlp failed ({command}): status {status:?}: {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("unparseable metadata line: {0}")]
    Malformed(String),
    #[error("metadata for {id} is missing required field `{field}`")]
    MissingField { id: String, field: &'static str },
    #[error("expected {expected} metadata records, received {received}")]
    CountMismatch { expected: usize, received: usize },
    #[error("io error running yt-dlp: {0}")]
    Io(#[from] std::io::Error),
}

pub type FetchResult = std::result::Result<Vec<VideoRecord>, BatchFailure>;

#[async_trait::async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetch and validate metadata for a batch of ids, in input order.
    /// Pure: persistence is the refresher's responsibility.
    async fn fetch(&self, ids: &[String]) -> FetchResult;
}

/// Batch fetcher backed by a single `yt-dlp --dump-json` call per batch.
pub struct YtDlpFetcher {
    executor: Arc<dyn CommandExecutor>,
    tools: ToolsSection,
    timeout_floor: Duration,
    timeout_per_item: Duration,
}

impl YtDlpFetcher {
    pub fn new(executor: Arc<dyn CommandExecutor>, tools: ToolsSection, fetch: &FetchSection) -> Self {
        Self {
            executor,
            tools,
            timeout_floor: Duration::from_secs(fetch.batch_timeout_floor_seconds),
            timeout_per_item: Duration::from_secs(fetch.batch_timeout_per_item_seconds),
        }
    }

    fn batch_timeout(&self, len: usize) -> Duration {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.timeout_per_item
            .saturating_mul(len)
            .max(self.timeout_floor)
    }

    fn command(&self, ids: &[String]) -> Command {
        let mut command = ytdlp::base_command(&self.tools);
        command.arg("--dump-json");
        for id in ids {
            command.arg(ytdlp::watch_url(id));
        }
        ytdlp::extractor_args(&mut command);
        command
    }
}

#[async_trait::async_trait]
impl MetadataFetcher for YtDlpFetcher {
    async fn fetch(&self, ids: &[String]) -> FetchResult {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let budget = self.batch_timeout(ids.len());
        let output = match timeout(budget, self.executor.run(&mut self.command(ids))).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(batch = ids.len(), ?budget, "metadata batch timed out, retrying once with doubled budget");
                let doubled = budget * 2;
                match timeout(doubled, self.executor.run(&mut self.command(ids))).await {
                    Ok(result) => result?,
                    Err(_) => return Err(BatchFailure::Timeout(doubled)),
                }
            }
        };
        if !output.status.success() {
            return Err(BatchFailure::CommandFailure {
                command: describe(&self.command(ids)),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_batch(ids, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse one `--dump-json` line per requested id, in order, and validate
/// every record before any is returned.
fn parse_batch(ids: &[String], stdout: &str) -> FetchResult {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.len() != ids.len() {
        return Err(BatchFailure::CountMismatch {
            expected: ids.len(),
            received: lines.len(),
        });
    }
    let mut records = Vec::with_capacity(ids.len());
    for (id, line) in ids.iter().zip(lines) {
        let raw: RawMetadata = serde_json::from_str(line)
            .map_err(|_| BatchFailure::Malformed(truncate_line(line)))?;
        records.push(raw.into_record(id)?);
    }
    Ok(records)
}

fn truncate_line(line: &str) -> String {
    const LIMIT: usize = 120;
    if line.len() <= LIMIT {
        line.to_string()
    } else {
        let cut = line
            .char_indices()
            .take_while(|(index, _)| *index < LIMIT)
            .last()
            .map(|(index, ch)| index + ch.len_utf8())
            .unwrap_or(0);
        format!("{}...", &line[..cut])
    }
}

/// Shape of one yt-dlp `--dump-json` line; everything optional so a sparse
/// upstream answer deserializes and fails validation instead of parsing.
#[derive(Debug, Deserialize)]
struct RawMetadata {
    title: Option<String>,
    fulltitle: Option<String>,
    view_count: Option<u64>,
    duration: Option<f64>,
    upload_date: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    channel_url: Option<String>,
    is_live: Option<bool>,
    was_live: Option<bool>,
    webpage_url: Option<String>,
}

impl RawMetadata {
    fn into_record(self, id: &str) -> std::result::Result<VideoRecord, BatchFailure> {
        let missing = |field: &'static str| BatchFailure::MissingField {
            id: id.to_string(),
            field,
        };
        let require = |value: &Option<String>, field: &'static str| match value {
            Some(text) if !text.is_empty() => Ok(()),
            _ => Err(missing(field)),
        };

        require(&self.title, "title")?;
        require(&self.upload_date, "upload_date")?;
        require(&self.thumbnail, "thumbnail")?;
        require(&self.channel, "channel")?;
        require(&self.channel_url, "channel_url")?;
        let view_count = self.view_count.ok_or_else(|| missing("view_count"))?;
        let duration = self.duration.ok_or_else(|| missing("duration"))?;

        let duration_seconds = Some(duration.round().max(0.0) as u64);
        let kind = derive_kind(
            self.is_live.unwrap_or(false) || self.was_live.unwrap_or(false),
            self.webpage_url.as_deref(),
            duration_seconds,
        );
        let title = match (self.title, self.fulltitle) {
            (Some(title), _) if !title.is_empty() => title,
            (_, Some(fulltitle)) if !fulltitle.is_empty() => fulltitle,
            _ => id.to_string(),
        };
        let channel_name = match (self.channel, self.channel_id) {
            (Some(channel), _) if !channel.is_empty() => channel,
            (_, Some(channel_id)) if !channel_id.is_empty() => channel_id,
            _ => String::new(),
        };

        Ok(VideoRecord {
            id: id.to_string(),
            title,
            upload_date: self.upload_date.as_deref().and_then(parse_upload_date),
            duration_seconds,
            view_count,
            description: self.description.unwrap_or_default(),
            thumbnail_url: self.thumbnail.unwrap_or_default(),
            channel_name,
            channel_url: self.channel_url.unwrap_or_default(),
            kind,
        })
    }
}

/// Classified once at fetch time, never re-derived.
fn derive_kind(live: bool, webpage_url: Option<&str>, duration_seconds: Option<u64>) -> VideoKind {
    if live {
        return VideoKind::Live;
    }
    let short_url = webpage_url.map(|url| url.contains("/shorts/")).unwrap_or(false);
    let short_duration = duration_seconds
        .map(|seconds| seconds > 0 && seconds <= SHORT_MAX_SECONDS)
        .unwrap_or(false);
    if short_url || short_duration {
        VideoKind::Short
    } else {
        VideoKind::Video
    }
}

/// yt-dlp reports `YYYYMMDD`; accept ISO as well for already-normalized data.
fn parse_upload_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_line(id: &str, overrides: &[(&str, serde_json::Value)]) -> String {
        let mut value = serde_json::json!({
            "title": format!("Title {id}"),
            "view_count": 100,
            "duration": 300.0,
            "upload_date": "20250301",
            "description": "desc",
            "thumbnail": format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"),
            "channel": "Channel",
            "channel_url": "https://www.youtube.com/@channel",
            "webpage_url": format!("https://www.youtube.com/watch?v={id}"),
        });
        for (key, override_value) in overrides {
            value[*key] = override_value.clone();
        }
        value.to_string()
    }

    #[test]
    fn batch_with_missing_title_rejects_every_record() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let stdout = format!(
            "{}\n{}\n",
            raw_line("a", &[("title", serde_json::Value::Null)]),
            raw_line("b", &[]),
        );
        let error = parse_batch(&ids, &stdout).unwrap_err();
        match error {
            BatchFailure::MissingField { id, field } => {
                assert_eq!(id, "a");
                assert_eq!(field, "title");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn line_count_mismatch_rejects_the_batch() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let stdout = format!("{}\n", raw_line("a", &[]));
        assert!(matches!(
            parse_batch(&ids, &stdout),
            Err(BatchFailure::CountMismatch {
                expected: 2,
                received: 1
            })
        ));
    }

    #[test]
    fn unparseable_line_rejects_the_batch() {
        let ids = vec!["a".to_string()];
        assert!(matches!(
            parse_batch(&ids, "not json\n"),
            Err(BatchFailure::Malformed(_))
        ));
    }

    #[test]
    fn valid_batch_preserves_input_order() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let stdout = format!("{}\n{}\n", raw_line("a", &[]), raw_line("b", &[]));
        let records = parse_batch(&ids, &stdout).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a");
        assert_eq!(records[1].id, "b");
        assert_eq!(records[0].upload_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(records[0].kind, VideoKind::Video);
    }

    #[test]
    fn live_flag_wins_over_short_duration() {
        let kind = derive_kind(true, Some("https://www.youtube.com/shorts/x"), Some(30));
        assert_eq!(kind, VideoKind::Live);
    }

    #[test]
    fn shorts_url_or_short_duration_classifies_as_short() {
        assert_eq!(
            derive_kind(false, Some("https://www.youtube.com/shorts/x"), Some(600)),
            VideoKind::Short
        );
        assert_eq!(
            derive_kind(false, Some("https://www.youtube.com/watch?v=x"), Some(65)),
            VideoKind::Short
        );
        assert_eq!(
            derive_kind(false, Some("https://www.youtube.com/watch?v=x"), Some(66)),
            VideoKind::Video
        );
    }

    #[test]
    fn batch_timeout_scales_with_floor_and_saturates() {
        use crate::exec::SystemCommandExecutor;

        let tools = ToolsSection {
            yt_dlp: "yt-dlp".into(),
            ffmpeg: "ffmpeg".into(),
            cookies: None,
        };
        let fetch = FetchSection {
            enumerate_timeout_seconds: 20,
            batch_timeout_floor_seconds: 10,
            batch_timeout_per_item_seconds: 20,
        };
        let fetcher = YtDlpFetcher::new(Arc::new(SystemCommandExecutor), tools, &fetch);

        assert_eq!(fetcher.batch_timeout(0), Duration::from_secs(10));
        assert_eq!(fetcher.batch_timeout(1), Duration::from_secs(20));
        assert_eq!(fetcher.batch_timeout(3), Duration::from_secs(60));
        // absurd batch sizes must clamp instead of panicking
        assert!(fetcher.batch_timeout(usize::MAX) >= fetcher.batch_timeout(1_000_000));
    }

    #[test]
    fn upload_date_accepts_compact_and_iso_forms() {
        assert_eq!(
            parse_upload_date("20250510"),
            NaiveDate::from_ymd_opt(2025, 5, 10)
        );
        assert_eq!(
            parse_upload_date("2025-05-10"),
            NaiveDate::from_ymd_opt(2025, 5, 10)
        );
        assert_eq!(parse_upload_date("last tuesday"), None);
    }
}
