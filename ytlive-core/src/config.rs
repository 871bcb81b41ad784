use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct YtLiveConfig {
    pub channel: ChannelSection,
    pub tools: ToolsSection,
    pub ingest: IngestSection,
    pub cache: CacheSection,
    pub fetch: FetchSection,
    pub relay: RelaySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    pub url: String,
    pub refresh_interval_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub cookies: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    pub rtmp_url: String,
    pub stream_key: String,
}

impl IngestSection {
    /// Full publish destination, e.g. `rtmps://a.rtmps.youtube.com/live2/<key>`.
    pub fn destination(&self) -> String {
        format!("{}/{}", self.rtmp_url.trim_end_matches('/'), self.stream_key)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSection {
    pub enumerate_timeout_seconds: u64,
    pub batch_timeout_floor_seconds: u64,
    pub batch_timeout_per_item_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    pub work_dir: PathBuf,
    pub pause_between_seconds: u64,
}

pub fn load_ytlive_config<P: AsRef<Path>>(path: P) -> Result<YtLiveConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
