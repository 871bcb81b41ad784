pub mod cache;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod exec;
pub mod metadata;
pub mod refresher;
pub mod relay;
pub mod select;
pub mod service;
mod ytdlp;

pub use cache::{CacheSnapshot, CacheStore, StoreError, StoreResult};
pub use config::{
    load_ytlive_config, CacheSection, ChannelSection, FetchSection, IngestSection, RelaySection,
    ToolsSection, YtLiveConfig,
};
pub use enumerator::{EnumerationError, EnumerationResult, Enumerator, YtDlpEnumerator};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use metadata::{BatchFailure, FetchResult, MetadataFetcher, VideoKind, VideoRecord, YtDlpFetcher};
pub use refresher::{CacheRefresher, RefreshError, RefreshStats};
pub use relay::{
    JobOutcome, JobReport, MediaRelay, PublishMode, RelayEngine, RelayError, RelayReport,
    RelayResult, StopHandle, ToolMediaRelay,
};
pub use select::{is_channel_ref, select, SelectionRequest};
pub use service::{RelayOutcome, RelayService, VideoPage};
