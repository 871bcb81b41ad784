use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use ytlive_core::{
    load_ytlive_config, CacheRefresher, CacheStore, CommandExecutor, RefreshStats, RelayEngine,
    RelayOutcome, RelayService, SelectionRequest, SystemCommandExecutor, ToolMediaRelay,
    VideoPage, YtDlpEnumerator, YtDlpFetcher, YtLiveConfig,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ytlive_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("refresh failed: {0}")]
    Refresh(#[from] ytlive_core::RefreshError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "ytlive command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to ytlive.toml
    #[arg(long, default_value = "configs/ytlive.toml")]
    pub config: PathBuf,
    /// Override the channel URL from the config
    #[arg(long)]
    pub channel_url: Option<String>,
    /// Override the ingest stream key from the config
    #[arg(long)]
    pub stream_key: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one cache refresh cycle and exit
    Refresh,
    /// Run the periodic cache refresher in the foreground
    Watch,
    /// Page through cached video metadata
    Videos(VideosArgs),
    /// Relay a selection of videos to the ingest endpoint
    #[command(subcommand)]
    Relay(RelayCommands),
}

#[derive(Args, Debug)]
pub struct VideosArgs {
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,
    /// Records per page
    #[arg(long, default_value_t = 20)]
    pub page_size: usize,
}

#[derive(Subcommand, Debug)]
pub enum RelayCommands {
    /// Relay the newest N videos
    Latest(LatestArgs),
    /// Relay videos uploaded within an inclusive date range
    Range(RangeArgs),
    /// Relay an explicit list of video ids
    Ids(IdsArgs),
}

#[derive(Args, Debug)]
pub struct LatestArgs {
    #[arg(default_value_t = 5)]
    pub count: usize,
}

#[derive(Args, Debug)]
pub struct RangeArgs {
    /// Earliest upload date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Latest upload date, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct IdsArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
}

impl RelayCommands {
    fn to_request(&self) -> SelectionRequest {
        match self {
            RelayCommands::Latest(args) => SelectionRequest::Latest(args.count),
            RelayCommands::Range(args) => SelectionRequest::DateRange {
                from: args.from,
                to: args.to,
            },
            RelayCommands::Ids(args) => SelectionRequest::Explicit(args.ids.clone()),
        }
    }
}

struct AppContext {
    config: YtLiveConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl AppContext {
    fn new(config: YtLiveConfig) -> Self {
        Self {
            config,
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    fn refresher(&self) -> CacheRefresher {
        let enumerator = YtDlpEnumerator::new(
            self.executor.clone(),
            self.config.tools.clone(),
            &self.config.fetch,
        );
        let fetcher = YtDlpFetcher::new(
            self.executor.clone(),
            self.config.tools.clone(),
            &self.config.fetch,
        );
        CacheRefresher::new(
            Arc::new(enumerator),
            Arc::new(fetcher),
            CacheStore::new(&self.config.cache.path),
            self.config.channel.url.clone(),
        )
    }

    fn service(&self) -> RelayService {
        let relay = ToolMediaRelay::new(
            self.executor.clone(),
            self.config.tools.clone(),
            &self.config.ingest,
        );
        let engine = RelayEngine::new(Arc::new(relay), &self.config.relay);
        RelayService::new(CacheStore::new(&self.config.cache.path), engine)
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config.channel.refresh_interval_hours * 3600)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing();
    let mut config = load_ytlive_config(&cli.config)?;
    if let Some(url) = &cli.channel_url {
        config.channel.url = url.clone();
    }
    if let Some(key) = &cli.stream_key {
        config.ingest.stream_key = key.clone();
    }
    let context = AppContext::new(config);

    match &cli.command {
        Commands::Refresh => {
            let stats = context.refresher().run_once().await?;
            emit(cli.format, &stats, format_stats)?;
        }
        Commands::Watch => {
            let handle = Arc::new(context.refresher()).spawn(context.refresh_interval());
            tokio::signal::ctrl_c().await?;
            handle.abort();
        }
        Commands::Videos(args) => {
            let page = context.service().list_page(args.page, args.page_size);
            emit(cli.format, &page, format_page)?;
        }
        Commands::Relay(command) => {
            let service = context.service();
            let stop = service.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.stop();
                }
            });
            let outcome = service.relay(&command.to_request()).await;
            emit(cli.format, &outcome, format_outcome)?;
        }
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn emit<T, F>(format: OutputFormat, value: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: Fn(&T) -> String,
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text(value)),
    }
    Ok(())
}

fn format_stats(stats: &RefreshStats) -> String {
    format!(
        "enumerated {} ids, {} new, {} fetched, {} failed batches",
        stats.enumerated, stats.new_ids, stats.fetched, stats.failed_batches
    )
}

fn format_page(page: &VideoPage) -> String {
    let mut lines = vec![format!(
        "page {} (size {}), {} videos total",
        page.page, page.page_size, page.total_count
    )];
    for record in &page.records {
        let date = record
            .upload_date
            .map(|date| date.to_string())
            .unwrap_or_else(|| "----------".to_string());
        lines.push(format!("{}  {}  {:?}  {}", record.id, date, record.kind, record.title));
    }
    lines.join("\n")
}

fn format_outcome(outcome: &RelayOutcome) -> String {
    if outcome.ok {
        outcome.message.clone()
    } else {
        format!("failed: {}", outcome.message)
    }
}
