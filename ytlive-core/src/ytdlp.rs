use tokio::process::Command;

use crate::config::ToolsSection;

const EXTRACTOR_ARGS: [&str; 2] = ["--extractor-args", "youtube:player_client=default"];

pub(crate) fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// yt-dlp invocation with the cookies file (when configured) already applied.
pub(crate) fn base_command(tools: &ToolsSection) -> Command {
    let mut command = Command::new(&tools.yt_dlp);
    if let Some(cookies) = &tools.cookies {
        command.arg("--cookies").arg(cookies);
    }
    command
}

pub(crate) fn extractor_args(command: &mut Command) {
    command.args(EXTRACTOR_ARGS);
}
