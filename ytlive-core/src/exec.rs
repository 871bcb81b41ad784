use tokio::process::Command;

/// Seam between the pipeline and the external tools it drives. Every
/// component that spawns yt-dlp or ffmpeg goes through this trait so tests
/// can substitute scripted executors.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        // callers bound this future with a timeout; the child must not
        // outlive a dropped run
        command.kill_on_drop(true);
        command.output().await
    }
}

/// Render a command line for logs and error messages.
pub(crate) fn describe(command: &Command) -> String {
    let std = command.as_std();
    let mut rendered = std.get_program().to_string_lossy().to_string();
    for arg in std.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
