use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = ytlivectl::Cli::parse();
    if let Err(err) = ytlivectl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
