mod cli;
mod handler;
mod io;
mod oneshot;
mod protocol;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for results and the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = settings::load(cli.config.as_deref(), cli.deployer.clone())?;

    match cli.command.to_request() {
        Some(request) => oneshot::run(config, request, cli.json).await,
        None => {
            info!("sc64deck {} starting in stdio mode", VERSION);
            io::stdio::run_stdio_loop(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
