//! Main entry point for the iga-backup CLI

use clap::Parser;
use iga_backup::backup::RunOutcome;
use iga_backup::cli::{Cli, Commands};
use iga_backup::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Exit code for a run that finished with recorded failures
const EXIT_PARTIAL: i32 = 2;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iga_backup=info"));

    // Logs go to stderr so stdout stays parseable with --output-format json.
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - cancelling outstanding work...");
                shutdown.request_shutdown();
            }
        }
    });

    let result: anyhow::Result<i32> = match cli.command {
        Commands::Backup(ref args) => args
            .execute(cli.output_format, shutdown.clone())
            .await
            .map(|summary| match summary.outcome {
                RunOutcome::Completed => 0,
                RunOutcome::CompletedWithFailures => EXIT_PARTIAL,
                RunOutcome::Aborted { .. } => 1,
            })
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Endpoints(ref cmd) => cmd
            .execute(cli.output_format)
            .map(|_| 0)
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Validate(ref cmd) => cmd
            .execute(cli.output_format)
            .map(|_| 0)
            .map_err(|e| anyhow::anyhow!(e)),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}
