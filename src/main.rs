use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use appstack::cli::{Cli, Commands};
use appstack::commands;
use appstack::config;
use appstack::config::validate::validate;
use appstack::events::StackEvent;
use appstack::logs::LogWriter;
use appstack::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start => run_start(cli.global.config_file).await,
        Commands::Validate => commands::validate::run(cli.global.config_file.as_deref()),
        Commands::Doctor => commands::doctor::run(cli.global.config_file.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_start(config_file: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = config::resolve_config(config_file.as_deref())?;
    let (config, source) = config::load_config(&config_path)?;

    let filename = config_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| config::CONFIG_FILENAME.to_string());

    if let Err(errors) = validate(&config, &source, &filename) {
        for err in errors {
            let report: miette::Report = err.into();
            eprintln!("{:?}", report);
        }
        anyhow::bail!("configuration is invalid");
    }

    let base = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let orchestrator = Orchestrator::from_config(config, &base)?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(StackEvent::Progress { percent, message }) => {
                    info!("[{:>3}%] {}", percent, message);
                }
                Ok(StackEvent::Service {
                    service,
                    status,
                    message,
                }) => {
                    info!(service = %service, status = %status, "{}", message);
                }
                Ok(StackEvent::Ready) => {}
                Ok(StackEvent::Failed { reason }) => {
                    tracing::error!("startup failed: {}", reason);
                }
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    });

    let writer = LogWriter::new(orchestrator.subscribe_logs(), orchestrator.max_name_len());
    tokio::spawn(writer.run());

    if let Err(e) = orchestrator.start_all().await {
        // Clean up whatever did come up before reporting the failure.
        orchestrator.stop_all().await;
        return Err(e);
    }

    tokio::signal::ctrl_c().await.ok();
    eprintln!("\nShutting down...");
    orchestrator.stop_all().await;
    Ok(())
}
