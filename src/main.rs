use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rolling_upgrade::cli::Cli;
use rolling_upgrade::client::RestConnector;
use rolling_upgrade::driver::{ContainerDriver, RunSide};
use rolling_upgrade::metrics::RunMetrics;
use rolling_upgrade::{UpgradeError, UpgradeOrchestrator, UpgradeReport, generate_run_id};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive())),
        )
        .init();

    match run(&cli).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to render run report: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind(), "{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<UpgradeReport, UpgradeError> {
    let config = cli.configuration()?;
    let run_id = generate_run_id();
    info!(run_id = %run_id, engine = %config.settings.server.engine, "Starting rolling upgrade run");

    let from_driver = Arc::new(ContainerDriver::new(
        config.settings.clone(),
        config.version_from.clone(),
        RunSide::From,
        run_id.clone(),
    ));
    let to_driver = Arc::new(ContainerDriver::new(
        config.settings.clone(),
        config.version_to.clone(),
        RunSide::To,
        run_id.clone(),
    ));
    let connector = Arc::new(RestConnector::new(&config.settings)?);
    let metrics = Arc::new(RunMetrics::new());

    let mut orchestrator = UpgradeOrchestrator::new(config, from_driver, to_driver, connector)
        .with_run_id(run_id)
        .with_metrics(metrics.clone());
    let handlers = cli.failure_handlers();
    if !handlers.is_empty() {
        orchestrator = orchestrator.with_failure_handler(handlers);
    }

    let result = orchestrator.perform_upgrade().await;

    if let Some(path) = &cli.metrics_file {
        match metrics.write_to(path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics"),
            Err(e) => warn!(path = %path.display(), "Failed to write metrics: {}", e),
        }
    }

    result
}
