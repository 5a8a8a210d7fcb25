mod backfill;
mod derive;
mod problem;
mod report;
mod router;
mod telemetry;

use std::{net::SocketAddr, process::ExitCode};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

use job_location_core::LocationInheritanceResolver;
use job_location_records::{RecordsClient, RetryPolicy};
use job_location_storage::{Database, LedgerError, StorageError};
use job_location_util::{load_env_file, AppConfig, ConfigError};

use crate::backfill::{BackfillError, BackfillMigrator};
use crate::derive::{DeriveArgs, DeriveError};
use crate::telemetry::TelemetryError;

#[derive(Debug, Parser)]
#[command(name = "job-location")]
#[command(about = "Derives job addresses from business locations and backfills them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the address and location a new job would receive.
    Derive(DeriveArgs),
    /// Copy business locations onto existing jobs that have none.
    Backfill {
        /// Evaluate every job without patching anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show recent backfill runs and the failures of the latest one.
    Report {
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Serve the derivation endpoints over HTTP.
    Serve,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Backfill(#[from] BackfillError),
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl AppError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env_file();
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = telemetry::init_tracing(&config) {
        eprintln!("{err}");
        return ExitCode::from(1);
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(stage = "app", error = %err, "command failed");
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn run(command: Command, config: &AppConfig) -> Result<(), AppError> {
    match command {
        Command::Derive(args) => {
            let resolution =
                derive::derive(&args, &config.backfill.actor, &LocationInheritanceResolver::new())?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Command::Backfill { dry_run, json } => {
            let client = records_client(config)?;
            let database = open_ledger(config).await?;
            let report = BackfillMigrator::new(
                client,
                database.backfill_runs(),
                config.backfill.page_size,
                config.backfill.actor.clone(),
            )
            .dry_run(dry_run)
            .run()
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Report { limit, json } => {
            let database = open_ledger(config).await?;
            let report = report::load(&database.backfill_runs(), limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Serve => {
            let metrics = telemetry::init_metrics()?;
            let state = router::AppState::new(metrics);

            let addr: SocketAddr = config.bind_addr;
            info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, router::app_router(state)).await?;
        }
    }
    Ok(())
}

/// Builds the records client from injected configuration; the URL is only
/// required here, so `derive` and `report` run without it.
fn records_client(config: &AppConfig) -> Result<RecordsClient, AppError> {
    let records = &config.records;
    let base_url = records.base_url()?;
    let http = reqwest::Client::builder()
        .timeout(records.timeout)
        .build()
        .map_err(AppError::HttpClient)?;

    let client = RecordsClient::new(base_url, http).with_retry(RetryPolicy::exponential(
        records.max_retries,
        records.retry_base_delay,
    ));
    Ok(match &records.api_token {
        Some(token) => client.with_token(token.expose()),
        None => client,
    })
}

async fn open_ledger(config: &AppConfig) -> Result<Database, AppError> {
    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_backfill_flags() {
        let cli = Cli::try_parse_from(["job-location", "backfill", "--dry-run", "--json"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Backfill {
                dry_run: true,
                json: true
            }
        ));
    }

    #[test]
    fn parses_derive_arguments() {
        let cli = Cli::try_parse_from([
            "job-location",
            "derive",
            "--file",
            "location.json",
            "--address",
            "Grand Hotel",
            "--actor",
            "employer-1",
        ])
        .expect("parse");
        let Command::Derive(args) = cli.command else {
            panic!("expected derive");
        };
        assert_eq!(args.address.as_deref(), Some("Grand Hotel"));
        assert_eq!(args.actor.as_deref(), Some("employer-1"));
    }

    #[test]
    fn configuration_errors_exit_with_two() {
        let err = AppError::Config(ConfigError::MissingVar("RECORDS_API_URL"));
        assert_eq!(err.exit_code(), ExitCode::from(2));
        let err = AppError::Backfill(BackfillError::CursorStalled("c".into()));
        assert_eq!(err.exit_code(), ExitCode::from(1));
    }
}
