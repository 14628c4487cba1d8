//! Conduit CLI entrypoint.
//!
//! Loads run configuration from the environment, applies CLI overrides,
//! initializes telemetry, constructs a Conduit, subscribes a signal
//! printer, and drives the run to completion.

mod ai_engine;
mod browser;
mod conduit;
mod errors;
mod pipeline;
mod retry;
mod signals;
mod telemetry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};

use conduit::config::HermesConfig;
use conduit::url_policy::validate_target_url;
use conduit::Conduit;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Deterministic phase-driven scraping engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the Conduit against a target URL.
    Run {
        /// The URL the run navigates to.
        #[arg(long)]
        target_url: String,

        /// Path to a JSON file describing the extraction schema.
        #[arg(long)]
        schema: PathBuf,

        /// Path to a JSON file mapping field names to CSS selectors,
        /// used by heuristic and hybrid extraction.
        #[arg(long)]
        selectors: Option<PathBuf>,

        /// Extraction strategy.
        #[arg(long, default_value = "heuristic")]
        mode: String,

        /// Overrides `HERMES_DATA_DIR` for this run.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Enables OTLP trace export.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// OTLP collector endpoint (implies --otel if set).
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Suppresses informational signal printing; errors still print.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Enables debug-level logging.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            target_url,
            schema,
            selectors,
            mode,
            data_dir,
            otel,
            otel_endpoint,
            silent,
            verbose,
        } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };

            if *otel || otel_endpoint.is_some() {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                if !*silent {
                    eprintln!("Warning: failed to initialize telemetry: {e}");
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run_conduit(target_url, schema, selectors.as_deref(), mode, data_dir.as_deref(), *silent).await;

            shutdown_telemetry();
            std::process::exit(exit_code);
        }
    }
}

async fn run_conduit(
    target_url: &str,
    schema_path: &PathBuf,
    selectors_path: Option<&std::path::Path>,
    mode: &str,
    data_dir_override: Option<&std::path::Path>,
    silent: bool,
) -> i32 {
    let schema = match std::fs::read_to_string(schema_path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, path = ?schema_path, "Failed to parse extraction schema");
                return 1;
            }
        },
        Err(e) => {
            error!(error = %e, path = ?schema_path, "Failed to read extraction schema");
            return 1;
        }
    };

    let selectors: HashMap<String, String> = match selectors_path {
        Some(path) => match std::fs::read_to_string(path).ok().and_then(|raw| serde_json::from_str(&raw).ok()) {
            Some(map) => map,
            None => {
                error!(path = ?path, "Failed to read or parse selectors file");
                return 1;
            }
        },
        None => HashMap::new(),
    };

    let mut config = match HermesConfig::from_env(target_url.to_string(), schema, mode.to_string(), selectors) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e.user_message(), "Invalid run configuration");
            return 1;
        }
    };

    if let Some(dir) = data_dir_override {
        config.pipeline.data_dir = dir.to_string_lossy().to_string();
    }

    let url_check = validate_target_url(&config.target_url, &config.target_url_policy);
    if !url_check.allowed {
        error!(reason = %url_check.reason, target_url = %config.target_url, "Target URL rejected by policy");
        return 1;
    }

    let mut conduit = match Conduit::new(config) {
        Ok(conduit) => conduit,
        Err(e) => {
            error!(error = %e, "Failed to construct Conduit");
            return 1;
        }
    };

    if !silent {
        let run_id = conduit.run_id().to_string();
        conduit
            .signals()
            .subscribe(Arc::new(move |signal| {
                println!(
                    "[{}] seq={} {:?} {}",
                    run_id,
                    signal.sequence,
                    signal.signal_type,
                    signal.payload
                );
            }))
            .await;
    }

    if !silent {
        info!(run_id = %conduit.run_id(), target_url = %target_url, "Starting run");
    }

    let summary = conduit.run().await;

    let summary_json = serde_json::to_string_pretty(&summary).expect("RunSummary always serializes");
    println!("{summary_json}");

    if summary.status == "complete" {
        0
    } else {
        1
    }
}
