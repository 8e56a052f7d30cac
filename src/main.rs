use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_market_intel::config::Config;
use rust_market_intel::core::models::{ClientStub, GeocodeOutcome, GeocodeRecord, RunOutcome};
use rust_market_intel::core::orchestrator::Orchestrator;
use rust_market_intel::geocode_cache::GeocodeCache;
use rust_market_intel::integrations::geocoding::{records_from_bundle, GeocodingRunner};
use rust_market_intel::integrations::llm_client::HttpTextGenerator;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "rust-market-intel", version, about = "Market intelligence enrichment for client stubs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enrich a JSON array of client stubs
    Enrich {
        /// File holding `[{"name": ..., "partial_tax_id": ...}]`
        #[arg(value_name = "STUBS")]
        path: PathBuf,

        /// Geocode the located entities of every complete bundle
        #[arg(long, default_value_t = false)]
        geocode: bool,
    },
    /// Geocode a JSON array of city/state records
    Geocode {
        #[arg(value_name = "RECORDS")]
        path: PathBuf,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Flips the cancellation flag on Ctrl-C; runs stop at the next stage boundary.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️ Interrupt received, stopping at the next stage boundary");
            let _ = tx.send(true);
        }
    });
    rx
}

fn log_config(config: &Config) {
    tracing::info!(
        "LLM: {} (model {}, timeout {:?})",
        config.llm_base_url,
        config.llm_model,
        config.llm_timeout
    );
    tracing::info!(
        "Pipeline: {} retries per stage, concurrency {}",
        config.pipeline.max_retries_per_stage,
        config.pipeline_concurrency
    );
    tracing::info!(
        "Geocoding: {} (key {}, delay {:?}, country {})",
        config.geocoding_base_url,
        if config.geocoding_api_key.is_some() {
            "set"
        } else {
            "not set"
        },
        config.geocoding_delay,
        config.geocoding_country
    );
}

#[derive(Serialize)]
struct EnrichedWithGeo {
    outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    geocodes: Option<Vec<GeocodeOutcome>>,
}

async fn run_enrich(config: &Config, path: &Path, geocode: bool) -> anyhow::Result<()> {
    let stubs: Vec<ClientStub> = read_json(path)?;
    tracing::info!("Loaded {} client stubs from {}", stubs.len(), path.display());

    let generator = HttpTextGenerator::from_config(config)?;
    let orchestrator = Orchestrator::new(Arc::new(generator), config.pipeline.clone());
    let cancel = cancel_on_ctrl_c();

    let outcomes = orchestrator
        .enrich_many_with_cancel(&stubs, config.pipeline_concurrency, &cancel)
        .await;

    let runner = if geocode {
        if config.geocoding_api_key.is_none() {
            anyhow::bail!("--geocode requires GEOCODING_API_KEY");
        }
        Some(GeocodingRunner::from_config(config, GeocodeCache::new())?)
    } else {
        None
    };

    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let geocodes = match (&runner, outcome.bundle()) {
            (Some(runner), Some(bundle)) => {
                let records = records_from_bundle(bundle);
                Some(
                    runner
                        .geocode_batch(&records, config.geocoding_delay.as_millis() as u64)
                        .await,
                )
            }
            _ => None,
        };
        results.push(EnrichedWithGeo { outcome, geocodes });
    }

    let complete = results.iter().filter(|r| r.outcome.is_complete()).count();
    tracing::info!("✓ {}/{} runs complete", complete, results.len());
    print_json(&results)
}

async fn run_geocode(config: &Config, path: &Path) -> anyhow::Result<()> {
    let records: Vec<GeocodeRecord> = read_json(path)?;
    let api_key = config
        .geocoding_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("GEOCODING_API_KEY environment variable required"))?;

    let runner = GeocodingRunner::from_config(config, GeocodeCache::new())?;
    let outcomes = runner.geocode_missing(&records, &api_key).await;
    print_json(&outcomes)
}

/// Main entry point for the batch CLI.
///
/// Parses the command line, initializes tracing, loads configuration from the
/// environment and runs the requested command, printing JSON results to stdout.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_market_intel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");
    log_config(&config);

    match cli.command {
        Command::Enrich { path, geocode } => run_enrich(&config, &path, geocode).await,
        Command::Geocode { path } => run_geocode(&config, &path).await,
    }
}
