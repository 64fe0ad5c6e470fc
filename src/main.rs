//! Gateway guard operator CLI.
//!
//! Inspects and manages the circuit breaker and result cache state shared
//! by every gateway instance pointing at the same store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use gateway_guard::config::{self, GuardConfig};
use gateway_guard::health::{self, StateMonitor};
use gateway_guard::lifecycle::{wait_for_signal, Shutdown};
use gateway_guard::observability::{init_logging, metrics};
use gateway_guard::{CacheCategory, CircuitBreakerManager, ResultCache};

#[derive(Parser)]
#[command(name = "gateway-guard")]
#[command(about = "Inspect and manage shared circuit breaker and cache state", long_about = None)]
struct Cli {
    /// TOML config file (defaults plus environment when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every configured service's circuit record
    Status,
    /// Print the aggregated health report
    Health,
    /// Drop every cache entry of a category
    Invalidate {
        /// search, intent or embedding
        category: CacheCategory,
    },
    /// Refresh circuit states periodically until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::loader::default_config()?,
    };
    init_logging(&config.observability)?;

    tracing::debug!(
        store = %config.store.url,
        enabled = config.store.enabled,
        services = config.circuit_breaker.services.len(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Status => status(&config).await?,
        Commands::Health => {
            if !health_report(&config).await? {
                std::process::exit(1);
            }
        }
        Commands::Invalidate { category } => {
            let cache = ResultCache::connect(&config.store, config.cache.clone()).await;
            let deleted = cache.invalidate(category).await;
            println!("{}", serde_json::json!({ "category": category.prefix(), "deleted": deleted }));
        }
        Commands::Watch => watch(&config).await?,
    }

    Ok(())
}

async fn status(config: &GuardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let breakers = CircuitBreakerManager::connect(config.circuit_breaker.clone(), &config.store).await?;
    breakers.refresh_all().await;

    let mut names: Vec<String> = breakers.get_all_states().into_keys().collect();
    names.sort();

    let mut services = Map::new();
    for name in names {
        let record = breakers.record(&name).unwrap_or_default();
        services.insert(name, serde_json::to_value(record)?);
    }

    let output = serde_json::json!({
        "shared": breakers.is_shared(),
        "degraded": breakers.is_degraded(),
        "services": Value::Object(services),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn health_report(config: &GuardConfig) -> Result<bool, Box<dyn std::error::Error>> {
    let breakers = CircuitBreakerManager::connect(config.circuit_breaker.clone(), &config.store).await?;
    breakers.refresh_all().await;
    let cache = ResultCache::connect(&config.store, config.cache.clone()).await;

    let report = health::check(&breakers, &cache).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.is_ready())
}

async fn watch(config: &GuardConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let breakers = CircuitBreakerManager::connect(config.circuit_breaker.clone(), &config.store).await?;
    let cache = Arc::new(ResultCache::connect(&config.store, config.cache.clone()).await);
    let interval = Duration::from_secs(config.observability.monitor_interval_secs);

    let shutdown = Shutdown::new();
    let monitor = StateMonitor::new(breakers, interval).with_cache(cache);
    shutdown.track("state_monitor", tokio::spawn(monitor.run(shutdown.subscribe())));

    tracing::info!("Watching circuit state, press Ctrl+C to stop");
    wait_for_signal().await;

    shutdown.drain(Duration::from_secs(5)).await;
    tracing::info!("Stopped");
    Ok(())
}
