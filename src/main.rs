use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use swell_alerts::{
    AlertEvaluator, DisabledSender, HttpPushSender, NotificationSender, SqliteAlertStore,
};
use swell_core::{AppError, Config, ConfigError, QuotaConfig};
use swell_forecast::{
    default_catalog, load_catalog, FetchMode, ForecastService, OpenMeteoProvider, ProviderChain,
    QuotaLedger, QuotaTracker, SqliteCacheStore, SqliteQuotaLedger, StormglassProvider,
};
use swell_refresh::{spawn_scheduler, RefreshOrchestrator, TriggerState};

#[derive(Parser)]
#[command(name = "swellsync", version, about = "Surf forecast refresh and alerting")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the trigger API and run the refresh on a schedule
    Serve,
    /// Run one refresh and print the summary as JSON
    Refresh,
    /// Print the forecast for a location, fetching it if not cached
    Forecast {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
    },
}

/// Everything a command needs, wired from one config.
struct Components {
    orchestrator: Arc<RefreshOrchestrator>,
    on_demand_quota: Arc<QuotaTracker>,
}

fn build(config: &Config) -> Result<Components> {
    let catalog = match &config.catalog_path {
        Some(path) => load_catalog(path).map_err(|e| {
            AppError::CatalogUnavailable(format!("{}: {}", path.display(), e))
        })?,
        None => default_catalog(),
    };

    let db = &config.storage.database_path;
    if let Some(parent) = db.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store = Arc::new(SqliteCacheStore::new(db).context("Failed to open forecast cache")?);
    let ledger: Arc<dyn QuotaLedger> =
        Arc::new(SqliteQuotaLedger::new(db).context("Failed to open quota ledger")?);
    let quota = Arc::new(QuotaTracker::new(ledger.clone(), config.quota));
    let on_demand_quota = Arc::new(QuotaTracker::new(
        ledger,
        QuotaConfig {
            daily_cap: config.quota.daily_cap,
            per_run_cap: config.quota.daily_cap,
        },
    ));

    let mut chain = ProviderChain::default();
    match StormglassProvider::from_config(&config.providers)? {
        Some(primary) => chain = chain.with_provider(Arc::new(primary)),
        None => tracing::warn!("No primary API key, forecasts come from the secondary provider"),
    }
    chain = chain.with_provider(Arc::new(OpenMeteoProvider::from_config(&config.providers)?));
    let service = Arc::new(ForecastService::new(store, chain));

    let alert_store = Arc::new(SqliteAlertStore::new(db).context("Failed to open alert tables")?);
    let sender: Arc<dyn NotificationSender> = match HttpPushSender::from_config(&config.push)? {
        Some(sender) => Arc::new(sender),
        None => Arc::new(DisabledSender),
    };
    let evaluator = AlertEvaluator::new(alert_store.clone(), alert_store, sender)
        .with_key_mode(config.refresh.alert_key_mode);

    let orchestrator = RefreshOrchestrator::new(catalog, service, quota)
        .with_alerts(Arc::new(evaluator))
        .with_request_delay(Duration::from_millis(config.refresh.request_delay_ms));

    Ok(Components {
        orchestrator: Arc::new(orchestrator),
        on_demand_quota,
    })
}

async fn serve(config: &Config, components: Components) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_addr))?;

    let state = TriggerState::new(
        components.orchestrator,
        components.on_demand_quota,
        config.server.cron_secret.clone(),
    );

    if config.refresh.interval_minutes > 0 {
        spawn_scheduler(
            state.clone(),
            Duration::from_secs(u64::from(config.refresh.interval_minutes) * 60),
            chrono::Duration::hours(i64::from(config.refresh.retention_hours)),
        );
    }

    swell_refresh::serve(state, addr).await;
    Ok(())
}

/// Exit status for a failed command: sysexits codes for known startup
/// failures, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(app) = err.downcast_ref::<AppError>() {
        app.exit_code()
    } else if let Some(config) = err.downcast_ref::<ConfigError>() {
        config.exit_code()
    } else {
        1
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run() -> Result<()> {
    swell_core::init()?;

    let cli = Cli::parse();
    let (config, _) = Config::load_validated(cli.config.as_deref())?;
    let components = build(&config)?;

    match cli.command {
        Command::Serve => serve(&config, components).await?,
        Command::Refresh => {
            let summary = components.orchestrator.run().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Forecast { lat, lng } => {
            components.on_demand_quota.begin_run().await;
            let row = components
                .orchestrator
                .service()
                .get_or_fetch(
                    lat,
                    lng,
                    FetchMode::OnDemand,
                    &components.on_demand_quota,
                    Utc::now(),
                )
                .await?
                .into_row();
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
    }

    Ok(())
}
