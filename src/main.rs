//! PUNTER — Exchange Betting Automation Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the ledger, wires the exchange client into the placement and
//! reconciliation jobs, and runs the scheduler with graceful shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use punter::config;
use punter::dashboard::{self, routes::DashboardState};
use punter::engine::cycle::CycleOrchestrator;
use punter::engine::reconcile::ReconciliationJob;
use punter::exchange::betfair::BetfairClient;
use punter::ledger::sqlite::SqliteLedger;
use punter::notify::BroadcastSink;
use punter::scheduler::Scheduler;
use punter::staking::StakingCalculator;
use punter::store::TeamProgressionStore;

const BANNER: &str = r#"
 ____  _   _ _   _ _____ _____ ____
|  _ \| | | | \ | |_   _| ____|  _ \
| |_) | | | |  \| | | | |  _| | |_) |
|  __/| |_| | |\  | | | | |___|  _ <
|_|    \___/|_| \_| |_| |_____|_| \_\

  Progressive Staking Exchange Bot
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        bot_name = %cfg.bot.name,
        cycle_time = %cfg.bot.cycle_time,
        reconcile_interval_mins = cfg.bot.reconcile_interval_mins,
        dry_run = cfg.bot.dry_run,
        "PUNTER starting up"
    );

    let (cycle_hour, cycle_minute) = config::AppConfig::parse_cycle_time(&cfg.bot.cycle_time)?;

    // -- Ledger and team store -------------------------------------------

    let ledger = SqliteLedger::open(&cfg.ledger.database_url)
        .await
        .context("Failed to open ledger database")?;
    let store = Arc::new(TeamProgressionStore::new(Arc::new(ledger)));

    let teams = store.list().await?;
    info!(teams = teams.len(), "Ledger opened");

    // -- Exchange client -------------------------------------------------

    let creds = cfg.exchange_credentials()?;
    let exchange = Arc::new(BetfairClient::new(
        creds.app_key,
        creds.username,
        creds.password,
    )?);

    // -- Jobs ------------------------------------------------------------

    let notifier = Arc::new(BroadcastSink::new(256));
    let staking = StakingCalculator::new(cfg.staking.clone().into());

    let cycle = Arc::new(CycleOrchestrator::new(
        exchange.clone(),
        store.clone(),
        notifier.clone(),
        staking,
        cfg.bot.dry_run,
    ));
    let reconcile = Arc::new(ReconciliationJob::new(
        exchange,
        store.clone(),
        notifier.clone(),
        cfg.exchange.settlement_lookback_days,
    ));

    let scheduler = Arc::new(Scheduler::new(
        cycle,
        reconcile,
        cycle_hour,
        cycle_minute,
        cfg.bot.utc_offset_minutes,
        Duration::from_secs(cfg.bot.reconcile_interval_mins * 60),
    ));

    // -- Dashboard -------------------------------------------------------

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            cfg.bot.name.clone(),
            cfg.bot.dry_run,
            cfg.staking.initial_stake,
            store.clone(),
            scheduler.clone(),
            notifier.clone(),
        ));
        dashboard::spawn_feed(state.clone(), notifier.subscribe());
        dashboard::spawn_dashboard(state, cfg.dashboard.port)?;
    }

    // -- Main loop -------------------------------------------------------

    info!("Entering scheduler loop. Press Ctrl+C to stop.");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    info!("PUNTER shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("punter=info"));

    let json_logging = std::env::var("PUNTER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
