//! MORPH — yield accrual and allocation engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger from disk (or seeds a fresh one), then runs the
//! compound scheduler until Ctrl+C and flushes state on the way out.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

use morph::config::{self, AppConfig};
use morph::dashboard::{self, DashboardState};
use morph::engine::ledger::Ledger;
use morph::engine::scheduler::Scheduler;
use morph::notify::{LogNotifier, Notifier, TelegramNotifier};
use morph::storage::JsonFileStorage;

const BANNER: &str = r#"
 __  __  ___  ____  ____  _   _
|  \/  |/ _ \|  _ \|  _ \| | | |
| |\/| | | | | |_) | |_) | |_| |
| |  | | |_| |  _ <|  __/|  _  |
|_|  |_|\___/|_| \_\_|   |_| |_|

  Yield accrual & allocation engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_or_default("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        compound_interval_secs = cfg.scheduler.compound_interval_secs,
        notify_interval_secs = cfg.scheduler.notify_interval_secs,
        min_stake = %cfg.ledger.min_stake,
        max_stake = %cfg.ledger.max_stake,
        threshold = %cfg.ledger.reallocation_threshold,
        "MORPH starting up"
    );

    // -- Restore or create state -----------------------------------------

    let storage = Arc::new(
        JsonFileStorage::new(&cfg.storage.data_dir).context("Failed to open data directory")?,
    );
    let ledger = Arc::new(
        Ledger::open(cfg.ledger.clone(), storage, cfg.initial_sources())
            .await
            .context("Failed to open ledger")?,
    );

    let stats = ledger.get_statistics().await;
    info!(
        users = stats.total_users,
        staked = %stats.total_staked,
        earned = %stats.total_earned,
        active_sources = stats.active_sources,
        "Ledger ready"
    );
    for problem in ledger.check_integrity().await {
        warn!(problem = %problem, "Integrity check");
    }

    // -- Components ------------------------------------------------------

    let notifier = build_notifier(&cfg);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&ledger),
        notifier,
        cfg.scheduler.clone(),
    ));

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(Arc::clone(&ledger), scheduler.history()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    // -- Main loop -------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
    };
    Arc::clone(&scheduler).run(shutdown).await;

    // Save final state
    ledger.flush().await.context("Final flush failed")?;
    let stats = ledger.get_statistics().await;
    info!(
        users = stats.total_users,
        staked = %stats.total_staked,
        earned = %stats.total_earned,
        cycles = ledger.cycles_run(),
        "MORPH shut down cleanly."
    );

    Ok(())
}

/// Telegram when a bot token is configured and present, otherwise logs.
fn build_notifier(cfg: &AppConfig) -> Arc<dyn Notifier> {
    let token = cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .map(config::AppConfig::resolve_env);

    match token {
        Some(Ok(token)) => match TelegramNotifier::new(SecretString::new(token)) {
            Ok(telegram) => {
                info!("Using Telegram notifier");
                return Arc::new(telegram);
            }
            Err(e) => warn!(error = %e, "Telegram notifier unavailable, falling back to log"),
        },
        Some(Err(e)) => warn!(error = %e, "Telegram token not resolved, falling back to log"),
        None => info!("No notifier configured, logging notifications"),
    }
    Arc::new(LogNotifier)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("morph=info"));

    let json_logging = std::env::var("MORPH_LOG_JSON").is_ok();

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
