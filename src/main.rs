use anyhow::{Context, Result};
use sportsbook_arbitrage_bot::{
    config::EngineConfig,
    engine::ArbitrageEngine,
    exposure_ledger::{BankrollSnapshot, ExposureLedger},
    paper_executor::PaperExecutor,
    quote_book::QuoteBatch,
    wager_log::WagerLog,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Sportsbook Arbitrage Bot");

    let config = EngineConfig::load().context("Failed to load configuration")?;
    if config.dry_run {
        warn!("⚠️ Dry run enabled - intents are journalled and cancelled, nothing is executed");
    }

    let snapshot = if config.bankroll_path.exists() {
        BankrollSnapshot::load(&config.bankroll_path).with_context(|| {
            format!("Failed to read bankroll from {}", config.bankroll_path.display())
        })?
    } else {
        warn!(
            "⚠️ No bankroll file at {} - starting from ${:.2}",
            config.bankroll_path.display(),
            config.initial_bankroll
        );
        BankrollSnapshot::new(config.initial_bankroll)
    };
    let ledger = Arc::new(ExposureLedger::from_snapshot(snapshot));

    let wager_log = WagerLog::open(&config.wager_log_path)
        .with_context(|| format!("Failed to open wager log {}", config.wager_log_path.display()))?;

    let engine = Arc::new(
        ArbitrageEngine::new(config.clone(), ledger.clone())
            .with_wager_log(wager_log)
            .with_bankroll_file(config.bankroll_path.clone()),
    );

    // Paper executor answers every intent on the signal channel
    let (intent_tx, intent_rx) = mpsc::channel(64);
    let (signal_tx, signal_rx) = mpsc::channel(64);
    let executor = tokio::spawn(PaperExecutor::new().run(intent_rx, signal_tx));

    // Quotes are dropped into a JSON file by the scrapers
    let fetch_quotes = {
        let path = config.quote_feed_path.clone();
        move || {
            let path = path.clone();
            async move {
                match QuoteBatch::load(&path) {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!("Error reading quotes from {}: {}", path.display(), e);
                        QuoteBatch::default()
                    }
                }
            }
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    engine.run(fetch_quotes, intent_tx, signal_rx, shutdown).await?;
    executor.abort();

    let view = ledger.view();
    info!(
        "💰 Final bankroll: ${:.2} (${:.2} committed, {} intents in flight)",
        view.bankroll, view.total_committed, view.in_flight
    );
    Ok(())
}
