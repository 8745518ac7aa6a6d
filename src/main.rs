use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

mod bot;
mod config;
mod dashboard;
mod db;
mod error;
mod exchange;
mod gateway;
mod live_scores;
mod stakes;

use bot::clock::SystemClock;
use bot::BotEngine;
use config::Config;
use dashboard::AppState;
use db::Database;
use exchange::ExchangeClient;
use live_scores::HttpMatchFeed;
use stakes::StakeTable;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    if config.dry_run {
        info!(
            "🟡 DRY RUN mode – no real bets will be placed (paper balance: {:.2})",
            config.initial_balance
        );
    } else {
        info!("🔴 LIVE mode – real lay bets WILL be placed on the exchange");
    }

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let stakes = Arc::new(StakeTable::load(&config.stake_table_path)?);

    let feed = Arc::new(HttpMatchFeed::new(
        &config.feed_api_url,
        config.feed_api_key.as_deref(),
    )?);
    let initial_balance = Decimal::try_from(config.initial_balance)
        .context("initial_balance is not representable as a decimal")?;
    let exchange = Arc::new(ExchangeClient::new(
        &config.exchange_api_url,
        config.exchange_api_key.clone(),
        config.dry_run,
        initial_balance,
    )?);

    let mut engine = BotEngine::new(
        config.engine_settings(),
        feed,
        exchange,
        stakes,
        Arc::new(SystemClock),
    );

    // Dashboard reads registry snapshots published after each cycle
    let (status_tx, status_rx) = tokio::sync::watch::channel(Vec::new());
    let app = dashboard::router(AppState {
        db: db.clone(),
        dry_run: config.dry_run,
        statuses: status_rx,
    });
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("Dashboard listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Dashboard server stopped: {}", e);
        }
    });

    // Main loop: one cycle at a time, sleeping for whatever cadence the
    // engine asks for next.
    loop {
        for event in engine.run_cycle().await {
            if let Err(e) = db.record_event(&event) {
                error!("Failed to record event: {}", e);
            }
        }
        if status_tx.send(engine.statuses()).is_err() {
            warn!("Dashboard status channel closed");
        }

        tokio::select! {
            _ = tokio::time::sleep(engine.next_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
