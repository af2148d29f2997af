mod bot;
mod config;
mod entities;
mod error;
mod faucet;
mod http;
mod identity;
mod ledger;
mod models;
mod rpc;
mod state;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bot::CommandDispatcher;
use crate::config::FaucetBotConfig;
use crate::faucet::LedgerFacts;
use crate::faucet::orchestrator::ClaimOrchestrator;
use crate::faucet::reconciler::PayoutReconciler;
use crate::faucet::reporter::AdminStatsReporter;
use crate::ledger::ClaimLedger;
use crate::rpc::{XrplClient, XrplPayoutSubmitter};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = FaucetBotConfig::load();
    init_tracing(loaded.as_ref().is_ok_and(|config| config.logging.json));
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Faucet bot cannot start: {err:#}");
            return Err(err.context("Failed to load configuration"));
        }
    };

    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let policy = config.policy().context("Invalid faucet policy")?;
    let client = XrplClient::new(
        &config.ledger.rpc_url,
        config.ledger.request_timeout(),
        config.ledger.retry_policy(),
    )
    .context("Failed to initialize XRPL client")?;
    let seed = config
        .faucet
        .hot_wallet_seed
        .as_ref()
        .map(|seed| SecretString::from(seed.expose_secret().to_string()))
        .context("faucet.hot_wallet_seed is not configured")?;
    let submitter = XrplPayoutSubmitter::new(
        client.clone(),
        policy.hot_wallet.clone(),
        seed,
        config.ledger.payout_timing(),
    );

    let facts: Arc<dyn LedgerFacts> = Arc::new(client);
    let ledger = Arc::new(ClaimLedger::new(database.clone(), policy.cooldown));
    info!(
        hot_wallet = %policy.hot_wallet,
        currency = %policy.asset.currency,
        amount = %policy.claim_amount,
        cooldown_hours = config.faucet.cooldown_hours,
        "Faucet configured"
    );
    let orchestrator = Arc::new(ClaimOrchestrator::new(
        ledger,
        Arc::clone(&facts),
        Arc::new(submitter),
        policy,
    ));
    if config.faucet.admin_users.is_empty() {
        warn!("No faucet admins configured; admin commands are disabled");
    }
    let reporter = Arc::new(AdminStatsReporter::new(
        Arc::clone(&orchestrator),
        Arc::clone(&facts),
        &config.faucet.admin_users,
        config.faucet.balance_cache_ttl(),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        config.bot.command_prefix.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&reporter),
        facts,
    ));
    if config.bot.bridge_token.is_none() {
        warn!("bot.bridge_token is not set; /bot/command is disabled");
    }
    let bridge_token = config
        .bot
        .bridge_token
        .as_ref()
        .map(|token| SecretString::from(token.expose_secret().to_string()));
    let app_state = AppState::new(
        database.clone(),
        Arc::clone(&orchestrator),
        reporter,
        dispatcher,
        bridge_token,
    );

    let reconciler = PayoutReconciler::new(
        Arc::clone(&orchestrator),
        config.faucet.reconcile_interval(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler_handle = tokio::spawn(async move {
        if let Err(err) = reconciler.run(shutdown_rx).await {
            error!("Payout reconciler terminated with error: {err}");
        }
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("TextRP faucet bot listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = reconciler_handle.await {
        error!("Reconciler task join error: {join_err}");
    }
    info!("Faucet bot stopped");

    Ok(())
}

fn init_tracing(json: bool) {
    let default_filter = "info,sqlx=warn";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn connect_database(config: &FaucetBotConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    assert!(
        config.database.max_connections >= config.database.min_connections.unwrap_or(1),
        "Max connections must be >= min connections"
    );
    assert!(
        config.database.max_connections <= 128,
        "Connection pool oversized"
    );

    Database::connect(options)
        .await
        .context("Failed to connect to the claim database")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
