//! ServerPulse - game server status monitor
//!
//! Polls public status APIs, records availability samples, rolls them up
//! over a civil calendar and notifies channels on status changes.

mod civil;
mod config;
mod db;
mod notify;
mod probe;
mod query;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use notify::channels::ChannelContext;
use notify::{build_channels, DedupeStore, MemoryDedupeStore, Notifier};
use query::QueryFacade;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("serverpulse=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    tracing::info!("Starting ServerPulse for {} on port {}...", cfg.server_name, cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let clock = cfg.civil_clock();
    tracing::info!("Civil calendar offset: {} minutes", clock.offset_minutes());
    let query = Arc::new(QueryFacade::new(
        store.clone(),
        clock,
        cfg.sample_query_limit,
        Duration::from_secs(cfg.stale_after_secs),
    ));

    let notifier = if cfg.notifications_enabled {
        let ctx = ChannelContext {
            server_name: cfg.server_name.clone(),
            clock,
        };
        let channels = build_channels(&cfg.channels, &ctx)?;
        let dedupe: Arc<dyn DedupeStore> = if cfg.persist_dedupe_state {
            store.clone()
        } else {
            Arc::new(MemoryDedupeStore::new())
        };
        let notifier = Notifier::new(channels, dedupe, cfg.notifier_config());
        tracing::info!("Notifications enabled on {} channel(s)", notifier.channel_count());
        Some(Arc::new(notifier))
    } else {
        tracing::info!("Notifications disabled");
        None
    };

    // Start scheduler
    let scheduler = Scheduler::new(cfg.clone(), store, query.clone(), notifier);
    scheduler.start().await?;

    // Serve until Ctrl-C, then let in-flight ticks finish
    let server = Server::new(cfg, query);
    server.start(shutdown_signal()).await?;
    scheduler.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
