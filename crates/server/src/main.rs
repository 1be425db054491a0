mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use cotiza_core::audit::AuditContext;
use cotiza_core::config::{AppConfig, LoadOptions};
use cotiza_db::QuoteService;
use tokio::sync::watch;
use tracing::{error, info, warn};

fn init_logging(config: &AppConfig) {
    use cotiza_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so load first and hand the same config to bootstrap.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = match app.config.server.expiration_sweep_secs {
        0 => None,
        secs => Some(tokio::spawn(sweep_expired(
            app.service.clone(),
            Duration::from_secs(secs),
            shutdown_rx.clone(),
        ))),
    };

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = health::router(app.db_pool.clone()).merge(api::router(app.service.clone()));

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        quote_id = "unknown",
        bind_address = %address,
        "cotiza-server listening"
    );

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    wait_for_shutdown().await?;
    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        quote_id = "unknown",
        "cotiza-server stopping"
    );
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            error!(
                event_name = "system.server.error",
                correlation_id = "shutdown",
                quote_id = "unknown",
                error = %error,
                "http server terminated with an error"
            );
        }
        Ok(Err(error)) => {
            error!(
                event_name = "system.server.error",
                correlation_id = "shutdown",
                quote_id = "unknown",
                error = %error,
                "http server task panicked"
            );
        }
        Err(_) => {
            warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                quote_id = "unknown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish before the shutdown deadline"
            );
        }
    }

    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    app.db_pool.close().await;

    Ok(())
}

/// Periodically moves lapsed draft and sent quotes to expired until shutdown
/// is signalled.
async fn sweep_expired(
    service: QuoteService,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopping| *stopping) => break,
        }

        let audit = AuditContext::system("expiration-sweeper");
        if let Err(error) = service.mark_expired_quotes(&audit).await {
            warn!(
                event_name = "system.expiration.sweep_failed",
                correlation_id = %audit.correlation_id,
                quote_id = "unknown",
                error = %error,
                "scheduled expiration sweep failed"
            );
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
