use cotiza_core::config::{AppConfig, ConfigError, LoadOptions};
use cotiza_db::connection::connect_with_config;
use cotiza_db::{migrations, DbPool, QuoteService, ServiceSettings};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: QuoteService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        quote_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        quote_id = "unknown",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        quote_id = "unknown",
        "database migrations applied"
    );

    let settings = ServiceSettings::from_config(&config);
    info!(
        event_name = "system.bootstrap.service_ready",
        correlation_id = "bootstrap",
        quote_id = "unknown",
        low_stock_threshold = settings.thresholds.low_stock,
        stock_warning_threshold = settings.thresholds.stock_warning,
        statement_timeout_ms = settings.statement_timeout.as_millis() as u64,
        "quote service configured"
    );
    let service = QuoteService::new(db_pool.clone(), settings);

    Ok(Application { config, db_pool, service })
}
