use std::time::Duration;

use cotiza_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

const BUSY_TIMEOUT_MS: u64 = 5_000;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Every connection enforces foreign keys (line cascade) and waits on a busy
/// writer instead of failing immediately.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");
    // Each in-memory connection is a separate database.
    let max_connections = if in_memory { 1 } else { max_connections.max(1) };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&sqlite_url_with_create(database_url))
        .await
}

/// File databases are created on first use so `cotiza migrate` works on a
/// fresh checkout.
fn sqlite_url_with_create(database_url: &str) -> String {
    let is_file = database_url.starts_with("sqlite://") && !database_url.contains(":memory:");
    if is_file && !database_url.contains("mode=") {
        let separator = if database_url.contains('?') { '&' } else { '?' };
        format!("{database_url}{separator}mode=rwc")
    } else {
        database_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use cotiza_core::config::AppConfig;
    use sqlx::Row;

    use super::{connect_with_config, sqlite_url_with_create};

    #[test]
    fn file_urls_are_opened_in_create_mode() {
        assert_eq!(sqlite_url_with_create("sqlite://cotiza.db"), "sqlite://cotiza.db?mode=rwc");
        assert_eq!(
            sqlite_url_with_create("sqlite://cotiza.db?cache=shared"),
            "sqlite://cotiza.db?cache=shared&mode=rwc"
        );
        assert_eq!(
            sqlite_url_with_create("sqlite://cotiza.db?mode=ro"),
            "sqlite://cotiza.db?mode=ro"
        );
        assert_eq!(sqlite_url_with_create("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let mut config = AppConfig::default().database;
        config.url = "sqlite::memory:".to_string();
        let pool = connect_with_config(&config).await.expect("connect");

        let enabled = sqlx::query("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("read pragma")
            .get::<i64, _>(0);

        assert_eq!(enabled, 1);
        assert_eq!(pool.options().get_max_connections(), 1);
    }
}
