use std::env;
use std::fs;
use std::path::Path;

use crate::commands::{exit_code, CommandResult};
use cotiza_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                exit_code::CONFIG,
            );
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys, value) in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn effective_values(config: &AppConfig) -> Vec<ConfigEntry> {
    vec![
        entry("database.url", &["COTIZA_DATABASE_URL"], config.database.url.clone()),
        entry(
            "database.max_connections",
            &["COTIZA_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            &["COTIZA_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        entry(
            "database.statement_timeout_secs",
            &["COTIZA_DATABASE_STATEMENT_TIMEOUT_SECS"],
            config.database.statement_timeout_secs.to_string(),
        ),
        entry(
            "server.bind_address",
            &["COTIZA_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        entry("server.port", &["COTIZA_SERVER_PORT"], config.server.port.to_string()),
        entry(
            "server.graceful_shutdown_secs",
            &["COTIZA_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry(
            "server.expiration_sweep_secs",
            &["COTIZA_SERVER_EXPIRATION_SWEEP_SECS"],
            config.server.expiration_sweep_secs.to_string(),
        ),
        entry(
            "inventory.low_stock_threshold",
            &["COTIZA_INVENTORY_LOW_STOCK_THRESHOLD"],
            config.inventory.low_stock_threshold.to_string(),
        ),
        entry(
            "inventory.stock_warning_threshold",
            &["COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD"],
            config.inventory.stock_warning_threshold.to_string(),
        ),
        entry(
            "quotes.default_validity_days",
            &["COTIZA_QUOTES_DEFAULT_VALIDITY_DAYS"],
            config.quotes.default_validity_days.to_string(),
        ),
        entry(
            "logging.level",
            &["COTIZA_LOGGING_LEVEL", "COTIZA_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        entry(
            "logging.format",
            &["COTIZA_LOGGING_FORMAT", "COTIZA_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

type ConfigEntry = (&'static str, &'static [&'static str], String);

fn entry(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> ConfigEntry {
    (key_path, env_keys, value)
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
