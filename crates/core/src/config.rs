use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::inventory::InventoryThresholds;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["cotiza.toml", "config/cotiza.toml"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub inventory: InventoryConfig,
    pub quotes: QuotesConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    /// Upper bound for one service operation, transaction included.
    pub statement_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// 0 disables the periodic expiration sweep.
    pub expiration_sweep_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryConfig {
    pub low_stock_threshold: i64,
    pub stock_warning_threshold: i64,
}

impl InventoryConfig {
    pub fn thresholds(&self) -> InventoryThresholds {
        InventoryThresholds {
            low_stock: self.low_stock_threshold,
            stock_warning: self.stock_warning_threshold,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotesConfig {
    pub default_validity_days: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cotiza.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                statement_timeout_secs: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                expiration_sweep_secs: 3600,
            },
            inventory: InventoryConfig { low_stock_threshold: 5, stock_warning_threshold: 10 },
            quotes: QuotesConfig { default_validity_days: 30 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(statement_timeout_secs) = database.statement_timeout_secs {
                self.database.statement_timeout_secs = statement_timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(expiration_sweep_secs) = server.expiration_sweep_secs {
                self.server.expiration_sweep_secs = expiration_sweep_secs;
            }
        }

        if let Some(inventory) = patch.inventory {
            if let Some(low_stock_threshold) = inventory.low_stock_threshold {
                self.inventory.low_stock_threshold = low_stock_threshold;
            }
            if let Some(stock_warning_threshold) = inventory.stock_warning_threshold {
                self.inventory.stock_warning_threshold = stock_warning_threshold;
            }
        }

        if let Some(quotes) = patch.quotes {
            if let Some(default_validity_days) = quotes.default_validity_days {
                self.quotes.default_validity_days = default_validity_days;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COTIZA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COTIZA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("COTIZA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("COTIZA_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_DATABASE_STATEMENT_TIMEOUT_SECS") {
            self.database.statement_timeout_secs =
                parse_env("COTIZA_DATABASE_STATEMENT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COTIZA_SERVER_PORT") {
            self.server.port = parse_env("COTIZA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COTIZA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("COTIZA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_SERVER_EXPIRATION_SWEEP_SECS") {
            self.server.expiration_sweep_secs =
                parse_env("COTIZA_SERVER_EXPIRATION_SWEEP_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZA_INVENTORY_LOW_STOCK_THRESHOLD") {
            self.inventory.low_stock_threshold =
                parse_env("COTIZA_INVENTORY_LOW_STOCK_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD") {
            self.inventory.stock_warning_threshold =
                parse_env("COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("COTIZA_QUOTES_DEFAULT_VALIDITY_DAYS") {
            self.quotes.default_validity_days =
                parse_env("COTIZA_QUOTES_DEFAULT_VALIDITY_DAYS", &value)?;
        }

        let log_level = read_env("COTIZA_LOGGING_LEVEL").or_else(|| read_env("COTIZA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COTIZA_LOGGING_FORMAT").or_else(|| read_env("COTIZA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(low_stock_threshold) = overrides.low_stock_threshold {
            self.inventory.low_stock_threshold = low_stock_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_inventory(&self.inventory)?;
        validate_quotes(&self.quotes)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if database.statement_timeout_secs == 0 || database.statement_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.statement_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_inventory(inventory: &InventoryConfig) -> Result<(), ConfigError> {
    if inventory.low_stock_threshold < 0 {
        return Err(ConfigError::Validation(
            "inventory.low_stock_threshold cannot be negative".to_string(),
        ));
    }

    if inventory.stock_warning_threshold < inventory.low_stock_threshold {
        return Err(ConfigError::Validation(format!(
            "inventory.stock_warning_threshold ({}) must be at least inventory.low_stock_threshold ({})",
            inventory.stock_warning_threshold, inventory.low_stock_threshold
        )));
    }

    Ok(())
}

fn validate_quotes(quotes: &QuotesConfig) -> Result<(), ConfigError> {
    if quotes.default_validity_days == 0 || quotes.default_validity_days > 365 {
        return Err(ConfigError::Validation(
            "quotes.default_validity_days must be in range 1..=365".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    inventory: Option<InventoryPatch>,
    quotes: Option<QuotesPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    statement_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    expiration_sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct InventoryPatch {
    low_stock_threshold: Option<i64>,
    stock_warning_threshold: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotesPatch {
    default_validity_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_a_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.database.url == "sqlite://cotiza.db", "default database url")?;
        ensure(
            config.database.statement_timeout() == Duration::from_secs(10),
            "default statement timeout is ten seconds",
        )?;
        ensure(config.inventory.thresholds().low_stock == 5, "default low stock threshold")?;
        ensure(config.inventory.thresholds().stock_warning == 10, "default warning threshold")?;
        ensure(config.quotes.default_validity_days == 30, "default validity window")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COTIZA_DB_PATH", "/var/lib/cotiza/data.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cotiza.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_COTIZA_DB_PATH}"

[inventory]
low_stock_threshold = 3
stock_warning_threshold = 12
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/cotiza/data.db",
                "database url should be interpolated from the environment",
            )?;
            ensure(config.inventory.low_stock_threshold == 3, "file threshold should apply")?;
            ensure(config.inventory.stock_warning_threshold == 12, "file warning should apply")?;
            Ok(())
        })();

        clear_vars(&["TEST_COTIZA_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("cotiza.toml");
        fs::write(&path, "[database]\nurl = \"${COTIZA_TEST_NEVER_SET}\"\n")
            .map_err(|err| err.to_string())?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "COTIZA_TEST_NEVER_SET", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected interpolation failure".to_string()),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_LOG_LEVEL", "warn");
        env::set_var("COTIZA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["COTIZA_LOG_LEVEL", "COTIZA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("COTIZA_SERVER_PORT", "9090");
        env::set_var("COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD", "40");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cotiza.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"
statement_timeout_secs = 4

[server]
port = 7070

[inventory]
stock_warning_threshold = 20

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9090, "env port should win over file")?;
            ensure(
                config.inventory.stock_warning_threshold == 40,
                "env warning threshold should win over file",
            )?;
            ensure(config.database.statement_timeout_secs == 4, "file value beats default")?;
            Ok(())
        })();

        clear_vars(&[
            "COTIZA_DATABASE_URL",
            "COTIZA_SERVER_PORT",
            "COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD",
        ]);
        result
    }

    #[test]
    fn invalid_env_number_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_INVENTORY_LOW_STOCK_THRESHOLD", "plenty");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "COTIZA_INVENTORY_LOW_STOCK_THRESHOLD",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override".to_string()),
        };

        clear_vars(&["COTIZA_INVENTORY_LOW_STOCK_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_INVENTORY_LOW_STOCK_THRESHOLD", "50");
        env::set_var("COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD", "10");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("inventory.stock_warning_threshold")
            );
            ensure(has_message, "validation failure should mention the warning threshold")
        })();

        clear_vars(&[
            "COTIZA_INVENTORY_LOW_STOCK_THRESHOLD",
            "COTIZA_INVENTORY_STOCK_WARNING_THRESHOLD",
        ]);
        result
    }

    #[test]
    fn non_sqlite_url_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/cotiza".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(
                result,
                Err(ConfigError::Validation(ref message)) if message.contains("database.url")
            ),
            "postgres urls are not supported",
        )
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");

        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(ref path)) if *path == missing),
            "missing required file should be reported with its path",
        )
    }
}
