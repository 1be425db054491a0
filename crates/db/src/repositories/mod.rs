use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use cotiza_core::audit::AuditEvent;
use cotiza_core::domain::client::{Client, ClientId};
use cotiza_core::domain::product::{Product, ProductId};
use cotiza_core::domain::quote::{QuoteId, QuoteStatus};
use cotiza_core::errors::ApplicationError;

pub mod audit;
pub mod client;
pub mod product;
pub mod quote;

pub use audit::SqlAuditEventRepository;
pub use client::SqlClientRepository;
pub use product::SqlProductRepository;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(error) => {
                error.as_database_error().is_some_and(|db| db.is_unique_violation())
            }
            Self::Decode(_) => false,
        }
    }

    /// SQLITE_BUSY and its extended codes: another writer won the lock.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Database(error) => error
                .as_database_error()
                .and_then(|db| db.code())
                .is_some_and(|code| code == "5" || code == "517" || code == "261"),
            Self::Decode(_) => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError>;
    async fn save(&self, client: Client) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError>;
}

#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    async fn list_for_quote(&self, quote_id: &QuoteId)
        -> Result<Vec<AuditEvent>, RepositoryError>;
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value.trim()).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal for `{column}`: `{value}` ({error})"))
    })
}

/// Stored text keeps at least two decimal places: `16` is written as `16.00`.
pub(crate) fn format_decimal(value: Decimal) -> String {
    let mut value = value;
    if value.scale() < 2 {
        value.rescale(2);
    }
    value.to_string()
}

pub(crate) fn parse_date(column: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date for `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!(
                "invalid timestamp for `{column}`: `{value}` ({error})"
            ))
        })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_status(value: i64) -> Result<QuoteStatus, RepositoryError> {
    u8::try_from(value)
        .ok()
        .and_then(QuoteStatus::from_code)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status code `{value}`")))
}
