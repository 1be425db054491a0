pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod quote_service;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedResult, VerificationResult};
pub use quote_service::{
    QuoteDetail, QuoteService, QuoteSummary, ServiceSettings, StatusChange,
};
