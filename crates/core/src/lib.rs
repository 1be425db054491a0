pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod lifecycle;

pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use cpq::inventory::{
    InventoryThresholds, LowStockAlert, StockAvailability, StockRequirement, StockShortfall,
};
pub use cpq::pricing::{compute_totals, PricingLine, QuoteTotals};
pub use domain::client::{Client, ClientId};
pub use domain::product::{Product, ProductId};
pub use domain::quote::{
    LineRequest, Quote, QuoteDraft, QuoteId, QuoteLine, QuoteNumber, QuoteStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, ReferenceKind};
pub use lifecycle::{LifecycleAction, LifecycleEngine, TransitionOutcome};
