//! Pricing and stock reconciliation. Both halves are pure: persistence and
//! transactions live in `cotiza-db`.

pub mod inventory;
pub mod pricing;

pub use inventory::{
    InventoryThresholds, LowStockAlert, StockAvailability, StockMovement, StockRequirement,
    StockShortfall,
};
pub use pricing::{PricingEngine, PricingLine, ProportionalPricingEngine, QuoteTotals};
