use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::product::ProductId;
use crate::domain::quote::QuoteLine;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryThresholds {
    /// Post-approval stock at or below this level raises a low-stock alert.
    pub low_stock: i64,
    /// Projected stock at or below this level is flagged in availability previews.
    pub stock_warning: i64,
}

impl Default for InventoryThresholds {
    fn default() -> Self {
        Self { low_stock: 5, stock_warning: 10 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: ProductId,
    pub product_name: String,
    pub required: i64,
    pub available: i64,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: required {}, available {}",
            self.product_name, self.required, self.available
        )
    }
}

/// Quantity a quote needs from one product, paired with the stock on hand.
/// `available == None` means the product does not track inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequirement {
    pub product_id: ProductId,
    pub product_name: String,
    pub required: i64,
    pub available: Option<i64>,
}

impl StockRequirement {
    pub fn with_available(mut self, available: Option<i64>) -> Self {
        self.available = available;
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.available.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Deduct,
    Restore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub kind: MovementKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub product_name: String,
    pub remaining: i64,
    pub threshold: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    Untracked,
    Sufficient,
    Warning,
    Insufficient,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    pub product_id: ProductId,
    pub product_name: String,
    pub required: i64,
    pub available: Option<i64>,
    pub remaining: Option<i64>,
    pub state: AvailabilityState,
}

/// Folds quote lines into one requirement per product, in first-seen order.
/// Two lines for the same product must be satisfied together.
pub fn aggregate_requirements(lines: &[QuoteLine]) -> Vec<StockRequirement> {
    let mut requirements: Vec<StockRequirement> = Vec::new();
    for line in lines {
        let quantity = i64::from(line.quantity);
        match requirements.iter_mut().find(|entry| entry.product_id == line.product_id) {
            Some(existing) => existing.required += quantity,
            None => requirements.push(StockRequirement {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                required: quantity,
                available: None,
            }),
        }
    }
    requirements
}

/// Validates the whole batch before any write. Every tracked product short on
/// stock is reported; untracked products never block.
pub fn plan_deduction(
    requirements: &[StockRequirement],
) -> Result<Vec<StockMovement>, DomainError> {
    let shortfalls: Vec<StockShortfall> = requirements
        .iter()
        .filter_map(|requirement| match requirement.available {
            Some(available) if available < requirement.required => Some(StockShortfall {
                product_id: requirement.product_id.clone(),
                product_name: requirement.product_name.clone(),
                required: requirement.required,
                available,
            }),
            _ => None,
        })
        .collect();

    if !shortfalls.is_empty() {
        return Err(DomainError::InsufficientStock { shortfalls });
    }

    Ok(requirements
        .iter()
        .filter(|requirement| requirement.is_tracked())
        .map(|requirement| StockMovement {
            product_id: requirement.product_id.clone(),
            product_name: requirement.product_name.clone(),
            quantity: requirement.required,
            kind: MovementKind::Deduct,
        })
        .collect())
}

/// Restoration gives back exactly what the approval deducted, whatever the
/// products' tracking looks like now.
pub fn plan_restore(deductions: &[StockMovement]) -> Vec<StockMovement> {
    deductions
        .iter()
        .filter(|movement| movement.kind == MovementKind::Deduct)
        .map(|movement| StockMovement { kind: MovementKind::Restore, ..movement.clone() })
        .collect()
}

/// `requirements` must carry the stock read after the approval committed.
pub fn low_stock_alerts(
    requirements: &[StockRequirement],
    thresholds: &InventoryThresholds,
) -> Vec<LowStockAlert> {
    requirements
        .iter()
        .filter_map(|requirement| {
            let remaining = requirement.available?;
            (remaining <= thresholds.low_stock).then(|| LowStockAlert {
                product_id: requirement.product_id.clone(),
                product_name: requirement.product_name.clone(),
                remaining,
                threshold: thresholds.low_stock,
            })
        })
        .collect()
}

pub fn availability(
    requirements: &[StockRequirement],
    thresholds: &InventoryThresholds,
) -> Vec<StockAvailability> {
    requirements
        .iter()
        .map(|requirement| {
            let remaining =
                requirement.available.map(|available| available - requirement.required);
            let state = match remaining {
                None => AvailabilityState::Untracked,
                Some(left) if left < 0 => AvailabilityState::Insufficient,
                Some(left) if left <= thresholds.stock_warning => AvailabilityState::Warning,
                Some(_) => AvailabilityState::Sufficient,
            };
            StockAvailability {
                product_id: requirement.product_id.clone(),
                product_name: requirement.product_name.clone(),
                required: requirement.required,
                available: requirement.available,
                remaining,
                state,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        aggregate_requirements, availability, low_stock_alerts, plan_deduction, plan_restore,
        AvailabilityState, InventoryThresholds, MovementKind, StockRequirement,
    };
    use crate::domain::product::ProductId;
    use crate::domain::quote::QuoteLine;
    use crate::errors::DomainError;

    fn quote_line(line_number: u32, product: &str, quantity: u32) -> QuoteLine {
        QuoteLine {
            line_number,
            product_id: ProductId(product.to_owned()),
            product_name: format!("{product} name"),
            quantity,
            unit_price: Decimal::TEN,
            discount_percent: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            line_subtotal: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            line_total: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            line_total_with_tax: Decimal::ZERO,
        }
    }

    fn requirement(product: &str, required: i64, available: Option<i64>) -> StockRequirement {
        StockRequirement {
            product_id: ProductId(product.to_owned()),
            product_name: product.to_owned(),
            required,
            available,
        }
    }

    #[test]
    fn aggregates_quantities_per_product_in_line_order() {
        let lines =
            [quote_line(1, "prod-b", 2), quote_line(2, "prod-a", 1), quote_line(3, "prod-b", 4)];

        let requirements = aggregate_requirements(&lines);

        assert_eq!(requirements.len(), 2);
        assert_eq!(requirements[0].product_id.0, "prod-b");
        assert_eq!(requirements[0].required, 6);
        assert_eq!(requirements[1].product_id.0, "prod-a");
        assert_eq!(requirements[1].required, 1);
    }

    #[test]
    fn stock_floor_reports_required_and_available() {
        let error = plan_deduction(&[requirement("Widget", 6, Some(5))]).expect_err("short");

        match error {
            DomainError::InsufficientStock { shortfalls } => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].required, 6);
                assert_eq!(shortfalls[0].available, 5);
                assert_eq!(shortfalls[0].to_string(), "Widget: required 6, available 5");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn batch_validation_reports_every_shortfall() {
        let error = plan_deduction(&[
            requirement("a", 3, Some(1)),
            requirement("b", 1, Some(10)),
            requirement("c", 2, Some(0)),
        ])
        .expect_err("two products short");

        let DomainError::InsufficientStock { shortfalls } = error else {
            panic!("expected insufficient stock");
        };
        let names: Vec<_> = shortfalls.iter().map(|entry| entry.product_name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn untracked_products_never_block_or_move() {
        let movements =
            plan_deduction(&[requirement("service", 1_000, None), requirement("box", 2, Some(2))])
                .expect("untracked product is always sufficient");

        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].product_id.0, "box");
        assert_eq!(movements[0].quantity, 2);
        assert_eq!(movements[0].kind, MovementKind::Deduct);
    }

    #[test]
    fn restore_mirrors_recorded_deductions() {
        let deductions = plan_deduction(&[
            requirement("box", 4, Some(4)),
            requirement("service", 1_000, None),
            requirement("tape", 1, Some(99)),
        ])
        .expect("enough stock");

        let restores = plan_restore(&deductions);

        let products: Vec<_> = restores.iter().map(|entry| entry.product_id.0.as_str()).collect();
        assert_eq!(products, ["box", "tape"]);
        assert_eq!(restores.iter().map(|entry| entry.quantity).collect::<Vec<_>>(), [4, 1]);
        assert!(restores.iter().all(|entry| entry.kind == MovementKind::Restore));
        assert!(plan_restore(&restores).is_empty());
    }

    #[test]
    fn low_stock_alerts_use_threshold_inclusively() {
        let thresholds = InventoryThresholds { low_stock: 5, stock_warning: 10 };
        let alerts = low_stock_alerts(
            &[
                requirement("at", 1, Some(5)),
                requirement("above", 1, Some(6)),
                requirement("untracked", 1, None),
                requirement("empty", 1, Some(0)),
            ],
            &thresholds,
        );

        let names: Vec<_> = alerts.iter().map(|alert| alert.product_name.as_str()).collect();
        assert_eq!(names, ["at", "empty"]);
        assert!(alerts.iter().all(|alert| alert.threshold == 5));
    }

    #[test]
    fn availability_preview_classifies_each_product() {
        let thresholds = InventoryThresholds { low_stock: 2, stock_warning: 5 };
        let preview = availability(
            &[
                requirement("plenty", 1, Some(100)),
                requirement("tight", 5, Some(8)),
                requirement("short", 9, Some(8)),
                requirement("service", 3, None),
            ],
            &thresholds,
        );

        let states: Vec<_> = preview.iter().map(|entry| entry.state).collect();
        assert_eq!(
            states,
            [
                AvailabilityState::Sufficient,
                AvailabilityState::Warning,
                AvailabilityState::Insufficient,
                AvailabilityState::Untracked,
            ]
        );
        assert_eq!(preview[1].remaining, Some(3));
        assert_eq!(preview[3].remaining, None);
    }
}
