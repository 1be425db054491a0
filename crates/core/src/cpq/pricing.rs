use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Rounds a monetary figure to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn ensure_percent(field: &str, value: Decimal) -> Result<(), DomainError> {
    if value < Decimal::ZERO || value > HUNDRED {
        return Err(DomainError::validation(
            field,
            format!("percentage {value} must be between 0 and 100"),
        ));
    }
    Ok(())
}

/// A line ready for pricing: the tax rate has already been resolved from the
/// product directory (0 when the lookup failed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingLine {
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePricing {
    pub line_subtotal: Decimal,
    pub discount_amount: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
    pub line_total_with_tax: Decimal,
    /// Share of the global discount absorbed by this line.
    pub global_discount_share: Decimal,
    /// Tax on the line after its share of the global discount.
    pub adjusted_tax_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub subtotal: Decimal,
    pub line_discount_total: Decimal,
    pub global_discount_amount: Decimal,
    /// Line discounts plus the global discount, as displayed on the quote.
    pub discount_amount: Decimal,
    pub subtotal_after_line_discounts: Decimal,
    pub final_subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub lines: Vec<LinePricing>,
    pub trace: Vec<PricingTraceStep>,
}

pub trait PricingEngine: Send + Sync {
    fn compute_totals(
        &self,
        lines: &[PricingLine],
        global_discount_percent: Decimal,
    ) -> Result<QuoteTotals, DomainError>;
}

/// Redistributes the global discount across lines in proportion to their
/// post-line-discount totals before taxing, so each line is taxed on what the
/// customer actually pays for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProportionalPricingEngine;

impl PricingEngine for ProportionalPricingEngine {
    fn compute_totals(
        &self,
        lines: &[PricingLine],
        global_discount_percent: Decimal,
    ) -> Result<QuoteTotals, DomainError> {
        compute_totals(lines, global_discount_percent)
    }
}

struct RawLine {
    line_subtotal: Decimal,
    discount_amount: Decimal,
    line_total: Decimal,
    tax_amount: Decimal,
    tax_rate: Decimal,
}

pub fn compute_totals(
    lines: &[PricingLine],
    global_discount_percent: Decimal,
) -> Result<QuoteTotals, DomainError> {
    ensure_percent("discount_percent", global_discount_percent)?;

    let mut raw_lines = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        validate_line(index + 1, line)?;

        let line_subtotal = mul(Decimal::from(line.quantity), line.unit_price)?;
        let discount_amount = percent_of(line_subtotal, line.discount_percent)?;
        let line_total = sub(line_subtotal, discount_amount)?;
        let tax_amount = percent_of(line_total, line.tax_rate)?;
        raw_lines.push(RawLine {
            line_subtotal,
            discount_amount,
            line_total,
            tax_amount,
            tax_rate: line.tax_rate,
        });
    }

    let subtotal = sum(raw_lines.iter().map(|line| line.line_subtotal))?;
    let line_discount_total = sum(raw_lines.iter().map(|line| line.discount_amount))?;
    let tax_before_global = sum(raw_lines.iter().map(|line| line.tax_amount))?;

    let subtotal_after_line_discounts = sub(subtotal, line_discount_total)?;
    let global_discount_amount =
        percent_of(subtotal_after_line_discounts, global_discount_percent)?;
    let final_subtotal = sub(subtotal_after_line_discounts, global_discount_amount)?;

    let mut adjusted_tax = Decimal::ZERO;
    let mut priced_lines = Vec::with_capacity(raw_lines.len());
    for line in &raw_lines {
        let proportion = if subtotal_after_line_discounts.is_zero() {
            Decimal::ZERO
        } else {
            line.line_total.checked_div(subtotal_after_line_discounts).ok_or_else(out_of_range)?
        };
        let global_discount_share = mul(global_discount_amount, proportion)?;
        let line_total_after_global = sub(line.line_total, global_discount_share)?;
        let adjusted_line_tax = percent_of(line_total_after_global, line.tax_rate)?;
        adjusted_tax = add(adjusted_tax, adjusted_line_tax)?;

        priced_lines.push(LinePricing {
            line_subtotal: round_money(line.line_subtotal),
            discount_amount: round_money(line.discount_amount),
            line_total: round_money(line.line_total),
            tax_amount: round_money(line.tax_amount),
            line_total_with_tax: round_money(add(line.line_total, line.tax_amount)?),
            global_discount_share: round_money(global_discount_share),
            adjusted_tax_amount: round_money(adjusted_line_tax),
        });
    }

    let total = add(final_subtotal, adjusted_tax)?;
    let discount_amount = add(line_discount_total, global_discount_amount)?;

    let trace = vec![
        step("subtotal", "sum(quantity * unit_price)", subtotal),
        step("line_discounts", "sum(line_subtotal * line_discount / 100)", line_discount_total),
        step(
            "global_discount",
            format!("subtotal_after_line_discounts * {global_discount_percent} / 100"),
            global_discount_amount,
        ),
        step("tax_before_global_discount", "sum(line_total * tax_rate / 100)", tax_before_global),
        step(
            "adjusted_tax",
            "sum((line_total - global_discount * proportion) * tax_rate / 100)",
            adjusted_tax,
        ),
        step("total", "final_subtotal + adjusted_tax", total),
    ];

    Ok(QuoteTotals {
        subtotal: round_money(subtotal),
        line_discount_total: round_money(line_discount_total),
        global_discount_amount: round_money(global_discount_amount),
        discount_amount: round_money(discount_amount),
        subtotal_after_line_discounts: round_money(subtotal_after_line_discounts),
        final_subtotal: round_money(final_subtotal),
        tax_amount: round_money(adjusted_tax),
        total: round_money(total),
        lines: priced_lines,
        trace,
    })
}

// Quantities and prices are only bounded below, so every step is checked.
fn out_of_range() -> DomainError {
    DomainError::validation("lines.unit_price", "amount out of range")
}

fn mul(left: Decimal, right: Decimal) -> Result<Decimal, DomainError> {
    left.checked_mul(right).ok_or_else(out_of_range)
}

fn add(left: Decimal, right: Decimal) -> Result<Decimal, DomainError> {
    left.checked_add(right).ok_or_else(out_of_range)
}

fn sub(left: Decimal, right: Decimal) -> Result<Decimal, DomainError> {
    left.checked_sub(right).ok_or_else(out_of_range)
}

fn percent_of(value: Decimal, percent: Decimal) -> Result<Decimal, DomainError> {
    mul(value, percent)?.checked_div(HUNDRED).ok_or_else(out_of_range)
}

fn sum(mut values: impl Iterator<Item = Decimal>) -> Result<Decimal, DomainError> {
    values.try_fold(Decimal::ZERO, add)
}

fn validate_line(position: usize, line: &PricingLine) -> Result<(), DomainError> {
    if line.quantity == 0 {
        return Err(DomainError::validation(
            "lines.quantity",
            format!("line {position} quantity must be greater than zero"),
        ));
    }
    if line.unit_price <= Decimal::ZERO {
        return Err(DomainError::validation(
            "lines.unit_price",
            format!("line {position} unit price must be greater than zero"),
        ));
    }
    if line.tax_rate < Decimal::ZERO {
        return Err(DomainError::validation(
            "lines.tax_rate",
            format!("line {position} tax rate cannot be negative"),
        ));
    }
    ensure_percent("lines.discount_percent", line.discount_percent)
}

fn step(stage: &str, detail: impl Into<String>, amount: Decimal) -> PricingTraceStep {
    PricingTraceStep {
        stage: stage.to_string(),
        detail: detail.into(),
        amount: round_money(amount),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{compute_totals, round_money, PricingEngine, PricingLine, ProportionalPricingEngine};
    use crate::errors::DomainError;

    fn line(quantity: u32, unit_price: i64, discount: i64, tax_rate: i64) -> PricingLine {
        PricingLine {
            quantity,
            unit_price: Decimal::new(unit_price, 2),
            discount_percent: Decimal::new(discount, 0),
            tax_rate: Decimal::new(tax_rate, 0),
        }
    }

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn single_line_global_discount_reduces_taxable_base() {
        let totals = compute_totals(&[line(2, 10_000, 0, 16)], Decimal::new(10, 0))
            .expect("pricing succeeds");

        assert_eq!(totals.subtotal, money(20_000));
        assert_eq!(totals.global_discount_amount, money(2_000));
        assert_eq!(totals.discount_amount, money(2_000));
        assert_eq!(totals.final_subtotal, money(18_000));
        assert_eq!(totals.tax_amount, money(2_880));
        assert_eq!(totals.total, money(20_880));
    }

    #[test]
    fn global_discount_is_split_proportionally_across_tax_rates() {
        let totals = compute_totals(
            &[line(1, 10_000, 0, 0), line(3, 10_000, 0, 20)],
            Decimal::new(25, 0),
        )
        .expect("pricing succeeds");

        assert_eq!(totals.subtotal_after_line_discounts, money(40_000));
        assert_eq!(totals.global_discount_amount, money(10_000));
        assert_eq!(totals.final_subtotal, money(30_000));
        assert_eq!(totals.tax_amount, money(4_500));
        assert_eq!(totals.total, money(34_500));

        assert_eq!(totals.lines[0].global_discount_share, money(2_500));
        assert_eq!(totals.lines[0].adjusted_tax_amount, Decimal::ZERO);
        assert_eq!(totals.lines[1].global_discount_share, money(7_500));
        assert_eq!(totals.lines[1].adjusted_tax_amount, money(4_500));
        // Line snapshots keep the pre-global tax.
        assert_eq!(totals.lines[1].tax_amount, money(6_000));
        assert_eq!(totals.lines[1].line_total_with_tax, money(36_000));
    }

    #[test]
    fn line_discounts_apply_before_global_discount() {
        let totals = compute_totals(&[line(4, 2_500, 50, 10)], Decimal::new(10, 0))
            .expect("pricing succeeds");

        assert_eq!(totals.subtotal, money(10_000));
        assert_eq!(totals.line_discount_total, money(5_000));
        assert_eq!(totals.global_discount_amount, money(500));
        assert_eq!(totals.discount_amount, money(5_500));
        assert_eq!(totals.final_subtotal, money(4_500));
        assert_eq!(totals.tax_amount, money(450));
        assert_eq!(totals.total, money(4_950));
    }

    #[test]
    fn fully_discounted_lines_do_not_divide_by_zero() {
        let totals = compute_totals(&[line(1, 5_000, 100, 16)], Decimal::new(20, 0))
            .expect("pricing succeeds");

        assert_eq!(totals.subtotal, money(5_000));
        assert_eq!(totals.final_subtotal, Decimal::ZERO);
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
        assert_eq!(totals.lines[0].global_discount_share, Decimal::ZERO);
    }

    #[test]
    fn pricing_is_deterministic() {
        let lines = [line(3, 3_333, 5, 16), line(7, 1_999, 0, 8), line(1, 12_345, 12, 0)];
        let engine = ProportionalPricingEngine;

        let first = engine.compute_totals(&lines, Decimal::new(75, 1)).expect("first run");
        let second = engine.compute_totals(&lines, Decimal::new(75, 1)).expect("second run");

        assert_eq!(first, second);
    }

    #[test]
    fn results_are_rounded_half_away_from_zero() {
        assert_eq!(round_money(Decimal::new(125, 3)), money(13));
        assert_eq!(round_money(Decimal::new(124, 3)), money(12));
        assert_eq!(round_money(Decimal::new(159_984, 4)), money(1_600));

        let totals = compute_totals(&[line(3, 3_333, 0, 16)], Decimal::ZERO).expect("pricing");
        assert_eq!(totals.subtotal, money(9_999));
        assert_eq!(totals.tax_amount, money(1_600));
        assert_eq!(totals.total, money(11_599));
    }

    #[test]
    fn trace_exposes_tax_before_global_discount() {
        let totals = compute_totals(&[line(2, 10_000, 0, 16)], Decimal::new(10, 0))
            .expect("pricing succeeds");

        let pre_global = totals
            .trace
            .iter()
            .find(|step| step.stage == "tax_before_global_discount")
            .expect("trace step present");
        assert_eq!(pre_global.amount, money(3_200));
        assert_eq!(totals.trace.last().map(|step| step.amount), Some(totals.total));
    }

    #[test]
    fn rejects_out_of_range_global_discount() {
        let error = compute_totals(&[line(1, 100, 0, 0)], Decimal::new(101, 0))
            .expect_err("discount above 100");
        assert!(matches!(
            error,
            DomainError::Validation { ref field, .. } if field == "discount_percent"
        ));

        assert!(compute_totals(&[line(1, 100, 0, 0)], Decimal::new(-1, 0)).is_err());
        assert!(compute_totals(&[line(1, 100, 0, 0)], Decimal::ONE_HUNDRED).is_ok());
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let huge = PricingLine {
            quantity: 1_000_000,
            unit_price: Decimal::from_str_exact("100000000000000000000000").expect("decimal"),
            discount_percent: Decimal::ZERO,
            tax_rate: Decimal::new(16, 0),
        };

        let error = compute_totals(&[huge], Decimal::ZERO).expect_err("amount overflows");
        assert!(matches!(
            error,
            DomainError::Validation { ref field, ref message }
                if field == "lines.unit_price" && message == "amount out of range"
        ));
    }

    #[test]
    fn rejects_invalid_lines() {
        assert!(compute_totals(&[line(0, 100, 0, 0)], Decimal::ZERO).is_err());
        assert!(compute_totals(&[line(1, 0, 0, 0)], Decimal::ZERO).is_err());
        assert!(compute_totals(&[line(1, 100, 120, 0)], Decimal::ZERO).is_err());
        assert!(compute_totals(&[line(1, 100, 0, -5)], Decimal::ZERO).is_err());
    }
}
