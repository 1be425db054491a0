use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cpq::pricing::ensure_percent;
use crate::domain::client::ClientId;
use crate::domain::product::ProductId;
use crate::errors::DomainError;

pub const QUOTE_NUMBER_PREFIX: &str = "COT";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(format!("Q-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote lifecycle states. The numeric codes are the ones persisted by the
/// legacy CRM screens and are kept stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 6] = [
        QuoteStatus::Draft,
        QuoteStatus::Sent,
        QuoteStatus::Approved,
        QuoteStatus::Rejected,
        QuoteStatus::Expired,
        QuoteStatus::Cancelled,
    ];

    pub fn code(self) -> u8 {
        match self {
            Self::Draft => 1,
            Self::Sent => 2,
            Self::Approved => 3,
            Self::Rejected => 4,
            Self::Expired => 5,
            Self::Cancelled => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn allowed_transitions(self) -> &'static [QuoteStatus] {
        use QuoteStatus::{Approved, Cancelled, Expired, Rejected, Sent};

        match self {
            Self::Draft => &[Sent, Cancelled],
            Self::Sent => &[Approved, Rejected, Expired, Cancelled],
            Self::Approved => &[Cancelled],
            Self::Rejected => &[Sent, Cancelled],
            Self::Expired => &[Sent, Cancelled],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: QuoteStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn can_edit(self) -> bool {
        matches!(self, Self::Draft | Self::Sent)
    }

    pub fn can_delete(self) -> bool {
        matches!(self, Self::Draft | Self::Sent | Self::Rejected)
    }

    /// States swept into `Expired` once `valid_until` has passed.
    pub fn is_expirable(self) -> bool {
        matches!(self, Self::Draft | Self::Sent)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        if let Ok(code) = normalized.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| {
                DomainError::validation("status", format!("unknown status code `{code}`"))
            });
        }

        Self::ALL.into_iter().find(|status| status.as_str() == normalized).ok_or_else(|| {
            DomainError::validation(
                "status",
                format!(
                    "unknown status `{value}` (expected draft|sent|approved|rejected|expired|cancelled)"
                ),
            )
        })
    }
}

/// `COT-<year>-<sequence>` with the sequence scoped per calendar year.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuoteNumber {
    year: i32,
    sequence: u32,
}

impl QuoteNumber {
    pub fn new(year: i32, sequence: u32) -> Self {
        Self { year, sequence }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn year_prefix(year: i32) -> String {
        format!("{QUOTE_NUMBER_PREFIX}-{year:04}-")
    }

    /// Next number for `year` given the numbers already issued. Numbers from
    /// other years and unparseable legacy values are ignored, so the first
    /// quote of a new year always starts at 0001.
    pub fn next_for_year<'a, I>(year: i32, existing: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let max_sequence = existing
            .into_iter()
            .filter_map(|raw| raw.parse::<QuoteNumber>().ok())
            .filter(|number| number.year == year)
            .map(|number| number.sequence)
            .max()
            .unwrap_or(0);

        Self::new(year, max_sequence + 1)
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{QUOTE_NUMBER_PREFIX}-{:04}-{:04}", self.year, self.sequence)
    }
}

impl FromStr for QuoteNumber {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DomainError::validation(
                "quote_number",
                format!("`{value}` is not a quote number (expected {QUOTE_NUMBER_PREFIX}-YYYY-NNNN)"),
            )
        };

        let mut parts = value.trim().splitn(3, '-');
        let (Some(prefix), Some(year), Some(sequence)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix != QUOTE_NUMBER_PREFIX || year.len() != 4 || sequence.len() < 4 {
            return Err(invalid());
        }

        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }

        Ok(Self { year, sequence })
    }
}

impl TryFrom<String> for QuoteNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QuoteNumber> for String {
    fn from(value: QuoteNumber) -> Self {
        value.to_string()
    }
}

/// Persisted line. `product_name` and `tax_rate` are snapshots taken when the
/// line was written; later catalog edits never change an existing quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub line_number: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_rate: Decimal,
    pub line_subtotal: Decimal,
    pub discount_amount: Decimal,
    pub line_total: Decimal,
    pub tax_amount: Decimal,
    pub line_total_with_tax: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub quote_number: QuoteNumber,
    pub client_id: ClientId,
    pub quote_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub notes: Option<String>,
    pub discount_percent: Decimal,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: QuoteStatus,
    pub lines: Vec<QuoteLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One requested line of a create/update call, before pricing and snapshotting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
}

/// Caller input shared by create and update. Update replaces the lines wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub client_id: ClientId,
    pub valid_until: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub lines: Vec<LineRequest>,
}

impl QuoteDraft {
    /// Input checks that need no directory lookups. Reference checks (active
    /// client, active products) are done by the caller against the directories.
    pub fn validate(&self, today: NaiveDate) -> Result<(), DomainError> {
        if self.client_id.0.trim().is_empty() {
            return Err(DomainError::validation("client_id", "a client is required"));
        }

        if self.valid_until <= today {
            return Err(DomainError::validation(
                "valid_until",
                format!("validity date {} must be after {today}", self.valid_until),
            ));
        }

        ensure_percent("discount_percent", self.discount_percent)?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("lines", "a quote needs at least one line"));
        }

        for (index, line) in self.lines.iter().enumerate() {
            let position = index + 1;
            if line.product_id.0.trim().is_empty() {
                return Err(DomainError::validation(
                    "lines.product_id",
                    format!("line {position} has no product"),
                ));
            }
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
            ensure_percent("lines.discount_percent", line.discount_percent)?;
        }

        Ok(())
    }

    pub fn normalized_notes(&self) -> Option<String> {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::domain::client::ClientId;
    use crate::domain::product::ProductId;
    use crate::errors::DomainError;

    use super::{LineRequest, QuoteDraft, QuoteNumber, QuoteStatus};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn draft() -> QuoteDraft {
        QuoteDraft {
            client_id: ClientId("client-acme".to_string()),
            valid_until: date(2026, 4, 1),
            notes: Some("  net 30  ".to_string()),
            discount_percent: Decimal::new(10, 0),
            lines: vec![LineRequest {
                product_id: ProductId("prod-widget".to_string()),
                quantity: 2,
                unit_price: Decimal::new(10_000, 2),
                discount_percent: Decimal::ZERO,
            }],
        }
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use QuoteStatus::*;

        let allowed = [
            (Draft, Sent),
            (Draft, Cancelled),
            (Sent, Approved),
            (Sent, Rejected),
            (Sent, Expired),
            (Sent, Cancelled),
            (Approved, Cancelled),
            (Rejected, Sent),
            (Rejected, Cancelled),
            (Expired, Sent),
            (Expired, Cancelled),
        ];

        for from in QuoteStatus::ALL {
            for to in QuoteStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "unexpected answer for {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn cancelled_is_the_only_terminal_state() {
        let terminal: Vec<_> =
            QuoteStatus::ALL.into_iter().filter(|status| status.is_terminal()).collect();
        assert_eq!(terminal, vec![QuoteStatus::Cancelled]);
    }

    #[test]
    fn edit_and_delete_permissions() {
        let editable: Vec<_> =
            QuoteStatus::ALL.into_iter().filter(|status| status.can_edit()).collect();
        let deletable: Vec<_> =
            QuoteStatus::ALL.into_iter().filter(|status| status.can_delete()).collect();

        assert_eq!(editable, vec![QuoteStatus::Draft, QuoteStatus::Sent]);
        assert_eq!(deletable, vec![QuoteStatus::Draft, QuoteStatus::Sent, QuoteStatus::Rejected]);
    }

    #[test]
    fn status_parses_names_and_legacy_codes() {
        assert_eq!("approved".parse::<QuoteStatus>().expect("name"), QuoteStatus::Approved);
        assert_eq!(" Sent ".parse::<QuoteStatus>().expect("mixed case"), QuoteStatus::Sent);
        assert_eq!("6".parse::<QuoteStatus>().expect("code"), QuoteStatus::Cancelled);
        assert!("7".parse::<QuoteStatus>().is_err());
        assert!("archived".parse::<QuoteStatus>().is_err());

        for status in QuoteStatus::ALL {
            assert_eq!(QuoteStatus::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn quote_number_formats_and_parses() {
        let number = QuoteNumber::new(2026, 7);
        assert_eq!(number.to_string(), "COT-2026-0007");
        assert_eq!("COT-2026-0007".parse::<QuoteNumber>().expect("parse"), number);
        assert_eq!(QuoteNumber::year_prefix(2026), "COT-2026-");

        assert!("COT-26-0007".parse::<QuoteNumber>().is_err());
        assert!("INV-2026-0007".parse::<QuoteNumber>().is_err());
        assert!("COT-2026-0000".parse::<QuoteNumber>().is_err());
    }

    #[test]
    fn next_quote_number_continues_within_year_and_resets_for_new_year() {
        let existing = ["COT-2025-0041", "COT-2026-0003", "COT-2026-0012", "legacy-17"];

        assert_eq!(QuoteNumber::next_for_year(2026, existing).to_string(), "COT-2026-0013");
        assert_eq!(QuoteNumber::next_for_year(2027, existing).to_string(), "COT-2027-0001");
        assert_eq!(
            QuoteNumber::next_for_year(2026, std::iter::empty()).to_string(),
            "COT-2026-0001"
        );
    }

    #[test]
    fn quote_number_serializes_as_string() {
        let json = serde_json::to_string(&QuoteNumber::new(2026, 42)).expect("serialize");
        assert_eq!(json, "\"COT-2026-0042\"");

        let parsed: QuoteNumber = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, QuoteNumber::new(2026, 42));
    }

    #[test]
    fn draft_validation_accepts_well_formed_input() {
        let draft = draft();
        draft.validate(date(2026, 3, 1)).expect("valid draft");
        assert_eq!(draft.normalized_notes().as_deref(), Some("net 30"));
    }

    #[test]
    fn draft_validation_rejects_bad_input() {
        let today = date(2026, 3, 1);

        let mut no_lines = draft();
        no_lines.lines.clear();
        assert!(matches!(
            no_lines.validate(today),
            Err(DomainError::Validation { ref field, .. }) if field == "lines"
        ));

        let mut validity_today = draft();
        validity_today.valid_until = today;
        assert!(matches!(
            validity_today.validate(today),
            Err(DomainError::Validation { ref field, .. }) if field == "valid_until"
        ));

        let mut discount = draft();
        discount.discount_percent = Decimal::new(10_001, 2);
        assert!(matches!(
            discount.validate(today),
            Err(DomainError::Validation { ref field, .. }) if field == "discount_percent"
        ));

        let mut quantity = draft();
        quantity.lines[0].quantity = 0;
        assert!(matches!(
            quantity.validate(today),
            Err(DomainError::Validation { ref field, .. }) if field == "lines.quantity"
        ));

        let mut price = draft();
        price.lines[0].unit_price = Decimal::ZERO;
        assert!(matches!(
            price.validate(today),
            Err(DomainError::Validation { ref field, .. }) if field == "lines.unit_price"
        ));

        let mut line_discount = draft();
        line_discount.lines[0].discount_percent = Decimal::new(-1, 0);
        assert!(line_discount.validate(today).is_err());
    }
}
