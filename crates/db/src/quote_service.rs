use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

use cotiza_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink, QUOTE_CREATED, QUOTE_EXPIRED, QUOTE_UPDATED, STOCK_DEDUCTED,
    STOCK_RESTORED,
};
use cotiza_core::config::AppConfig;
use cotiza_core::cpq::inventory::{
    aggregate_requirements, availability, low_stock_alerts, plan_deduction, plan_restore,
    InventoryThresholds, LowStockAlert, StockAvailability, StockMovement, StockRequirement,
    StockShortfall,
};
use cotiza_core::cpq::pricing::{
    PricingEngine, PricingLine, ProportionalPricingEngine, QuoteTotals,
};
use cotiza_core::domain::client::Client;
use cotiza_core::domain::quote::{
    LineRequest, Quote, QuoteDraft, QuoteId, QuoteLine, QuoteNumber, QuoteStatus,
};
use cotiza_core::errors::{ApplicationError, DomainError, ReferenceKind};
use cotiza_core::lifecycle::{LifecycleAction, LifecycleEngine};

use crate::repositories::client::find_client;
use crate::repositories::product::{
    deduct_stock, find_product, mark_deductions_restored, outstanding_deductions,
    record_deductions, restore_stock, stock_of,
};
use crate::repositories::quote::{
    compare_and_set_status, delete_lines, due_for_expiry, insert_lines, insert_quote,
    list_summaries, load_quote, load_status, numbers_for_year, update_header,
};
use crate::repositories::{audit::insert_event, RepositoryError};
use crate::DbPool;

pub use crate::repositories::quote::QuoteSummary;

/// Attempts at claiming a quote number before giving up on a collision storm.
const NUMBER_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub thresholds: InventoryThresholds,
    pub statement_timeout: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            thresholds: config.inventory.thresholds(),
            statement_timeout: config.database.statement_timeout(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            thresholds: InventoryThresholds::default(),
            statement_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteDetail {
    pub quote: Quote,
    pub client: Client,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub quote_id: QuoteId,
    pub from: QuoteStatus,
    pub to: QuoteStatus,
    pub stock_movements: Vec<StockMovement>,
    pub low_stock_alerts: Vec<LowStockAlert>,
}

/// Quote operations over one SQLite pool. Every write runs in a single
/// transaction that also carries its audit rows; the configured audit sink
/// only sees events after commit.
#[derive(Clone)]
pub struct QuoteService {
    pool: DbPool,
    settings: ServiceSettings,
    lifecycle: LifecycleEngine,
    pricing: ProportionalPricingEngine,
    audit_sink: Arc<dyn AuditSink>,
}

impl QuoteService {
    pub fn new(pool: DbPool, settings: ServiceSettings) -> Self {
        Self {
            pool,
            settings,
            lifecycle: LifecycleEngine::default(),
            pricing: ProportionalPricingEngine,
            audit_sink: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub async fn create_quote(
        &self,
        draft: QuoteDraft,
        audit: &AuditContext,
    ) -> Result<QuoteId, ApplicationError> {
        self.create_quote_as_of(draft, today(), audit).await
    }

    pub async fn create_quote_as_of(
        &self,
        draft: QuoteDraft,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> Result<QuoteId, ApplicationError> {
        self.bounded("create_quote", audit, async {
            draft.validate(today)?;

            for attempt in 1..=NUMBER_ATTEMPTS {
                if let Some(quote) = self.try_create(&draft, today, audit).await? {
                    info!(
                        event_name = "quote.created",
                        correlation_id = %audit.correlation_id,
                        quote_id = %quote.id,
                        quote_number = %quote.quote_number,
                        total = %quote.total_amount,
                        line_count = quote.lines.len(),
                        "quote created"
                    );
                    return Ok(quote.id);
                }

                warn!(
                    event_name = "quote.number.collision",
                    correlation_id = %audit.correlation_id,
                    attempt,
                    max_attempts = NUMBER_ATTEMPTS,
                    "quote number claimed concurrently, retrying"
                );
            }

            Err(ApplicationError::Persistence(format!(
                "could not allocate a quote number after {NUMBER_ATTEMPTS} attempts"
            )))
        })
        .await
    }

    /// One full insert transaction. `Ok(None)` means the quote number was
    /// taken by a concurrent writer and the whole attempt should be repeated.
    async fn try_create(
        &self,
        draft: &QuoteDraft,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> Result<Option<Quote>, ApplicationError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        ensure_active_client(&mut tx, draft).await?;
        let (lines, totals) = self.price_lines(&mut tx, draft).await?;

        let existing = numbers_for_year(&mut tx, today.year()).await?;
        let quote_number =
            QuoteNumber::next_for_year(today.year(), existing.iter().map(String::as_str));

        let now = Utc::now();
        let quote = Quote {
            id: QuoteId::generate(),
            quote_number,
            client_id: draft.client_id.clone(),
            quote_date: today,
            valid_until: draft.valid_until,
            notes: draft.normalized_notes(),
            discount_percent: draft.discount_percent,
            subtotal: totals.subtotal,
            discount_amount: totals.discount_amount,
            tax_amount: totals.tax_amount,
            total_amount: totals.total,
            status: self.lifecycle.initial_status(),
            lines,
            created_at: now,
            updated_at: now,
        };

        match insert_quote(&mut tx, &quote).await {
            Ok(()) => {}
            Err(error) if error.is_unique_violation() || error.is_busy() => return Ok(None),
            Err(error) => return Err(error.into()),
        }
        insert_lines(&mut tx, &quote.id, &quote.lines).await?;

        let event = AuditEvent::new(
            &audit.for_quote(&quote.id),
            QUOTE_CREATED,
            AuditCategory::Quote,
            AuditOutcome::Success,
        )
        .with_metadata("quote_number", quote.quote_number.to_string())
        .with_metadata("total", quote.total_amount.to_string());
        insert_event(&mut tx, &event).await?;

        match tx.commit().await {
            Ok(()) => {}
            Err(error) => {
                let error = RepositoryError::from(error);
                if error.is_busy() {
                    return Ok(None);
                }
                return Err(error.into());
            }
        }

        self.publish(vec![event]);
        Ok(Some(quote))
    }

    pub async fn update_quote(
        &self,
        quote_id: &QuoteId,
        draft: QuoteDraft,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        self.update_quote_as_of(quote_id, draft, today(), audit).await
    }

    /// Replaces header fields and every line. Only Draft and Sent quotes can
    /// be edited; the header write is guarded by the status read here.
    pub async fn update_quote_as_of(
        &self,
        quote_id: &QuoteId,
        draft: QuoteDraft,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        self.bounded("update_quote", audit, async {
            draft.validate(today)?;

            let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
            let Some(mut quote) = load_quote(&mut tx, quote_id).await? else {
                return Err(DomainError::reference(ReferenceKind::Quote, &quote_id.0).into());
            };
            if !quote.status.can_edit() {
                return Err(DomainError::NotEditable { status: quote.status }.into());
            }

            ensure_active_client(&mut tx, &draft).await?;
            let (lines, totals) = self.price_lines(&mut tx, &draft).await?;

            quote.client_id = draft.client_id.clone();
            quote.valid_until = draft.valid_until;
            quote.notes = draft.normalized_notes();
            quote.discount_percent = draft.discount_percent;
            quote.subtotal = totals.subtotal;
            quote.discount_amount = totals.discount_amount;
            quote.tax_amount = totals.tax_amount;
            quote.total_amount = totals.total;
            quote.lines = lines;
            quote.updated_at = Utc::now();

            if !update_header(&mut tx, &quote, quote.status).await? {
                return Err(concurrent(quote_id));
            }
            delete_lines(&mut tx, quote_id).await?;
            insert_lines(&mut tx, quote_id, &quote.lines).await?;

            let event = AuditEvent::new(
                &audit.for_quote(quote_id),
                QUOTE_UPDATED,
                AuditCategory::Quote,
                AuditOutcome::Success,
            )
            .with_metadata("line_count", quote.lines.len().to_string())
            .with_metadata("total", quote.total_amount.to_string());
            insert_event(&mut tx, &event).await?;
            tx.commit().await.map_err(RepositoryError::from)?;

            self.publish(vec![event]);
            info!(
                event_name = "quote.updated",
                correlation_id = %audit.correlation_id,
                quote_id = %quote_id,
                total = %quote.total_amount,
                "quote updated"
            );
            Ok(())
        })
        .await
    }

    pub async fn change_status(
        &self,
        quote_id: &QuoteId,
        target: QuoteStatus,
        audit: &AuditContext,
    ) -> Result<StatusChange, ApplicationError> {
        self.bounded("change_status", audit, self.apply_transition(quote_id, target, audit))
            .await
    }

    /// Cancels an approved quote and gives its stock back in one transaction.
    pub async fn restore_for_cancellation(
        &self,
        quote_id: &QuoteId,
        audit: &AuditContext,
    ) -> Result<StatusChange, ApplicationError> {
        self.bounded("restore_for_cancellation", audit, async {
            let status = self.current_status(quote_id).await?;
            if status != QuoteStatus::Approved {
                return Err(DomainError::InvalidQuoteTransition {
                    from: status,
                    to: QuoteStatus::Cancelled,
                }
                .into());
            }
            self.apply_transition(quote_id, QuoteStatus::Cancelled, audit).await
        })
        .await
    }

    /// Soft delete: moves a Draft, Sent or Rejected quote to Cancelled.
    pub async fn delete_quote(
        &self,
        quote_id: &QuoteId,
        audit: &AuditContext,
    ) -> Result<(), ApplicationError> {
        self.bounded("delete_quote", audit, async {
            let status = self.current_status(quote_id).await?;
            if !status.can_delete() {
                return Err(DomainError::NotEditable { status }.into());
            }
            self.apply_transition(quote_id, QuoteStatus::Cancelled, audit).await.map(|_| ())
        })
        .await
    }

    async fn current_status(&self, quote_id: &QuoteId) -> Result<QuoteStatus, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        load_status(&mut conn, quote_id)
            .await?
            .ok_or_else(|| DomainError::reference(ReferenceKind::Quote, &quote_id.0).into())
    }

    async fn apply_transition(
        &self,
        quote_id: &QuoteId,
        target: QuoteStatus,
        audit: &AuditContext,
    ) -> Result<StatusChange, ApplicationError> {
        let context = audit.for_quote(quote_id);
        let current = self.current_status(quote_id).await?;

        let pending = InMemoryAuditSink::default();
        let applied = self.lifecycle.apply_with_audit(current, target, &pending, &context);
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "quote.lifecycle.transition_rejected",
                    correlation_id = %audit.correlation_id,
                    quote_id = %quote_id,
                    from = %current,
                    to = %target,
                    "transition rejected"
                );
                self.publish(pending.events());
                return Err(error.into());
            }
        };

        // The status write is the first statement so the transaction takes the
        // writer lock before it reads lines or stock.
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        if !compare_and_set_status(&mut tx, quote_id, outcome.from, outcome.to, now).await? {
            return Err(concurrent(quote_id));
        }
        let Some(quote) = load_quote(&mut tx, quote_id).await? else {
            return Err(DomainError::reference(ReferenceKind::Quote, &quote_id.0).into());
        };

        let mut stock_movements = Vec::new();
        if outcome.requires(LifecycleAction::DeductStock) {
            let mut requirements = aggregate_requirements(&quote.lines);
            for requirement in &mut requirements {
                requirement.available = stock_of(&mut tx, &requirement.product_id).await?;
            }
            stock_movements = deduct_all(&mut tx, &requirements, audit, quote_id).await?;
            record_deductions(&mut tx, quote_id, &stock_movements, now).await?;
            pending.emit(stock_event(&context, STOCK_DEDUCTED, &stock_movements));
        }
        if outcome.requires(LifecycleAction::RestoreStock) {
            let deducted = outstanding_deductions(&mut tx, quote_id).await?;
            for movement in plan_restore(&deducted) {
                // A product that stopped tracking inventory has nothing to take back.
                if restore_stock(&mut tx, &movement.product_id, movement.quantity).await? {
                    stock_movements.push(movement);
                }
            }
            mark_deductions_restored(&mut tx, quote_id, now).await?;
            pending.emit(stock_event(&context, STOCK_RESTORED, &stock_movements));
        }

        let events = pending.events();
        for event in &events {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await.map_err(RepositoryError::from)?;
        self.publish(events);

        info!(
            event_name = "quote.lifecycle.transition_applied",
            correlation_id = %audit.correlation_id,
            quote_id = %quote_id,
            from = %outcome.from,
            to = %outcome.to,
            stock_movements = stock_movements.len(),
            "transition applied"
        );

        let low_stock_alerts = if outcome.requires(LifecycleAction::CheckLowStock) {
            self.low_stock_after_commit(&quote.lines, audit, quote_id).await
        } else {
            Vec::new()
        };

        Ok(StatusChange {
            quote_id: quote_id.clone(),
            from: outcome.from,
            to: outcome.to,
            stock_movements,
            low_stock_alerts,
        })
    }

    /// Never fails the approval that triggered it: errors are logged and the
    /// alert list comes back empty.
    async fn low_stock_after_commit(
        &self,
        lines: &[QuoteLine],
        audit: &AuditContext,
        quote_id: &QuoteId,
    ) -> Vec<LowStockAlert> {
        match self.low_stock_for_lines(lines).await {
            Ok(alerts) => {
                for alert in &alerts {
                    warn!(
                        event_name = "quote.stock.low",
                        correlation_id = %audit.correlation_id,
                        quote_id = %quote_id,
                        product_id = %alert.product_id,
                        remaining = alert.remaining,
                        threshold = alert.threshold,
                        "stock at or below threshold"
                    );
                }
                alerts
            }
            Err(error) => {
                error!(
                    event_name = "quote.stock.low_check_failed",
                    correlation_id = %audit.correlation_id,
                    quote_id = %quote_id,
                    error = %error,
                    "low stock check failed after approval"
                );
                Vec::new()
            }
        }
    }

    pub async fn check_low_stock_after_approval(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<LowStockAlert>, ApplicationError> {
        let audit = AuditContext::system("low-stock-check");
        self.bounded("check_low_stock_after_approval", &audit, async {
            let quote = self.load_existing(quote_id).await?;
            self.low_stock_for_lines(&quote.lines).await
        })
        .await
    }

    async fn low_stock_for_lines(
        &self,
        lines: &[QuoteLine],
    ) -> Result<Vec<LowStockAlert>, ApplicationError> {
        let requirements = self.requirements_with_stock(lines).await?;
        Ok(low_stock_alerts(&requirements, &self.settings.thresholds))
    }

    /// Read-only preview of what an approval would do to each product.
    pub async fn stock_availability(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<StockAvailability>, ApplicationError> {
        let audit = AuditContext::system("stock-availability");
        self.bounded("stock_availability", &audit, async {
            let quote = self.load_existing(quote_id).await?;
            let requirements = self.requirements_with_stock(&quote.lines).await?;
            Ok(availability(&requirements, &self.settings.thresholds))
        })
        .await
    }

    async fn requirements_with_stock(
        &self,
        lines: &[QuoteLine],
    ) -> Result<Vec<StockRequirement>, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let mut requirements = Vec::new();
        for requirement in aggregate_requirements(lines) {
            let available = stock_of(&mut conn, &requirement.product_id).await?;
            requirements.push(requirement.with_available(available));
        }
        Ok(requirements)
    }

    pub async fn get_by_id(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<QuoteDetail>, ApplicationError> {
        let audit = AuditContext::system("get_by_id");
        self.bounded("get_by_id", &audit, async {
            let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
            let Some(quote) = load_quote(&mut conn, quote_id).await? else {
                return Ok(None);
            };
            let client = find_client(&mut conn, &quote.client_id).await?.ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "quote `{}` references missing client `{}`",
                    quote.id, quote.client_id
                ))
            })?;
            Ok(Some(QuoteDetail { quote, client }))
        })
        .await
    }

    async fn load_existing(&self, quote_id: &QuoteId) -> Result<Quote, ApplicationError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        load_quote(&mut conn, quote_id)
            .await?
            .ok_or_else(|| DomainError::reference(ReferenceKind::Quote, &quote_id.0).into())
    }

    pub async fn mark_expired_quotes(
        &self,
        audit: &AuditContext,
    ) -> Result<usize, ApplicationError> {
        self.mark_expired_quotes_as_of(today(), audit).await
    }

    /// Moves every Draft/Sent quote whose validity date is before `today` to
    /// Expired. Running it twice for the same day is a no-op.
    pub async fn mark_expired_quotes_as_of(
        &self,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> Result<usize, ApplicationError> {
        self.bounded("mark_expired_quotes", audit, async {
            let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
            let now = Utc::now();
            let mut events = Vec::new();

            let expirable: Vec<QuoteStatus> =
                QuoteStatus::ALL.into_iter().filter(|status| status.is_expirable()).collect();
            for (quote_id, status) in due_for_expiry(&mut tx, &expirable, today).await? {
                if !compare_and_set_status(&mut tx, &quote_id, status, QuoteStatus::Expired, now)
                    .await?
                {
                    continue;
                }
                let event = AuditEvent::new(
                    &audit.for_quote(&quote_id),
                    QUOTE_EXPIRED,
                    AuditCategory::Lifecycle,
                    AuditOutcome::Success,
                )
                .with_metadata("from", status.as_str())
                .with_metadata("as_of", today.to_string());
                insert_event(&mut tx, &event).await?;
                events.push(event);
            }

            tx.commit().await.map_err(RepositoryError::from)?;
            let expired = events.len();
            self.publish(events);

            if expired > 0 {
                info!(
                    event_name = "quote.expiration.swept",
                    correlation_id = %audit.correlation_id,
                    as_of = %today,
                    expired,
                    "expired quotes past validity"
                );
            }
            Ok(expired)
        })
        .await
    }

    /// Totals for an unsaved quote. Unknown products price with a zero tax
    /// rate so the preview still renders while the user is typing.
    pub async fn preview_totals(
        &self,
        global_discount_percent: Decimal,
        lines: &[LineRequest],
    ) -> Result<QuoteTotals, ApplicationError> {
        let audit = AuditContext::system("preview_totals");
        self.bounded("preview_totals", &audit, async {
            let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
            let mut pricing_lines = Vec::with_capacity(lines.len());
            for line in lines {
                let tax_rate = find_product(&mut conn, &line.product_id)
                    .await?
                    .map(|product| product.tax_rate)
                    .unwrap_or(Decimal::ZERO);
                pricing_lines.push(PricingLine {
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    discount_percent: line.discount_percent,
                    tax_rate,
                });
            }
            Ok(self.pricing.compute_totals(&pricing_lines, global_discount_percent)?)
        })
        .await
    }

    pub async fn list_quotes(
        &self,
        status: Option<QuoteStatus>,
    ) -> Result<Vec<QuoteSummary>, ApplicationError> {
        self.list_quotes_as_of(status, today()).await
    }

    /// Sweeps expired quotes first so the listing never shows a stale status.
    /// A failed sweep is logged and the listing still goes ahead.
    pub async fn list_quotes_as_of(
        &self,
        status: Option<QuoteStatus>,
        today: NaiveDate,
    ) -> Result<Vec<QuoteSummary>, ApplicationError> {
        let audit = AuditContext::system("list_quotes");
        if let Err(error) = self.mark_expired_quotes_as_of(today, &audit).await {
            warn!(
                event_name = "quote.expiration.sweep_failed",
                correlation_id = %audit.correlation_id,
                error = %error,
                "expiration sweep before listing failed"
            );
        }

        self.bounded("list_quotes", &audit, async {
            let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
            Ok(list_summaries(&mut conn, status).await?)
        })
        .await
    }

    /// Looks up every product, snapshots name and tax rate, and prices the
    /// lines together so the global discount spreads across all of them.
    async fn price_lines(
        &self,
        conn: &mut SqliteConnection,
        draft: &QuoteDraft,
    ) -> Result<(Vec<QuoteLine>, QuoteTotals), ApplicationError> {
        let mut snapshots = Vec::with_capacity(draft.lines.len());
        for request in &draft.lines {
            let product = find_product(conn, &request.product_id)
                .await?
                .filter(|product| product.active)
                .ok_or_else(|| {
                    DomainError::reference(ReferenceKind::Product, &request.product_id.0)
                })?;
            snapshots.push((request, product));
        }

        let pricing_lines: Vec<PricingLine> = snapshots
            .iter()
            .map(|(request, product)| PricingLine {
                quantity: request.quantity,
                unit_price: request.unit_price,
                discount_percent: request.discount_percent,
                tax_rate: product.tax_rate,
            })
            .collect();
        let totals = self.pricing.compute_totals(&pricing_lines, draft.discount_percent)?;

        let lines = snapshots
            .iter()
            .zip(&totals.lines)
            .zip(1u32..)
            .map(|(((request, product), priced), line_number)| QuoteLine {
                line_number,
                product_id: request.product_id.clone(),
                product_name: product.name.clone(),
                quantity: request.quantity,
                unit_price: request.unit_price,
                discount_percent: request.discount_percent,
                tax_rate: product.tax_rate,
                line_subtotal: priced.line_subtotal,
                discount_amount: priced.discount_amount,
                line_total: priced.line_total,
                tax_amount: priced.tax_amount,
                line_total_with_tax: priced.line_total_with_tax,
            })
            .collect();

        Ok((lines, totals))
    }

    fn publish(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.audit_sink.emit(event);
        }
    }

    /// Runs `future` under the statement timeout. Dropping the future on
    /// timeout drops any open transaction, which rolls it back.
    pub(crate) async fn bounded<T, F>(
        &self,
        operation: &'static str,
        audit: &AuditContext,
        future: F,
    ) -> Result<T, ApplicationError>
    where
        F: Future<Output = Result<T, ApplicationError>>,
    {
        let limit = self.settings.statement_timeout;
        let result = match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(ApplicationError::Timeout(format!(
                "{operation} did not finish within {}ms",
                limit.as_millis()
            ))),
        };

        if let Err(error) = &result {
            if error.is_retryable() {
                error!(
                    event_name = "quote.operation.failed",
                    correlation_id = %audit.correlation_id,
                    operation,
                    error = %error,
                    "quote operation failed"
                );
            }
        }
        result
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn concurrent(quote_id: &QuoteId) -> ApplicationError {
    DomainError::ConcurrentModification { quote_id: quote_id.0.clone() }.into()
}

async fn ensure_active_client(
    conn: &mut SqliteConnection,
    draft: &QuoteDraft,
) -> Result<(), ApplicationError> {
    match find_client(conn, &draft.client_id).await? {
        Some(client) if client.active => Ok(()),
        _ => Err(DomainError::reference(ReferenceKind::Client, &draft.client_id.0).into()),
    }
}

/// Validates the whole batch against the stock read in this transaction, then
/// applies conditional decrements. A decrement that touches no row lost a race
/// with another approval and aborts with the stock seen now.
async fn deduct_all(
    conn: &mut SqliteConnection,
    requirements: &[StockRequirement],
    audit: &AuditContext,
    quote_id: &QuoteId,
) -> Result<Vec<StockMovement>, ApplicationError> {
    let movements = match plan_deduction(requirements) {
        Ok(movements) => movements,
        Err(error) => {
            if let DomainError::InsufficientStock { shortfalls } = &error {
                warn!(
                    event_name = "quote.stock.insufficient",
                    correlation_id = %audit.correlation_id,
                    quote_id = %quote_id,
                    shortfalls = shortfalls.len(),
                    "approval blocked by stock"
                );
            }
            return Err(error.into());
        }
    };

    for movement in &movements {
        if deduct_stock(conn, &movement.product_id, movement.quantity).await? {
            continue;
        }

        let available = stock_of(conn, &movement.product_id).await?.unwrap_or(0);
        warn!(
            event_name = "quote.stock.race_lost",
            correlation_id = %audit.correlation_id,
            quote_id = %quote_id,
            product_id = %movement.product_id,
            required = movement.quantity,
            available,
            "stock changed during approval"
        );
        return Err(DomainError::InsufficientStock {
            shortfalls: vec![StockShortfall {
                product_id: movement.product_id.clone(),
                product_name: movement.product_name.clone(),
                required: movement.quantity,
                available,
            }],
        }
        .into());
    }

    Ok(movements)
}

fn stock_event(
    context: &AuditContext,
    event_type: &str,
    movements: &[StockMovement],
) -> AuditEvent {
    movements.iter().fold(
        AuditEvent::new(context, event_type, AuditCategory::Inventory, AuditOutcome::Success),
        |event, movement| {
            event.with_metadata(movement.product_id.0.clone(), movement.quantity.to_string())
        },
    )
}
