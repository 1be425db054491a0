use std::time::Instant;

use anyhow::{bail, ensure, Context};
use chrono::{Duration, Utc};
use cotiza_core::audit::AuditContext;
use cotiza_core::config::{AppConfig, LoadOptions};
use cotiza_core::domain::client::ClientId;
use cotiza_core::domain::product::ProductId;
use cotiza_core::domain::quote::{LineRequest, QuoteDraft, QuoteId, QuoteStatus};
use cotiza_db::connection::connect_with_config;
use cotiza_db::{migrations, QuoteService, SeedDataset, ServiceSettings};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::{escape_json, exit_code, CommandResult};

const SMOKE_CLIENT: &str = "client-acme";
const SMOKE_PRODUCT: &str = "prod-cable";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            let message = "configuration loaded and validated";
            checks.push(passed("config_validation", elapsed_ms, message));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(failed("config_validation", elapsed_ms, error.to_string()));
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("quote_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(failed(
                "db_connectivity",
                0,
                format!("failed to initialize async runtime: {error}"),
            ));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("quote_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(passed(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(failed(
                "db_connectivity",
                elapsed_since(db_started),
                format!("failed to connect: {error}"),
            ));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("quote_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    match runtime.block_on(migrations::run_pending(&pool)) {
        Ok(()) => checks.push(passed(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(failed(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.push(skipped("quote_round_trip"));
            runtime.block_on(pool.close());
            return finalize_report(checks, elapsed_since(started));
        }
    }

    let round_trip_started = Instant::now();
    let service = QuoteService::new(pool.clone(), ServiceSettings::from_config(&config));
    let validity_days = i64::from(config.quotes.default_validity_days);
    match runtime.block_on(quote_round_trip(&service, validity_days)) {
        Ok(quote_id) => checks.push(passed(
            "quote_round_trip",
            elapsed_since(round_trip_started),
            format!("quote {quote_id} went draft -> sent -> approved -> cancelled, stock restored"),
        )),
        Err(error) => checks.push(failed(
            "quote_round_trip",
            elapsed_since(round_trip_started),
            format!("{error:#}"),
        )),
    }
    runtime.block_on(pool.close());

    finalize_report(checks, elapsed_since(started))
}

/// Exercises the full lifecycle against the configured store: demo data,
/// creation, send, approval with stock deduction, cancellation with restore.
/// The quote stays behind as a cancelled record.
async fn quote_round_trip(service: &QuoteService, validity_days: i64) -> anyhow::Result<QuoteId> {
    SeedDataset::load(service.pool()).await.context("loading demo data")?;
    let audit = AuditContext::system("cotiza-smoke");

    let quote_id = service
        .create_quote(smoke_draft(validity_days), &audit)
        .await
        .context("creating quote")?;

    if let Err(error) = exercise_lifecycle(service, &quote_id, &audit).await {
        abandon(service, &quote_id, &audit).await;
        return Err(error);
    }
    Ok(quote_id)
}

fn smoke_draft(validity_days: i64) -> QuoteDraft {
    QuoteDraft {
        client_id: ClientId(SMOKE_CLIENT.to_string()),
        valid_until: Utc::now().date_naive() + Duration::days(validity_days.max(1)),
        notes: Some("cotiza smoke check".to_string()),
        discount_percent: Decimal::ZERO,
        lines: vec![LineRequest {
            product_id: ProductId(SMOKE_PRODUCT.to_string()),
            quantity: 1,
            unit_price: Decimal::new(15_000, 2),
            discount_percent: Decimal::ZERO,
        }],
    }
}

async fn exercise_lifecycle(
    service: &QuoteService,
    quote_id: &QuoteId,
    audit: &AuditContext,
) -> anyhow::Result<()> {
    let product = ProductId(SMOKE_PRODUCT.to_string());
    let stock_before = available_stock(service, quote_id).await?;
    service.change_status(quote_id, QuoteStatus::Sent, audit).await.context("sending quote")?;
    let approval = service
        .change_status(quote_id, QuoteStatus::Approved, audit)
        .await
        .context("approving quote")?;
    ensure!(
        approval.stock_movements.iter().any(|movement| movement.product_id == product),
        "approval did not deduct stock for {SMOKE_PRODUCT}"
    );

    service.restore_for_cancellation(quote_id, audit).await.context("cancelling quote")?;
    let stock_after = available_stock(service, quote_id).await?;
    ensure!(
        stock_before == stock_after,
        "stock for {SMOKE_PRODUCT} was {stock_before:?} before approval \
         but {stock_after:?} after cancellation"
    );
    Ok(())
}

/// Best effort: a failed run should not leave an open quote or held stock.
async fn abandon(service: &QuoteService, quote_id: &QuoteId, audit: &AuditContext) {
    let status = match service.get_by_id(quote_id).await {
        Ok(Some(detail)) => detail.quote.status,
        _ => return,
    };
    let _ = match status {
        QuoteStatus::Approved => {
            service.restore_for_cancellation(quote_id, audit).await.map(|_| ())
        }
        status if status.can_delete() => service.delete_quote(quote_id, audit).await,
        _ => Ok(()),
    };
}

async fn available_stock(
    service: &QuoteService,
    quote_id: &QuoteId,
) -> anyhow::Result<Option<i64>> {
    let preview = service.stock_availability(quote_id).await.context("reading stock availability")?;
    let Some(entry) = preview.into_iter().find(|entry| entry.product_id.0 == SMOKE_PRODUCT) else {
        bail!("stock availability did not list {SMOKE_PRODUCT}");
    };
    Ok(entry.available)
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn passed(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn failed(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\
             \"error\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    });

    CommandResult {
        exit_code: if failed { exit_code::CHECK_FAILED } else { exit_code::OK },
        output: format!("{human}\n{machine}"),
    }
}
