//! JSON surface over [`QuoteService`].
//!
//! - `GET    /api/v1/quotes?status=`              list (runs the expiration sweep first)
//! - `POST   /api/v1/quotes`                      create
//! - `POST   /api/v1/quotes/preview`              price unsaved lines
//! - `POST   /api/v1/quotes/expire`               run the expiration sweep
//! - `GET    /api/v1/quotes/{id}`                 quote with client and lines
//! - `PUT    /api/v1/quotes/{id}`                 replace header and lines
//! - `DELETE /api/v1/quotes/{id}`                 cancel a deletable quote
//! - `POST   /api/v1/quotes/{id}/status`          lifecycle transition
//! - `POST   /api/v1/quotes/{id}/restore-stock`   cancel an approved quote, returning stock
//! - `GET    /api/v1/quotes/{id}/stock`           stock availability preview
//!
//! `x-correlation-id` and `x-actor` request headers flow into logs and audit rows.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use cotiza_core::audit::AuditContext;
use cotiza_core::cpq::inventory::StockAvailability;
use cotiza_core::cpq::pricing::QuoteTotals;
use cotiza_core::domain::quote::{LineRequest, QuoteDraft, QuoteId, QuoteStatus};
use cotiza_core::errors::{ApplicationError, DomainError, InterfaceError};
use cotiza_db::{QuoteDetail, QuoteService, QuoteSummary, StatusChange};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

const CORRELATION_HEADER: &str = "x-correlation-id";
const ACTOR_HEADER: &str = "x-actor";

#[derive(Clone)]
pub struct ApiState {
    service: QuoteService,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub details: Vec<String>,
    pub correlation_id: String,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedQuote {
    pub id: QuoteId,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: QuoteStatus,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub discount_percent: Decimal,
    pub lines: Vec<LineRequest>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: usize,
}

pub fn router(service: QuoteService) -> Router {
    Router::new()
        .route("/api/v1/quotes", get(list_quotes).post(create_quote))
        .route("/api/v1/quotes/preview", post(preview_totals))
        .route("/api/v1/quotes/expire", post(expire_quotes))
        .route("/api/v1/quotes/{id}", get(get_quote).put(update_quote).delete(delete_quote))
        .route("/api/v1/quotes/{id}/status", post(change_status))
        .route("/api/v1/quotes/{id}/restore-stock", post(restore_stock))
        .route("/api/v1/quotes/{id}/stock", get(stock_availability))
        .with_state(ApiState { service })
}

fn audit_context(headers: &HeaderMap) -> AuditContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };
    let correlation_id =
        header(CORRELATION_HEADER).unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()));
    let actor = header(ACTOR_HEADER).unwrap_or_else(|| "api".to_string());
    AuditContext::new(None, correlation_id, actor)
}

/// Shortfalls are a business outcome the caller can act on, so they get 422
/// with one detail line per product; other conflicts are 409.
fn reject(error: ApplicationError, audit: &AuditContext) -> (StatusCode, Json<ApiError>) {
    let insufficient_stock =
        matches!(error.as_domain(), Some(DomainError::InsufficientStock { .. }));
    let interface = error.into_interface(audit.correlation_id.clone());

    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } if insufficient_stock => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = %audit.correlation_id,
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    }

    (
        status,
        Json(ApiError {
            error: interface.user_message().to_string(),
            details: interface.details().to_vec(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}

fn not_found(quote_id: &str, audit: &AuditContext) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: format!("quote `{quote_id}` was not found"),
            details: Vec::new(),
            correlation_id: audit.correlation_id.clone(),
        }),
    )
}

async fn list_quotes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<QuoteSummary>> {
    let audit = audit_context(&headers);
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            raw.parse::<QuoteStatus>().map_err(|error| reject(error.into(), &audit))?,
        ),
    };

    state.service.list_quotes(status).await.map(Json).map_err(|error| reject(error, &audit))
}

async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(draft): Json<QuoteDraft>,
) -> Result<(StatusCode, Json<CreatedQuote>), (StatusCode, Json<ApiError>)> {
    let audit = audit_context(&headers);
    let id =
        state.service.create_quote(draft, &audit).await.map_err(|error| reject(error, &audit))?;

    info!(
        event_name = "api.quote.created",
        correlation_id = %audit.correlation_id,
        quote_id = %id,
        "quote created through api"
    );
    Ok((StatusCode::CREATED, Json(CreatedQuote { id })))
}

async fn get_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<QuoteDetail> {
    let audit = audit_context(&headers);
    match state.service.get_by_id(&QuoteId(id.clone())).await {
        Ok(Some(detail)) => Ok(Json(detail)),
        Ok(None) => Err(not_found(&id, &audit)),
        Err(error) => Err(reject(error, &audit)),
    }
}

async fn update_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<QuoteDraft>,
) -> ApiResult<QuoteDetail> {
    let audit = audit_context(&headers);
    let quote_id = QuoteId(id.clone());
    state
        .service
        .update_quote(&quote_id, draft, &audit)
        .await
        .map_err(|error| reject(error, &audit))?;

    match state.service.get_by_id(&quote_id).await {
        Ok(Some(detail)) => Ok(Json(detail)),
        Ok(None) => Err(not_found(&id, &audit)),
        Err(error) => Err(reject(error, &audit)),
    }
}

async fn delete_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let audit = audit_context(&headers);
    state
        .service
        .delete_quote(&QuoteId(id), &audit)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| reject(error, &audit))
}

async fn change_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<StatusChange> {
    let audit = audit_context(&headers);
    state
        .service
        .change_status(&QuoteId(id), request.status, &audit)
        .await
        .map(Json)
        .map_err(|error| reject(error, &audit))
}

async fn restore_stock(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusChange> {
    let audit = audit_context(&headers);
    state
        .service
        .restore_for_cancellation(&QuoteId(id), &audit)
        .await
        .map(Json)
        .map_err(|error| reject(error, &audit))
}

async fn stock_availability(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Vec<StockAvailability>> {
    let audit = audit_context(&headers);
    state
        .service
        .stock_availability(&QuoteId(id))
        .await
        .map(Json)
        .map_err(|error| reject(error, &audit))
}

async fn expire_quotes(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<ExpireResponse> {
    let audit = audit_context(&headers);
    state
        .service
        .mark_expired_quotes(&audit)
        .await
        .map(|expired| Json(ExpireResponse { expired }))
        .map_err(|error| reject(error, &audit))
}

async fn preview_totals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<QuoteTotals> {
    let audit = audit_context(&headers);
    state
        .service
        .preview_totals(request.discount_percent, &request.lines)
        .await
        .map(Json)
        .map_err(|error| reject(error, &audit))
}
