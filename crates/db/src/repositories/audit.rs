use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use cotiza_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use cotiza_core::domain::quote::QuoteId;

use super::{parse_timestamp, AuditEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditEventRepository {
    pool: DbPool,
}

impl SqlAuditEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditEventRepository for SqlAuditEventRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut conn, event).await
    }

    async fn list_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quote_id, correlation_id, event_type, category, actor, outcome,
                    metadata_json, occurred_at
             FROM audit_event
             WHERE quote_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &AuditEvent,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO audit_event (
            id, quote_id, correlation_id, event_type, category, actor, outcome,
            metadata_json, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(event.quote_id.as_ref().map(|id| id.0.as_str()))
    .bind(&event.correlation_id)
    .bind(&event.event_type)
    .bind(event.category.as_str())
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(event.metadata_json())
    .bind(event.occurred_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn event_from_row(row: &SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = match category_raw.as_str() {
        "quote" => AuditCategory::Quote,
        "lifecycle" => AuditCategory::Lifecycle,
        "inventory" => AuditCategory::Inventory,
        "pricing" => AuditCategory::Pricing,
        "system" => AuditCategory::System,
        other => {
            return Err(RepositoryError::Decode(format!("unknown audit category `{other}`")));
        }
    };

    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = match outcome_raw.as_str() {
        "success" => AuditOutcome::Success,
        "rejected" => AuditOutcome::Rejected,
        "failed" => AuditOutcome::Failed,
        other => {
            return Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`")));
        }
    };

    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid audit metadata: {error}")))?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        quote_id: row.try_get::<Option<String>, _>("quote_id")?.map(QuoteId),
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        category,
        actor: row.try_get("actor")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", &row.try_get::<String, _>("occurred_at")?)?,
    })
}
