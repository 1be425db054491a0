use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quote::QuoteId;

pub const QUOTE_CREATED: &str = "quote.created";
pub const QUOTE_UPDATED: &str = "quote.updated";
pub const QUOTE_STATUS_CHANGED: &str = "quote.status_changed";
pub const QUOTE_EXPIRED: &str = "quote.expired";
pub const STOCK_DEDUCTED: &str = "stock.deducted";
pub const STOCK_RESTORED: &str = "stock.restored";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Quote,
    Lifecycle,
    Inventory,
    Pricing,
    System,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Lifecycle => "lifecycle",
            Self::Inventory => "inventory",
            Self::Pricing => "pricing",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub quote_id: Option<QuoteId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        quote_id: Option<QuoteId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { quote_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    /// Context for work nobody asked for directly, like the expiration sweep.
    pub fn system(actor: impl Into<String>) -> Self {
        Self::new(None, format!("sys-{}", Uuid::new_v4().simple()), actor)
    }

    pub fn for_quote(&self, quote_id: &QuoteId) -> Self {
        Self { quote_id: Some(quote_id.clone()), ..self.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub quote_id: Option<QuoteId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            quote_id: context.quote_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_owned())
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Mirrors audit events into the process log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            event_name = "audit.event_recorded",
            audit_event_type = %event.event_type,
            category = event.category.as_str(),
            outcome = event.outcome.as_str(),
            correlation_id = %event.correlation_id,
            quote_id = event.quote_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            actor = %event.actor,
            metadata = %event.metadata_json(),
            "audit event"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{
            AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
            TracingAuditSink, QUOTE_STATUS_CHANGED,
        },
        domain::quote::QuoteId,
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        let context =
            AuditContext::new(Some(QuoteId("Q-0042".to_owned())), "req-123", "quote-service");
        sink.emit(
            AuditEvent::new(
                &context,
                QUOTE_STATUS_CHANGED,
                AuditCategory::Lifecycle,
                AuditOutcome::Success,
            )
            .with_metadata("from", "draft")
            .with_metadata("to", "sent"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].actor, "quote-service");
        assert_eq!(events[0].quote_id.as_ref().map(|id| id.0.as_str()), Some("Q-0042"));
        assert_eq!(events[0].metadata_json(), r#"{"from":"draft","to":"sent"}"#);
        assert_eq!(sink.event_types(), [QUOTE_STATUS_CHANGED]);
    }

    #[test]
    fn system_context_gets_a_generated_correlation_id() {
        let first = AuditContext::system("expiration-sweep");
        let second = AuditContext::system("expiration-sweep");

        assert!(first.correlation_id.starts_with("sys-"));
        assert_ne!(first.correlation_id, second.correlation_id);
        assert!(first.quote_id.is_none());

        let scoped = first.for_quote(&QuoteId("Q-1".to_owned()));
        assert_eq!(scoped.correlation_id, first.correlation_id);
        assert_eq!(scoped.quote_id, Some(QuoteId("Q-1".to_owned())));
    }

    #[test]
    fn tracing_sink_accepts_events_without_subscriber() {
        let context = AuditContext::system("test");
        TracingAuditSink.emit(AuditEvent::new(
            &context,
            "quote.expired",
            AuditCategory::Lifecycle,
            AuditOutcome::Success,
        ));
    }
}
