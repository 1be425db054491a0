use crate::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, QUOTE_STATUS_CHANGED,
};
use crate::domain::quote::QuoteStatus;
use crate::errors::DomainError;
use crate::lifecycle::states::{LifecycleAction, TransitionOutcome};

pub trait QuoteLifecycle {
    fn initial_status(&self) -> QuoteStatus;
    fn transition(
        &self,
        from: QuoteStatus,
        to: QuoteStatus,
    ) -> Result<TransitionOutcome, DomainError>;
}

/// Draft → Sent → Approved/Rejected/Expired, with Cancelled reachable from
/// every non-terminal status.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardLifecycle;

impl QuoteLifecycle for StandardLifecycle {
    fn initial_status(&self) -> QuoteStatus {
        QuoteStatus::Draft
    }

    fn transition(
        &self,
        from: QuoteStatus,
        to: QuoteStatus,
    ) -> Result<TransitionOutcome, DomainError> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidQuoteTransition { from, to });
        }

        let actions = match (from, to) {
            (_, QuoteStatus::Approved) => {
                vec![LifecycleAction::DeductStock, LifecycleAction::CheckLowStock]
            }
            (QuoteStatus::Approved, QuoteStatus::Cancelled) => vec![LifecycleAction::RestoreStock],
            _ => Vec::new(),
        };

        Ok(TransitionOutcome { from, to, actions })
    }
}

#[derive(Clone, Debug)]
pub struct LifecycleEngine<L = StandardLifecycle> {
    lifecycle: L,
}

impl Default for LifecycleEngine<StandardLifecycle> {
    fn default() -> Self {
        Self::new(StandardLifecycle)
    }
}

impl<L> LifecycleEngine<L>
where
    L: QuoteLifecycle,
{
    pub fn new(lifecycle: L) -> Self {
        Self { lifecycle }
    }

    pub fn initial_status(&self) -> QuoteStatus {
        self.lifecycle.initial_status()
    }

    pub fn apply(
        &self,
        from: QuoteStatus,
        to: QuoteStatus,
    ) -> Result<TransitionOutcome, DomainError> {
        self.lifecycle.transition(from, to)
    }

    pub fn apply_with_audit<S>(
        &self,
        from: QuoteStatus,
        to: QuoteStatus,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(from, to);
        match &result {
            Ok(outcome) => sink.emit(
                AuditEvent::new(
                    audit,
                    QUOTE_STATUS_CHANGED,
                    AuditCategory::Lifecycle,
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str()),
            ),
            Err(error) => sink.emit(
                AuditEvent::new(
                    audit,
                    "quote.transition_rejected",
                    AuditCategory::Lifecycle,
                    AuditOutcome::Rejected,
                )
                .with_metadata("from", from.as_str())
                .with_metadata("to", to.as_str())
                .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::quote::{QuoteId, QuoteStatus};
    use crate::errors::DomainError;
    use crate::lifecycle::engine::{LifecycleEngine, QuoteLifecycle, StandardLifecycle};
    use crate::lifecycle::states::LifecycleAction;

    #[test]
    fn approval_requires_deduction_and_low_stock_check() {
        let engine = LifecycleEngine::default();
        let outcome =
            engine.apply(QuoteStatus::Sent, QuoteStatus::Approved).expect("sent -> approved");

        assert_eq!(outcome.actions, [LifecycleAction::DeductStock, LifecycleAction::CheckLowStock]);
        assert!(outcome.requires(LifecycleAction::DeductStock));
    }

    #[test]
    fn cancelling_an_approved_quote_restores_stock() {
        let engine = LifecycleEngine::default();

        let from_approved = engine
            .apply(QuoteStatus::Approved, QuoteStatus::Cancelled)
            .expect("approved -> cancelled");
        assert_eq!(from_approved.actions, [LifecycleAction::RestoreStock]);

        let from_draft =
            engine.apply(QuoteStatus::Draft, QuoteStatus::Cancelled).expect("draft -> cancelled");
        assert!(from_draft.actions.is_empty());
    }

    #[test]
    fn re_approval_is_rejected_without_actions() {
        let engine = LifecycleEngine::default();
        let error = engine
            .apply(QuoteStatus::Approved, QuoteStatus::Approved)
            .expect_err("approved -> approved is not in the table");

        assert_eq!(
            error,
            DomainError::InvalidQuoteTransition {
                from: QuoteStatus::Approved,
                to: QuoteStatus::Approved,
            }
        );
    }

    #[test]
    fn engine_agrees_with_status_table_for_every_pair() {
        let engine = LifecycleEngine::new(StandardLifecycle);
        for from in QuoteStatus::ALL {
            for to in QuoteStatus::ALL {
                assert_eq!(
                    engine.apply(from, to).is_ok(),
                    from.can_transition_to(to),
                    "{from} -> {to}"
                );
            }
        }
        assert_eq!(engine.initial_status(), QuoteStatus::Draft);
        assert_eq!(StandardLifecycle.initial_status(), QuoteStatus::Draft);
    }

    #[test]
    fn audit_records_applied_and_rejected_transitions() {
        let engine = LifecycleEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(QuoteId("Q-7".to_owned())), "req-9", "test");

        engine
            .apply_with_audit(QuoteStatus::Draft, QuoteStatus::Sent, &sink, &audit)
            .expect("draft -> sent");
        engine
            .apply_with_audit(QuoteStatus::Cancelled, QuoteStatus::Sent, &sink, &audit)
            .expect_err("cancelled is terminal");

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "quote.status_changed");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("sent"));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        assert!(events.iter().all(|event| event.correlation_id == "req-9"));
    }
}
