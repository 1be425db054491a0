use std::fmt;

use thiserror::Error;

use crate::{cpq::inventory::StockShortfall, domain::quote::QuoteStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Client,
    Product,
    Quote,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Product => "product",
            Self::Quote => "quote",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("{kind} `{id}` was not found or is inactive")]
    Reference { kind: ReferenceKind, id: String },
    #[error("invalid quote transition from {from} to {to}")]
    InvalidQuoteTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("quote cannot be changed while {status}")]
    NotEditable { status: QuoteStatus },
    #[error("insufficient stock for {} product(s)", .shortfalls.len())]
    InsufficientStock { shortfalls: Vec<StockShortfall> },
    #[error("quote `{quote_id}` was modified concurrently")]
    ConcurrentModification { quote_id: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn reference(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self::Reference { kind, id: id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Infrastructure failures may succeed on retry; business errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Timeout(_))
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, details: Vec<String>, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Message safe to show to the end user. Business errors are specific;
    /// infrastructure errors stay generic so internals never leak.
    pub fn user_message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. } => message,
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn details(&self) -> &[String] {
        match self {
            Self::Conflict { details, .. } => details,
            _ => &[],
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => match error {
                DomainError::Validation { .. } | DomainError::InvariantViolation(_) => {
                    Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
                }
                DomainError::Reference { .. } => {
                    Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
                }
                DomainError::InsufficientStock { ref shortfalls } => Self::Conflict {
                    message: "Not enough stock to approve this quote.".to_owned(),
                    details: shortfalls.iter().map(ToString::to_string).collect(),
                    correlation_id: unassigned(),
                },
                DomainError::InvalidQuoteTransition { .. }
                | DomainError::NotEditable { .. }
                | DomainError::ConcurrentModification { .. } => Self::Conflict {
                    message: error.to_string(),
                    details: Vec::new(),
                    correlation_id: unassigned(),
                },
            },
            ApplicationError::Persistence(message) | ApplicationError::Timeout(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cpq::inventory::StockShortfall;
    use crate::domain::product::ProductId;
    use crate::domain::quote::QuoteStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError, ReferenceKind};

    #[test]
    fn validation_error_maps_to_bad_request_with_specific_message() {
        let error = DomainError::validation("lines", "a quote needs at least one line");
        let interface = ApplicationError::from(error).into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "invalid `lines`: a quote needs at least one line");
    }

    #[test]
    fn missing_reference_maps_to_not_found() {
        let interface =
            ApplicationError::from(DomainError::reference(ReferenceKind::Client, "client-404"))
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::NotFound { .. }));
        assert_eq!(interface.user_message(), "client `client-404` was not found or is inactive");
    }

    #[test]
    fn insufficient_stock_carries_every_shortfall() {
        let interface = ApplicationError::from(DomainError::InsufficientStock {
            shortfalls: vec![
                StockShortfall {
                    product_id: ProductId("prod-a".to_owned()),
                    product_name: "Widget".to_owned(),
                    required: 6,
                    available: 5,
                },
                StockShortfall {
                    product_id: ProductId("prod-b".to_owned()),
                    product_name: "Gadget".to_owned(),
                    required: 3,
                    available: 0,
                },
            ],
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.details(),
            ["Widget: required 6, available 5", "Gadget: required 3, available 0"]
        );
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::InvalidQuoteTransition {
            from: QuoteStatus::Approved,
            to: QuoteStatus::Approved,
        })
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.user_message(), "invalid quote transition from approved to approved");
    }

    #[test]
    fn infrastructure_errors_are_generic_and_retryable() {
        let error = ApplicationError::Timeout("change_status exceeded 10s".to_owned());
        assert!(error.is_retryable());

        let interface = error.into_interface("req-5");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
        assert_eq!(interface.correlation_id(), "req-5");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let error = ApplicationError::Configuration("missing thresholds".to_owned());
        let interface = error.into_interface("req-6");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
        assert!(!ApplicationError::Configuration(String::new()).is_retryable());
    }
}
