use thiserror::Error;
use uuid::Uuid;

use super::gateway::GatewayError;

/// Failures of session operations. Invalid operations leave the session unchanged.
#[derive(Debug, Error)]
pub enum LettrageError {
    #[error("Invoice {0} is not among the unmatched invoices")]
    InvoiceNotAvailable(String),
    #[error("Invoice {0} has no amount and cannot be matched")]
    InvoiceWithoutAmount(String),
    #[error("Payment {0} not found")]
    PaymentNotFound(String),
    #[error("Payment {0} is already matched")]
    PaymentAlreadyMatched(String),
    #[error("Match {0} not found")]
    MatchNotFound(Uuid),
    #[error("Match {0} is validated and cannot be removed")]
    MatchValidated(Uuid),
    #[error("Match {0} has not been validated")]
    MatchNotValidated(Uuid),
    #[error("Saved project is unreadable: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl LettrageError {
    /// True for errors caused by the request itself rather than a collaborator.
    pub fn is_invalid_operation(&self) -> bool {
        !matches!(self, LettrageError::Gateway(_) | LettrageError::Snapshot(_))
    }
}
