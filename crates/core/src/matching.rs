use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::money::Money;
use super::payment::Payment;

/// Identifier handed back by the persistence gateway when a match is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchRecordId(pub i64);

impl fmt::Display for MatchRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Proposed,
    Validated,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Proposed => write!(f, "proposed"),
            MatchStatus::Validated => write!(f, "validated"),
        }
    }
}

/// A one-to-one link between an invoice and a payment.
///
/// Amounts are captured when the match is created, so later edits to the
/// invoice do not change what was matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: Uuid,
    pub invoice_id: String,
    pub payment_id: String,
    pub invoice_amount: Money,
    pub payment_amount: Money,
    pub difference: Money,
    pub is_automatic: bool,
    pub is_validated: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<MatchRecordId>,
}

impl Match {
    pub fn propose(
        invoice_id: impl Into<String>,
        invoice_amount: Money,
        payment: &Payment,
        is_automatic: bool,
    ) -> Self {
        Match {
            id: Uuid::new_v4(),
            invoice_id: invoice_id.into(),
            payment_id: payment.id.clone(),
            invoice_amount,
            payment_amount: payment.amount,
            difference: invoice_amount.abs_diff(payment.amount),
            is_automatic,
            is_validated: false,
            created_at: Utc::now(),
            validated_at: None,
            record_id: None,
        }
    }

    pub fn status(&self) -> MatchStatus {
        if self.is_validated {
            MatchStatus::Validated
        } else {
            MatchStatus::Proposed
        }
    }

    pub fn mark_validated(&mut self, record_id: MatchRecordId, at: DateTime<Utc>) {
        self.is_validated = true;
        self.validated_at = Some(at);
        self.record_id = Some(record_id);
    }
}
