use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

/// A company document awaiting reconciliation. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    /// Invoices without an amount are never eligible for matching.
    pub amount: Option<Money>,
    pub document_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Invoice {
    pub fn new(id: impl Into<String>, amount: Option<Money>, document_date: NaiveDate) -> Self {
        Invoice {
            id: id.into(),
            amount,
            document_date,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
