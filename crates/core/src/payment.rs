use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

/// One bank-statement line, immutable once imported.
///
/// Whether a payment is claimed by a match is owned by the session, not by
/// the payment itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub date: NaiveDate,
    /// Magnitude only; the statement's debit/credit sign is discarded.
    pub amount: Money,
    pub original_row: usize,
    pub description: String,
}

impl Payment {
    pub fn from_row(row: usize, date: NaiveDate, amount: Money, description: Option<String>) -> Self {
        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Paiement ligne {row}"));
        Payment {
            id: Self::row_id(row),
            date,
            amount: amount.abs(),
            original_row: row,
            description,
        }
    }

    pub fn row_id(row: usize) -> String {
        format!("csv_{row}")
    }
}
