use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

use super::invoice::Invoice;
use super::matching::{Match, MatchRecordId};
use super::period::DateRange;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Invoice {invoice_id} is already reconciled")]
    DuplicateCommit { invoice_id: String },
    #[error("Invoice {0} is unknown to the store")]
    UnknownInvoice(String),
    #[error("Match record {0} not found")]
    RecordNotFound(MatchRecordId),
    #[error("Could not {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },
}

impl GatewayError {
    /// Wraps a storage-layer error with the operation that failed.
    pub fn storage(operation: &'static str, err: impl fmt::Display) -> Self {
        GatewayError::Storage {
            operation,
            message: err.to_string(),
        }
    }
}

/// Source of invoices awaiting reconciliation.
#[async_trait]
pub trait InvoiceProvider: Send + Sync {
    /// Invoices of `tenant_id` dated within `period` (inclusive) that have an
    /// amount and are not linked to a committed match. The order must be
    /// stable across calls.
    async fn unmatched_invoices(
        &self,
        tenant_id: &str,
        period: DateRange,
    ) -> Result<Vec<Invoice>, GatewayError>;
}

/// Durable storage for validated matches and saved projects.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Records `m` and marks its invoice reconciled. A second commit for the
    /// same invoice is rejected with [`GatewayError::DuplicateCommit`].
    async fn commit_match(
        &self,
        m: &Match,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<MatchRecordId, GatewayError>;

    /// Reverses a committed match and un-reconciles its invoice.
    async fn cancel_match(&self, record_id: MatchRecordId, invoice_id: &str) -> Result<(), GatewayError>;

    async fn save_project_state(&self, project_id: &str, state: &str) -> Result<(), GatewayError>;

    async fn load_project_state(&self, project_id: &str) -> Result<Option<String>, GatewayError>;
}

// ── In-memory gateway (tests and ephemeral hosts) ─────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedMatch {
    pub record_id: MatchRecordId,
    pub match_id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub invoice_id: String,
    pub payment_id: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    invoices: Vec<(String, Invoice)>,
    reconciled: HashSet<(String, String)>,
    commits: BTreeMap<i64, CommittedMatch>,
    next_record: i64,
    projects: HashMap<String, String>,
    failing_invoices: HashSet<String>,
}

/// Keeps everything in process memory. Commits for invoices registered with
/// [`MemoryGateway::fail_commits_for`] fail with `Unavailable`.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invoices(tenant_id: &str, invoices: impl IntoIterator<Item = Invoice>) -> Self {
        let gateway = Self::new();
        for invoice in invoices {
            gateway.add_invoice(tenant_id, invoice);
        }
        gateway
    }

    pub fn add_invoice(&self, tenant_id: &str, invoice: Invoice) {
        self.lock().invoices.push((tenant_id.to_string(), invoice));
    }

    pub fn fail_commits_for(&self, invoice_id: &str) {
        self.lock().failing_invoices.insert(invoice_id.to_string());
    }

    pub fn is_reconciled(&self, tenant_id: &str, invoice_id: &str) -> bool {
        self.lock()
            .reconciled
            .contains(&(tenant_id.to_string(), invoice_id.to_string()))
    }

    pub fn committed(&self) -> Vec<CommittedMatch> {
        self.lock().commits.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InvoiceProvider for MemoryGateway {
    async fn unmatched_invoices(
        &self,
        tenant_id: &str,
        period: DateRange,
    ) -> Result<Vec<Invoice>, GatewayError> {
        let state = self.lock();
        Ok(state
            .invoices
            .iter()
            .filter(|(tenant, invoice)| {
                tenant == tenant_id
                    && invoice.amount.is_some()
                    && period.contains(invoice.document_date)
                    && !state.reconciled.contains(&(tenant.clone(), invoice.id.clone()))
            })
            .map(|(_, invoice)| invoice.clone())
            .collect())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn commit_match(
        &self,
        m: &Match,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<MatchRecordId, GatewayError> {
        let mut state = self.lock();
        if state.failing_invoices.contains(&m.invoice_id) {
            return Err(GatewayError::Unavailable(format!(
                "commit rejected for invoice {}",
                m.invoice_id
            )));
        }
        let key = (tenant_id.to_string(), m.invoice_id.clone());
        if state.reconciled.contains(&key) {
            return Err(GatewayError::DuplicateCommit {
                invoice_id: m.invoice_id.clone(),
            });
        }

        state.next_record += 1;
        let record_id = MatchRecordId(state.next_record);
        state.reconciled.insert(key);
        state.commits.insert(
            record_id.0,
            CommittedMatch {
                record_id,
                match_id: m.id,
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
                invoice_id: m.invoice_id.clone(),
                payment_id: m.payment_id.clone(),
            },
        );
        Ok(record_id)
    }

    async fn cancel_match(&self, record_id: MatchRecordId, invoice_id: &str) -> Result<(), GatewayError> {
        let mut state = self.lock();
        match state.commits.get(&record_id.0) {
            Some(commit) if commit.invoice_id == invoice_id => {}
            _ => return Err(GatewayError::RecordNotFound(record_id)),
        }
        if let Some(commit) = state.commits.remove(&record_id.0) {
            state.reconciled.remove(&(commit.tenant_id, commit.invoice_id));
        }
        Ok(())
    }

    async fn save_project_state(&self, project_id: &str, serialized: &str) -> Result<(), GatewayError> {
        self.lock()
            .projects
            .insert(project_id.to_string(), serialized.to_string());
        Ok(())
    }

    async fn load_project_state(&self, project_id: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.lock().projects.get(project_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::payment::Payment;
    use chrono::NaiveDate;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn q1() -> DateRange {
        DateRange::new(date(1, 1), date(3, 31))
    }

    fn proposed(invoice_id: &str) -> Match {
        let p = Payment::from_row(1, date(3, 1), Money::from_cents(100), None);
        Match::propose(invoice_id, Money::from_cents(100), &p, true)
    }

    #[tokio::test]
    async fn provider_filters_tenant_period_and_missing_amounts() {
        let gw = MemoryGateway::new();
        gw.add_invoice("acme", Invoice::new("i1", Some(Money::from_cents(100)), date(2, 1)));
        gw.add_invoice("acme", Invoice::new("i2", None, date(2, 1)));
        gw.add_invoice("acme", Invoice::new("i3", Some(Money::from_cents(100)), date(5, 1)));
        gw.add_invoice("other", Invoice::new("i4", Some(Money::from_cents(100)), date(2, 1)));
        gw.add_invoice("acme", Invoice::new("i5", Some(Money::from_cents(100)), date(3, 31)));

        let ids: Vec<_> = gw
            .unmatched_invoices("acme", q1())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["i1", "i5"]);
    }

    #[tokio::test]
    async fn commit_hides_invoice_and_rejects_duplicates() {
        let gw = MemoryGateway::with_invoices(
            "acme",
            [Invoice::new("i1", Some(Money::from_cents(100)), date(2, 1))],
        );
        let record = gw.commit_match(&proposed("i1"), "acme", "alice").await.unwrap();
        assert!(gw.is_reconciled("acme", "i1"));
        assert!(gw.unmatched_invoices("acme", q1()).await.unwrap().is_empty());

        let again = gw.commit_match(&proposed("i1"), "acme", "alice").await;
        assert!(matches!(again, Err(GatewayError::DuplicateCommit { .. })));

        gw.cancel_match(record, "i1").await.unwrap();
        assert!(!gw.is_reconciled("acme", "i1"));
        assert_eq!(gw.unmatched_invoices("acme", q1()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_of_unknown_record_fails() {
        let gw = MemoryGateway::new();
        let err = gw.cancel_match(MatchRecordId(9), "i1").await.unwrap_err();
        assert_eq!(err, GatewayError::RecordNotFound(MatchRecordId(9)));
    }

    #[tokio::test]
    async fn failing_invoice_commit_is_unavailable() {
        let gw = MemoryGateway::new();
        gw.fail_commits_for("i1");
        let err = gw.commit_match(&proposed("i1"), "acme", "alice").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(gw.committed().is_empty());
    }

    #[tokio::test]
    async fn project_state_round_trip() {
        let gw = MemoryGateway::new();
        assert_eq!(gw.load_project_state("p1").await.unwrap(), None);
        gw.save_project_state("p1", "{\"payments\":[]}").await.unwrap();
        assert_eq!(
            gw.load_project_state("p1").await.unwrap().as_deref(),
            Some("{\"payments\":[]}")
        );
    }
}
