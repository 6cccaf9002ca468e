use chrono::Utc;
use lettrage_core::{
    calculate_stats, DateRange, EventBus, GatewayError, Invoice, InvoiceProvider, LettrageError,
    LettrageStats, Match, Payment, PersistenceGateway,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::match_engine::{AutoMatchEngine, Claims};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PaymentsImported { count: usize },
    InvoicesLoaded { count: usize },
    MatchesChanged { active: usize },
    Validated { validated: usize, failed: usize },
    Restored,
    Reset,
}

/// A payment as stored in a saved project, with its matched flag at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPayment {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(default)]
    pub is_matched: bool,
}

/// Serialized form of a session. The unmatched lists are written verbatim
/// for readers of the blob; restore derives them again from `matches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub payments: Vec<SavedPayment>,
    pub matches: Vec<Match>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub unmatched_invoices: Vec<Invoice>,
    #[serde(default)]
    pub unmatched_payments: Vec<SavedPayment>,
}

impl ProjectSnapshot {
    pub fn to_json(&self) -> Result<String, LettrageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `null` is accepted and yields `None`.
    pub fn from_json(raw: &str) -> Result<Option<Self>, LettrageError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Outcome of [`LettrageSession::validate_all`]. Commits continue past
/// failures, so a report may be partial.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub total: usize,
    pub validated: Vec<Uuid>,
    pub failed: Vec<(Uuid, GatewayError)>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} matches validated", self.validated.len(), self.total)
    }
}

/// In-memory working set of one reconciliation exercise.
#[derive(Debug)]
pub struct LettrageSession {
    scope: String,
    payments: Vec<Payment>,
    invoices: Vec<Invoice>,
    matches: Vec<Match>,
    selected_period: DateRange,
    events: EventBus<SessionEvent>,
}

impl Default for LettrageSession {
    fn default() -> Self {
        Self::new(DateRange::year_to_date(Utc::now().date_naive()))
    }
}

impl LettrageSession {
    pub fn new(selected_period: DateRange) -> Self {
        Self {
            scope: "default".to_string(),
            payments: Vec::new(),
            invoices: Vec::new(),
            matches: Vec::new(),
            selected_period,
            events: EventBus::new(),
        }
    }

    /// Scope used for event throttling; one per session key.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_event_throttle(mut self, window: Duration) -> Self {
        self.events = EventBus::with_throttle(window);
        self
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn invoices(&self) -> &[Invoice] {
        &self.invoices
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn match_by_id(&self, match_id: Uuid) -> Option<&Match> {
        self.matches.iter().find(|m| m.id == match_id)
    }

    pub fn selected_period(&self) -> DateRange {
        self.selected_period
    }

    pub fn set_selected_period(&mut self, period: DateRange) {
        self.selected_period = period;
    }

    // ── Pool population ───────────────────────────────────────────────────────

    /// Replaces the payment pool. Active matches refer to rows of the previous
    /// statement and are dropped.
    pub fn import_payments(&mut self, payments: Vec<Payment>) {
        if !self.matches.is_empty() {
            tracing::warn!(
                dropped = self.matches.len(),
                "new statement imported, discarding existing matches"
            );
        }
        self.matches.clear();
        self.payments = payments;
        self.publish(SessionEvent::PaymentsImported {
            count: self.payments.len(),
        });
    }

    pub fn set_invoices(&mut self, invoices: Vec<Invoice>) {
        self.invoices = invoices;
        self.publish(SessionEvent::InvoicesLoaded {
            count: self.invoices.len(),
        });
    }

    /// Fetches the selected period's invoices from `provider` into the pool.
    ///
    /// The provider omits invoices that already have a committed match, so
    /// invoices referenced by active matches are carried over from the
    /// current pool. Every match keeps its invoice in the pool.
    pub async fn load_invoices(
        &mut self,
        provider: &dyn InvoiceProvider,
        tenant_id: &str,
    ) -> Result<usize, LettrageError> {
        let fetched = provider
            .unmatched_invoices(tenant_id, self.selected_period)
            .await?;
        let count = fetched.len();

        let claims = self.claims();
        let fetched_ids: HashSet<&str> = fetched.iter().map(|i| i.id.as_str()).collect();
        let mut invoices: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| claims.has_invoice(&i.id) && !fetched_ids.contains(i.id.as_str()))
            .cloned()
            .collect();
        let carried = invoices.len();
        invoices.extend(fetched);

        tracing::info!(
            tenant = tenant_id,
            period = %self.selected_period,
            count,
            carried,
            "invoices loaded"
        );
        self.set_invoices(invoices);
        Ok(count)
    }

    // ── Derived views ─────────────────────────────────────────────────────────

    pub fn claims(&self) -> Claims {
        Claims::from_matches(&self.matches)
    }

    pub fn is_payment_matched(&self, payment_id: &str) -> bool {
        self.matches.iter().any(|m| m.payment_id == payment_id)
    }

    pub fn is_invoice_matched(&self, invoice_id: &str) -> bool {
        self.matches.iter().any(|m| m.invoice_id == invoice_id)
    }

    pub fn unmatched_invoices(&self) -> Vec<&Invoice> {
        let claims = self.claims();
        self.invoices
            .iter()
            .filter(|i| !claims.has_invoice(&i.id))
            .collect()
    }

    pub fn unmatched_payments(&self) -> Vec<&Payment> {
        let claims = self.claims();
        self.payments
            .iter()
            .filter(|p| !claims.has_payment(&p.id))
            .collect()
    }

    pub fn stats(&self) -> LettrageStats {
        calculate_stats(&self.invoices, &self.payments, &self.matches)
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    /// Runs a first-fit pass over the pool and appends the new matches.
    pub fn run_automatic_matching(&mut self, engine: &AutoMatchEngine) -> &[Match] {
        let found = engine.find_matches(&self.invoices, &self.payments, &self.claims());
        let start = self.matches.len();
        self.matches.extend(found);
        if self.matches.len() > start {
            self.notify_matches_changed();
        }
        &self.matches[start..]
    }

    pub fn add_manual_match(&mut self, invoice_id: &str, payment_id: &str) -> Result<&Match, LettrageError> {
        let claims = self.claims();
        let invoice = self
            .invoices
            .iter()
            .find(|i| i.id == invoice_id && !claims.has_invoice(&i.id))
            .ok_or_else(|| LettrageError::InvoiceNotAvailable(invoice_id.to_string()))?;
        let invoice_amount = invoice
            .amount
            .ok_or_else(|| LettrageError::InvoiceWithoutAmount(invoice_id.to_string()))?;
        let payment = self
            .payments
            .iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| LettrageError::PaymentNotFound(payment_id.to_string()))?;
        if claims.has_payment(payment_id) {
            return Err(LettrageError::PaymentAlreadyMatched(payment_id.to_string()));
        }

        let m = Match::propose(&invoice.id, invoice_amount, payment, false);
        tracing::info!(invoice = %m.invoice_id, payment = %m.payment_id, difference = %m.difference, "manual match");
        let index = self.matches.len();
        self.matches.push(m);
        self.notify_matches_changed();
        Ok(&self.matches[index])
    }

    /// Removes a proposed match, freeing its invoice and payment. Validated
    /// matches can only be reversed with [`LettrageSession::cancel_match`].
    pub fn remove_match(&mut self, match_id: Uuid) -> Result<Match, LettrageError> {
        let index = self
            .matches
            .iter()
            .position(|m| m.id == match_id)
            .ok_or(LettrageError::MatchNotFound(match_id))?;
        if self.matches[index].is_validated {
            return Err(LettrageError::MatchValidated(match_id));
        }

        let removed = self.matches.remove(index);
        self.notify_matches_changed();
        Ok(removed)
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Commits every proposed match. A failed commit is recorded in the
    /// report and the remaining matches are still attempted.
    pub async fn validate_all(
        &mut self,
        gateway: &dyn PersistenceGateway,
        tenant_id: &str,
        user_id: &str,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        for m in self.matches.iter_mut().filter(|m| !m.is_validated) {
            report.total += 1;
            match gateway.commit_match(m, tenant_id, user_id).await {
                Ok(record_id) => {
                    m.mark_validated(record_id, Utc::now());
                    report.validated.push(m.id);
                }
                Err(err) => {
                    tracing::warn!(match_id = %m.id, invoice = %m.invoice_id, error = %err, "match commit failed");
                    report.failed.push((m.id, err));
                }
            }
        }

        tracing::info!(
            validated = report.validated.len(),
            failed = report.failed.len(),
            "validation finished"
        );
        if report.total > 0 {
            self.publish(SessionEvent::Validated {
                validated: report.validated.len(),
                failed: report.failed.len(),
            });
        }
        report
    }

    /// Reverses a validated match through the gateway and drops it from the session.
    pub async fn cancel_match(
        &mut self,
        gateway: &dyn PersistenceGateway,
        match_id: Uuid,
    ) -> Result<Match, LettrageError> {
        let index = self
            .matches
            .iter()
            .position(|m| m.id == match_id)
            .ok_or(LettrageError::MatchNotFound(match_id))?;
        let (record_id, invoice_id) = match &self.matches[index] {
            Match {
                is_validated: true,
                record_id: Some(record_id),
                invoice_id,
                ..
            } => (*record_id, invoice_id.clone()),
            _ => return Err(LettrageError::MatchNotValidated(match_id)),
        };

        gateway.cancel_match(record_id, &invoice_id).await?;
        let removed = self.matches.remove(index);
        tracing::info!(match_id = %match_id, invoice = %invoice_id, "validated match cancelled");
        self.notify_matches_changed();
        Ok(removed)
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        let claims = self.claims();
        let saved = |p: &Payment| SavedPayment {
            payment: p.clone(),
            is_matched: claims.has_payment(&p.id),
        };
        ProjectSnapshot {
            payments: self.payments.iter().map(saved).collect(),
            matches: self.matches.clone(),
            invoices: self.invoices.clone(),
            unmatched_invoices: self.unmatched_invoices().into_iter().cloned().collect(),
            unmatched_payments: self.unmatched_payments().into_iter().map(saved).collect(),
        }
    }

    /// Replaces payments, invoices and matches with the snapshot's. The
    /// selected period is kept. Returns `false` when there was nothing to restore.
    pub fn restore(&mut self, snapshot: Option<ProjectSnapshot>) -> bool {
        let Some(snapshot) = snapshot else {
            return false;
        };

        let claims = Claims::from_matches(&snapshot.matches);
        let disagreeing = snapshot
            .payments
            .iter()
            .filter(|s| s.is_matched != claims.has_payment(&s.payment.id))
            .count();
        if disagreeing > 0 {
            tracing::warn!(disagreeing, "saved matched flags disagree with saved matches, using matches");
        }

        self.payments = snapshot.payments.into_iter().map(|s| s.payment).collect();
        self.invoices = if snapshot.invoices.is_empty() {
            snapshot.unmatched_invoices
        } else {
            snapshot.invoices
        };
        self.matches = snapshot.matches;
        self.publish(SessionEvent::Restored);
        true
    }

    pub async fn save_project(
        &self,
        gateway: &dyn PersistenceGateway,
        project_id: &str,
    ) -> Result<(), LettrageError> {
        let json = self.snapshot().to_json()?;
        gateway.save_project_state(project_id, &json).await?;
        tracing::info!(project = project_id, bytes = json.len(), "project saved");
        Ok(())
    }

    pub async fn load_project(
        &mut self,
        gateway: &dyn PersistenceGateway,
        project_id: &str,
    ) -> Result<bool, LettrageError> {
        let snapshot = match gateway.load_project_state(project_id).await? {
            Some(raw) => ProjectSnapshot::from_json(&raw)?,
            None => None,
        };
        let restored = self.restore(snapshot);
        tracing::info!(project = project_id, restored, "project loaded");
        Ok(restored)
    }

    /// Empties the session and resets the period to the current year.
    pub fn reset(&mut self) {
        self.payments.clear();
        self.invoices.clear();
        self.matches.clear();
        self.selected_period = DateRange::year_to_date(Utc::now().date_naive());
        self.publish(SessionEvent::Reset);
    }

    fn notify_matches_changed(&self) {
        self.publish(SessionEvent::MatchesChanged {
            active: self.matches.len(),
        });
    }

    /// Delivers the last event held back by the throttle. Hosts call this
    /// when a burst of mutations is over.
    pub fn flush_events(&self) -> bool {
        self.events.flush(&self.scope)
    }

    fn publish(&self, event: SessionEvent) {
        self.events.publish(&self.scope, &event);
    }
}
