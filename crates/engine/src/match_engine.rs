use std::collections::HashSet;

use lettrage_core::{Invoice, Match, Money, Payment};

/// Invoice and payment ids already held by active matches.
#[derive(Debug, Clone, Default)]
pub struct Claims {
    invoices: HashSet<String>,
    payments: HashSet<String>,
}

impl Claims {
    pub fn from_matches<'a>(matches: impl IntoIterator<Item = &'a Match>) -> Self {
        let mut claims = Claims::default();
        for m in matches {
            claims.claim(&m.invoice_id, &m.payment_id);
        }
        claims
    }

    pub fn claim(&mut self, invoice_id: &str, payment_id: &str) {
        self.invoices.insert(invoice_id.to_string());
        self.payments.insert(payment_id.to_string());
    }

    pub fn has_invoice(&self, invoice_id: &str) -> bool {
        self.invoices.contains(invoice_id)
    }

    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.payments.contains(payment_id)
    }
}

/// Greedy first-fit matcher.
///
/// Invoices are visited in the order given; for each, payments are scanned in
/// the order given and the first unclaimed one within `tolerance` wins, even
/// if a later payment is closer.
#[derive(Debug, Clone)]
pub struct AutoMatchEngine {
    pub tolerance: Money,
}

impl Default for AutoMatchEngine {
    fn default() -> Self {
        Self {
            tolerance: Money::from_cents(1),
        }
    }
}

impl AutoMatchEngine {
    pub fn new(tolerance: Money) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn within_tolerance(&self, invoice_amount: Money, payment_amount: Money) -> bool {
        invoice_amount.abs_diff(payment_amount) <= self.tolerance
    }

    /// Returns only the matches created by this pass; `claims` is not modified.
    pub fn find_matches(&self, invoices: &[Invoice], payments: &[Payment], claims: &Claims) -> Vec<Match> {
        let mut pass = claims.clone();
        let mut matches = Vec::new();

        for invoice in invoices {
            let Some(invoice_amount) = invoice.amount else {
                continue;
            };
            if pass.has_invoice(&invoice.id) {
                continue;
            }

            let candidate = payments
                .iter()
                .filter(|p| !pass.has_payment(&p.id))
                .find(|p| self.within_tolerance(invoice_amount, p.amount));

            if let Some(payment) = candidate {
                let m = Match::propose(&invoice.id, invoice_amount, payment, true);
                tracing::debug!(
                    invoice = %m.invoice_id,
                    payment = %m.payment_id,
                    difference = %m.difference,
                    "automatic match"
                );
                pass.claim(&invoice.id, &payment.id);
                matches.push(m);
            }
        }

        tracing::info!(
            proposed = matches.len(),
            invoices = invoices.len(),
            payments = payments.len(),
            tolerance = %self.tolerance,
            "automatic matching pass finished"
        );
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn inv(id: &str, cents: Option<i64>) -> Invoice {
        Invoice::new(id, cents.map(Money::from_cents), date())
    }

    fn pay(row: usize, cents: i64) -> Payment {
        Payment::from_row(row, date(), Money::from_cents(cents), None)
    }

    fn pairs(matches: &[Match]) -> Vec<(&str, &str)> {
        matches
            .iter()
            .map(|m| (m.invoice_id.as_str(), m.payment_id.as_str()))
            .collect()
    }

    #[test]
    fn first_fit_preserves_supplied_order() {
        let engine = AutoMatchEngine::new(Money::zero());
        let invoices = vec![inv("A", Some(10000)), inv("B", Some(10000))];
        let payments = vec![pay(1, 10000), pay(2, 10000)];
        let found = engine.find_matches(&invoices, &payments, &Claims::default());
        assert_eq!(pairs(&found), vec![("A", "csv_1"), ("B", "csv_2")]);
        assert!(found.iter().all(|m| m.is_automatic && !m.is_validated));
    }

    #[test]
    fn first_candidate_wins_over_closer_one() {
        let engine = AutoMatchEngine::new(Money::from_cents(100));
        let invoices = vec![inv("A", Some(10000))];
        let payments = vec![pay(1, 10090), pay(2, 10000)];
        let found = engine.find_matches(&invoices, &payments, &Claims::default());
        assert_eq!(pairs(&found), vec![("A", "csv_1")]);
        assert_eq!(found[0].difference, Money::from_cents(90));
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let engine = AutoMatchEngine::new(Money::from_cents(5));
        let payments = vec![pay(1, 10005)];
        let at_limit = engine.find_matches(&[inv("A", Some(10000))], &payments, &Claims::default());
        assert_eq!(at_limit.len(), 1);

        let payments = vec![pay(1, 10006)];
        let one_cent_over = engine.find_matches(&[inv("A", Some(10000))], &payments, &Claims::default());
        assert!(one_cent_over.is_empty());
    }

    #[test]
    fn invoices_without_amount_are_skipped() {
        let engine = AutoMatchEngine::default();
        let found = engine.find_matches(&[inv("A", None)], &[pay(1, 0)], &Claims::default());
        assert!(found.is_empty());
    }

    #[test]
    fn existing_claims_are_respected() {
        let engine = AutoMatchEngine::default();
        let invoices = vec![inv("A", Some(500)), inv("B", Some(500))];
        let payments = vec![pay(1, 500), pay(2, 500)];
        let mut claims = Claims::default();
        claims.claim("A", "csv_1");

        let found = engine.find_matches(&invoices, &payments, &claims);
        assert_eq!(pairs(&found), vec![("B", "csv_2")]);
        // The caller's claims are left alone.
        assert!(!claims.has_invoice("B"));
    }

    #[test]
    fn duplicate_invoice_ids_claim_once() {
        let engine = AutoMatchEngine::default();
        let invoices = vec![inv("A", Some(500)), inv("A", Some(500))];
        let payments = vec![pay(1, 500), pay(2, 500)];
        let found = engine.find_matches(&invoices, &payments, &Claims::default());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn each_payment_used_at_most_once() {
        let engine = AutoMatchEngine::default();
        let invoices = vec![inv("A", Some(500)), inv("B", Some(500)), inv("C", Some(500))];
        let payments = vec![pay(1, 500)];
        let found = engine.find_matches(&invoices, &payments, &Claims::default());
        assert_eq!(pairs(&found), vec![("A", "csv_1")]);
    }

    #[test]
    fn negative_tolerance_is_treated_as_magnitude() {
        let engine = AutoMatchEngine::new(Money::from_cents(-10));
        assert!(engine.within_tolerance(Money::from_cents(100), Money::from_cents(110)));
    }

    #[test]
    fn claims_from_matches() {
        let p = pay(3, 100);
        let m = Match::propose("X", Money::from_cents(100), &p, false);
        let claims = Claims::from_matches([&m]);
        assert!(claims.has_invoice("X"));
        assert!(claims.has_payment("csv_3"));
        assert!(!claims.has_payment("csv_1"));
    }
}
