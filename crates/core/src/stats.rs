use serde::Serialize;

use super::invoice::Invoice;
use super::matching::Match;
use super::money::Money;
use super::payment::Payment;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LettrageStats {
    pub total_invoices: usize,
    pub total_payments: usize,
    pub matched_invoices: usize,
    pub matched_payments: usize,
    pub unmatched_invoices: usize,
    pub unmatched_payments: usize,
    pub total_invoice_amount: Money,
    pub total_payment_amount: Money,
    /// Sum of the invoice-side amounts of active matches.
    pub matched_amount: Money,
    pub unmatched_invoice_amount: Money,
    /// Percentage of invoices matched, 0 when there are no invoices.
    pub matching_rate: f64,
}

/// Aggregate view over a session. Pure; safe to call as often as needed.
pub fn calculate_stats(invoices: &[Invoice], payments: &[Payment], matches: &[Match]) -> LettrageStats {
    let total_invoices = invoices.len();
    let total_payments = payments.len();
    // One invoice and one payment per match.
    let matched_invoices = matches.len();
    let matched_payments = matches.len();

    let total_invoice_amount: Money = invoices.iter().filter_map(|i| i.amount).sum();
    let total_payment_amount: Money = payments.iter().map(|p| p.amount).sum();
    let matched_amount: Money = matches.iter().map(|m| m.invoice_amount).sum();

    let matching_rate = if total_invoices > 0 {
        matched_invoices as f64 / total_invoices as f64 * 100.0
    } else {
        0.0
    };

    LettrageStats {
        total_invoices,
        total_payments,
        matched_invoices,
        matched_payments,
        unmatched_invoices: total_invoices.saturating_sub(matched_invoices),
        unmatched_payments: total_payments.saturating_sub(matched_payments),
        total_invoice_amount,
        total_payment_amount,
        matched_amount,
        unmatched_invoice_amount: total_invoice_amount - matched_amount,
        matching_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn invoice(id: &str, cents: Option<i64>) -> Invoice {
        Invoice::new(id, cents.map(Money::from_cents), date())
    }

    fn payment(row: usize, cents: i64) -> Payment {
        Payment::from_row(row, date(), Money::from_cents(cents), None)
    }

    #[test]
    fn empty_inputs_yield_zero_rate() {
        let stats = calculate_stats(&[], &[], &[]);
        assert_eq!(stats.total_invoices, 0);
        assert_eq!(stats.matching_rate, 0.0);
        assert!(stats.matched_amount.is_zero());
    }

    #[test]
    fn counts_amounts_and_rate() {
        let invoices = vec![invoice("i1", Some(15000)), invoice("i2", Some(9000)), invoice("i3", None)];
        let payments = vec![payment(1, 15000), payment(2, 8990)];
        let matches = vec![Match::propose("i2", Money::from_cents(9000), &payments[1], false)];

        let stats = calculate_stats(&invoices, &payments, &matches);
        assert_eq!(stats.total_invoices, 3);
        assert_eq!(stats.total_payments, 2);
        assert_eq!(stats.matched_invoices, 1);
        assert_eq!(stats.matched_payments, 1);
        assert_eq!(stats.unmatched_invoices, 2);
        assert_eq!(stats.unmatched_payments, 1);
        assert_eq!(stats.total_invoice_amount, Money::from_cents(24000));
        assert_eq!(stats.total_payment_amount, Money::from_cents(23990));
        // Invoice side, not the 89.90 payment side.
        assert_eq!(stats.matched_amount, Money::from_cents(9000));
        assert_eq!(stats.unmatched_invoice_amount, Money::from_cents(15000));
        assert!((stats.matching_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn calling_twice_gives_identical_output() {
        let invoices = vec![invoice("i1", Some(15000))];
        let payments = vec![payment(1, 15000)];
        let matches = vec![Match::propose("i1", Money::from_cents(15000), &payments[0], true)];
        assert_eq!(
            calculate_stats(&invoices, &payments, &matches),
            calculate_stats(&invoices, &payments, &matches)
        );
    }
}
