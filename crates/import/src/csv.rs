use chrono::{NaiveDate, Utc};
use lettrage_core::Payment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use thiserror::Error;

use crate::util::{parse_amount, parse_date};

/// Raw statement: header cells plus data rows, as read from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// What to do with a row whose date cell cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnparseableDatePolicy {
    /// Drop the row, like a row with an unreadable amount.
    #[default]
    Skip,
    /// Keep the row and date it today.
    Today,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvColumnMapping {
    pub date_column: usize,
    pub amount_column: usize,
    pub description_column: Option<usize>,
    #[serde(default)]
    pub unparseable_dates: UnparseableDatePolicy,
}

impl CsvColumnMapping {
    pub fn new(date_column: usize, amount_column: usize, description_column: Option<usize>) -> Self {
        Self {
            date_column,
            amount_column,
            description_column,
            unparseable_dates: UnparseableDatePolicy::default(),
        }
    }

    pub fn with_date_policy(mut self, policy: UnparseableDatePolicy) -> Self {
        self.unparseable_dates = policy;
        self
    }

    fn min_columns(&self) -> usize {
        self.date_column.max(self.amount_column) + 1
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("No data rows")]
    NoDataRows,
    #[error("Could not find the {missing} column. Available columns: {}", .available.join(", "))]
    MissingColumns {
        missing: String,
        available: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooFewColumns,
    EmptyCell,
    InvalidAmount,
    InvalidDate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooFewColumns => write!(f, "too few columns"),
            SkipReason::EmptyCell => write!(f, "empty date or amount"),
            SkipReason::InvalidAmount => write!(f, "invalid amount"),
            SkipReason::InvalidDate => write!(f, "invalid date"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub payments: Vec<Payment>,
    pub skipped: Vec<SkippedRow>,
}

/// Splits delimited text into a header row and data rows. Records may have
/// differing lengths; short rows are dealt with by the mapper.
pub fn tokenize<R: Read>(data: R, delimiter: u8) -> Result<CsvTable, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(data);

    let mut records = reader.records();
    let headers = match records.next() {
        Some(record) => record?.iter().map(|s| s.trim().to_string()).collect(),
        None => return Err(ImportError::NoDataRows),
    };

    let mut rows = Vec::new();
    for result in records {
        let record = result?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }

    Ok(CsvTable { headers, rows })
}

/// Maps data rows to payments. Malformed rows are skipped and reported,
/// never fatal. Row `n` (1-based, header excluded) becomes `csv_<n>`.
pub fn parse_payments(table: &CsvTable, mapping: &CsvColumnMapping) -> Result<ImportOutcome, ImportError> {
    map_rows(table, mapping, Utc::now().date_naive())
}

fn map_rows(
    table: &CsvTable,
    mapping: &CsvColumnMapping,
    today: NaiveDate,
) -> Result<ImportOutcome, ImportError> {
    if table.rows.is_empty() {
        return Err(ImportError::NoDataRows);
    }

    let mut outcome = ImportOutcome::default();
    for (index, cells) in table.rows.iter().enumerate() {
        let row = index + 1;
        match map_row(cells, mapping, row, today) {
            Ok(payment) => outcome.payments.push(payment),
            Err(reason) => {
                tracing::debug!(row, %reason, "skipping statement row");
                outcome.skipped.push(SkippedRow { row, reason });
            }
        }
    }

    tracing::info!(
        imported = outcome.payments.len(),
        skipped = outcome.skipped.len(),
        "statement rows mapped"
    );
    Ok(outcome)
}

fn map_row(
    cells: &[String],
    mapping: &CsvColumnMapping,
    row: usize,
    today: NaiveDate,
) -> Result<Payment, SkipReason> {
    if cells.len() < mapping.min_columns() {
        return Err(SkipReason::TooFewColumns);
    }

    let date_cell = cells[mapping.date_column].trim();
    let amount_cell = cells[mapping.amount_column].trim();
    if date_cell.is_empty() || amount_cell.is_empty() {
        return Err(SkipReason::EmptyCell);
    }

    let amount = parse_amount(amount_cell).ok_or(SkipReason::InvalidAmount)?;
    let date = match (parse_date(date_cell), mapping.unparseable_dates) {
        (Some(date), _) => date,
        (None, UnparseableDatePolicy::Today) => today,
        (None, UnparseableDatePolicy::Skip) => return Err(SkipReason::InvalidDate),
    };

    let description = mapping
        .description_column
        .and_then(|col| cells.get(col))
        .map(|s| s.trim().to_string());

    Ok(Payment::from_row(row, date, amount, description))
}

const DATE_KEYWORDS: &[&str] = &["date", "datum", "jour"];
const AMOUNT_KEYWORDS: &[&str] = &["montant", "amount", "prix", "valeur", "somme"];
const DESCRIPTION_KEYWORDS: &[&str] = &["libellé", "libelle", "description", "label", "motif"];

/// Infers a mapping from header names (first matching header wins).
pub fn detect_mapping(headers: &[String]) -> Result<CsvColumnMapping, ImportError> {
    let find = |keywords: &[&str]| {
        headers.iter().position(|h| {
            let h = h.to_lowercase();
            keywords.iter().any(|k| h.contains(k))
        })
    };

    let missing = |what: &str| ImportError::MissingColumns {
        missing: what.to_string(),
        available: headers.to_vec(),
    };

    let date_column = find(DATE_KEYWORDS).ok_or_else(|| missing("date"))?;
    let amount_column = find(AMOUNT_KEYWORDS).ok_or_else(|| missing("amount"))?;
    let description_column = find(DESCRIPTION_KEYWORDS);

    Ok(CsvColumnMapping::new(date_column, amount_column, description_column))
}

/// Header-detection entry point kept for files imported without an explicit mapping.
pub fn parse_payments_auto(table: &CsvTable) -> Result<ImportOutcome, ImportError> {
    let mapping = detect_mapping(&table.headers)?;
    parse_payments(table, &mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettrage_core::Money;

    fn table(headers: &[&str], rows: &[&[&str]]) -> CsvTable {
        CsvTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── tokenize ──────────────────────────────────────────────────────────────

    #[test]
    fn tokenize_splits_header_and_rows() {
        let data = b"Date;Montant;Libelle\n01/03/2024;150,00;Loyer\n\n02/03/2024;89.90\n";
        let t = tokenize(data.as_ref(), b';').unwrap();
        assert_eq!(t.headers, vec!["Date", "Montant", "Libelle"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1], vec!["02/03/2024", "89.90"]);
    }

    #[test]
    fn blank_rows_keep_their_row_number() {
        let data = b"date;montant\n;\n02/03/2024;10,00\n";
        let t = tokenize(data.as_ref(), b';').unwrap();
        assert_eq!(t.rows.len(), 2);

        let out = parse_payments(&t, &CsvColumnMapping::new(0, 1, None)).unwrap();
        assert_eq!(out.payments.len(), 1);
        assert_eq!(out.payments[0].id, "csv_2");
        assert_eq!(out.payments[0].original_row, 2);
        assert_eq!(out.skipped, vec![SkippedRow { row: 1, reason: SkipReason::EmptyCell }]);
    }

    #[test]
    fn tokenize_empty_input_errors() {
        assert!(matches!(tokenize(b"".as_ref(), b','), Err(ImportError::NoDataRows)));
    }

    // ── parse_payments ────────────────────────────────────────────────────────

    #[test]
    fn maps_rows_with_explicit_mapping() {
        let t = table(
            &["date", "montant", "libelle"],
            &[&["01/03/2024", "150,00", "Loyer"], &["02/03/2024", "89.90", "Fournitures"]],
        );
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 1, Some(2))).unwrap();
        assert!(out.skipped.is_empty());
        assert_eq!(out.payments.len(), 2);

        let p1 = &out.payments[0];
        assert_eq!(p1.id, "csv_1");
        assert_eq!(p1.amount, Money::from_cents(15000));
        assert_eq!(p1.date, date(2024, 3, 1));
        assert_eq!(p1.description, "Loyer");

        let p2 = &out.payments[1];
        assert_eq!(p2.id, "csv_2");
        assert_eq!(p2.amount, Money::from_cents(8990));
        assert_eq!(p2.date, date(2024, 3, 2));
        assert_eq!(p2.original_row, 2);
    }

    #[test]
    fn unparseable_amount_row_is_skipped_silently() {
        let t = table(
            &["date", "montant"],
            &[&["01/03/2024", "N/A"], &["02/03/2024", "10,00"]],
        );
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 1, None)).unwrap();
        assert_eq!(out.payments.len(), 1);
        assert_eq!(out.payments[0].id, "csv_2");
        assert_eq!(out.skipped, vec![SkippedRow { row: 1, reason: SkipReason::InvalidAmount }]);
    }

    #[test]
    fn short_and_blank_rows_are_skipped() {
        let t = table(
            &["date", "libelle", "montant"],
            &[&["01/03/2024", "x"], &["", "y", "5"], &["03/03/2024", "z", "  "]],
        );
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 2, Some(1))).unwrap();
        assert!(out.payments.is_empty());
        let reasons: Vec<_> = out.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![SkipReason::TooFewColumns, SkipReason::EmptyCell, SkipReason::EmptyCell]
        );
    }

    #[test]
    fn missing_description_falls_back_to_row_label() {
        let t = table(&["date", "montant", "libelle"], &[&["01/03/2024", "1", ""]]);
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 1, Some(2))).unwrap();
        assert_eq!(out.payments[0].description, "Paiement ligne 1");
    }

    #[test]
    fn unparseable_date_skipped_by_default() {
        let t = table(&["date", "montant"], &[&["bientôt", "12,00"]]);
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 1, None)).unwrap();
        assert!(out.payments.is_empty());
        assert_eq!(out.skipped[0].reason, SkipReason::InvalidDate);
    }

    #[test]
    fn unparseable_date_can_fall_back_to_today() {
        let t = table(&["date", "montant"], &[&["bientôt", "12,00"]]);
        let mapping = CsvColumnMapping::new(0, 1, None).with_date_policy(UnparseableDatePolicy::Today);
        let out = map_rows(&t, &mapping, date(2024, 6, 30)).unwrap();
        assert_eq!(out.payments[0].date, date(2024, 6, 30));
    }

    #[test]
    fn row_width_is_judged_per_row_not_by_header() {
        let t = table(
            &["date", "montant"],
            &[&["01/03/2024", "VIR", "10,00"], &["02/03/2024", "CB"], &["03/03/2024", "CHQ", "5"]],
        );
        let out = parse_payments(&t, &CsvColumnMapping::new(0, 2, Some(1))).unwrap();
        let ids: Vec<_> = out.payments.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["csv_1", "csv_3"]);
        assert_eq!(out.payments[0].description, "VIR");
        assert_eq!(out.skipped, vec![SkippedRow { row: 2, reason: SkipReason::TooFewColumns }]);
    }

    #[test]
    fn header_only_table_has_no_data_rows() {
        let t = table(&["date", "montant"], &[]);
        assert!(matches!(
            parse_payments(&t, &CsvColumnMapping::new(0, 1, None)),
            Err(ImportError::NoDataRows)
        ));
    }

    // ── detect_mapping ────────────────────────────────────────────────────────

    #[test]
    fn detect_mapping_from_french_headers() {
        let headers: Vec<String> = ["Jour d'opération", "Libellé", "Montant (EUR)"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let m = detect_mapping(&headers).unwrap();
        assert_eq!(m.date_column, 0);
        assert_eq!(m.amount_column, 2);
        assert_eq!(m.description_column, Some(1));
    }

    #[test]
    fn detect_mapping_lists_available_headers_on_failure() {
        let headers: Vec<String> = ["Date", "Reference"].iter().map(|s| s.to_string()).collect();
        let err = detect_mapping(&headers).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find the amount column. Available columns: Date, Reference"
        );
    }

    #[test]
    fn parse_payments_auto_uses_detected_columns() {
        let t = table(&["Amount", "Value date"], &[&["-42.00", "2024-02-29"]]);
        let out = parse_payments_auto(&t).unwrap();
        assert_eq!(out.payments[0].amount, Money::from_cents(4200));
        assert_eq!(out.payments[0].date, date(2024, 2, 29));
    }
}
