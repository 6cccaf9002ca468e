pub mod csv;
pub(crate) mod util;

pub use csv::{
    detect_mapping, parse_payments, parse_payments_auto, tokenize, CsvColumnMapping, CsvTable,
    ImportError, ImportOutcome, SkipReason, SkippedRow, UnparseableDatePolicy,
};

pub mod import {
    use crate::*;

    /// Tokenizes `data` and maps it with `mapping`, or by header detection
    /// when `None`. A detected mapping applies `unparseable_dates`.
    pub fn import_statement<R: std::io::Read>(
        data: R,
        delimiter: u8,
        mapping: Option<&CsvColumnMapping>,
        unparseable_dates: UnparseableDatePolicy,
    ) -> Result<ImportOutcome, ImportError> {
        let table = tokenize(data, delimiter)?;
        match mapping {
            Some(mapping) => parse_payments(&table, mapping),
            None => {
                let mapping = detect_mapping(&table.headers)?.with_date_policy(unparseable_dates);
                parse_payments(&table, &mapping)
            }
        }
    }

}
