use std::str::FromStr;
use std::sync::OnceLock;

use chrono::NaiveDate;
use lettrage_core::Money;
use regex::Regex;
use rust_decimal::Decimal;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_amount_noise, r"[^0-9.,\-]");
re!(re_date_noise, r"[^0-9/\-]");

/// Parses a statement amount and returns its magnitude.
///
/// Everything except digits, `.`, `,` and `-` is stripped, then `,` becomes
/// the decimal point. The remainder must be a single decimal number.
pub fn parse_amount(raw: &str) -> Option<Money> {
    let cleaned = re_amount_noise().replace_all(raw, "").replace(',', ".");
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .ok()
        .map(|d| Money::new(d.abs()))
}

/// Parses `DD/MM/YYYY`, `MM/DD/YY`, `YYYY-MM-DD` or `DD-MM-YYYY`.
///
/// With `/`, a four-digit third segment means day first; otherwise month
/// first. With `-`, a four-digit first segment means ISO order; otherwise day
/// first. Two-digit years are read as 20xx.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = re_date_noise().replace_all(raw, "");

    let (year, month, day) = if cleaned.contains('/') {
        let [a, b, c] = segments(&cleaned, '/')?;
        if c.len() == 4 {
            (c, b, a)
        } else {
            (c, a, b)
        }
    } else if cleaned.contains('-') {
        let [a, b, c] = segments(&cleaned, '-')?;
        if a.len() == 4 {
            (a, b, c)
        } else {
            (c, b, a)
        }
    } else {
        return None;
    };

    let mut year: i32 = year.parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

fn segments(s: &str, sep: char) -> Option<[&str; 3]> {
    let mut parts = s.split(sep);
    let seg = [parts.next()?, parts.next()?, parts.next()?];
    if parts.next().is_some() || seg.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(seg)
}
