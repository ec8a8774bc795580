//! Pure helpers that turn raw workbook text into lookup keys, amounts and period keys.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{PayrollError, PayrollResult};

/// Canonical lookup key for a free-text payroll name.
///
/// Lowercases, treats every non-alphanumeric character as a separator and collapses runs of
/// separators into one space, so `"ALI-RAZA"`, `" ali   raza "` and `"Ali Raza"` agree.
pub fn normalize_payroll_name(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .flat_map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                vec![' ']
            }
        })
        .collect();

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a spreadsheet cell into an amount.
///
/// Accepts plain numbers, strings carrying currency symbols or thousands separators
/// (`"৳ 1,250.50"`, `"(300)"` for negatives) and formula cells shaped `{"result": ...}`.
pub fn parse_cell_number(value: &Value) -> PayrollResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PayrollError::validation(format!("`{}` is not a finite number", n))),
        Value::String(s) => parse_numeric_text(s),
        Value::Object(map) => match map.get("result") {
            Some(inner) => parse_cell_number(inner),
            None => Err(PayrollError::validation(
                "cell object has no `result` field",
            )),
        },
        other => Err(PayrollError::validation(format!(
            "`{}` is not a numeric cell",
            other
        ))),
    }
}

fn parse_numeric_text(raw: &str) -> PayrollResult<f64> {
    let invalid = || PayrollError::validation(format!("`{}` is not a numeric amount", raw));

    let trimmed = raw.trim();
    let (mut negated, body) = match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    // The number starts at the first digit, or at a sign/decimal point directly before one,
    // so a currency prefix such as "Rs." does not leak its dot into the amount.
    let chars: Vec<char> = body.chars().collect();
    let start = (0..chars.len())
        .find(|&i| {
            chars[i].is_ascii_digit()
                || (matches!(chars[i], '-' | '+' | '.')
                    && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
        })
        .ok_or_else(invalid)?;

    if chars[..start].contains(&'-') {
        negated = !negated;
    }

    let cleaned: String = chars[start..]
        .iter()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect();

    let parsed: f64 = cleaned.parse().map_err(|_| invalid())?;

    Ok(if negated { -parsed } else { parsed })
}

/// A calendar month of payroll, written `MM/YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "{:02}/{:04}", month, year)]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1900..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Accepts `MM/YYYY`, `M/YYYY`, `MM-YYYY` and `YYYY-MM`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (a, b) = text.split_once('/').or_else(|| text.split_once('-'))?;
        let (a, b) = (a.trim(), b.trim());

        if a.len() == 4 {
            Self::new(a.parse().ok()?, b.parse().ok()?)
        } else {
            Self::new(b.parse().ok()?, a.parse().ok()?)
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First day of the month.
    pub fn to_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("period key holds a valid month")
    }

    /// (first day, last day) of the month.
    pub fn month_bounds(&self) -> (NaiveDate, NaiveDate) {
        let start = self.to_date();
        let end = self.next().to_date() - Duration::days(1);
        (start, end)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn label(&self) -> String {
        self.to_date().format("%B %Y").to_string()
    }
}

impl FromStr for PeriodKey {
    type Err = PayrollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeriodKey::parse(s)
            .ok_or_else(|| PayrollError::validation(format!("`{}` is not a MM/YYYY period key", s)))
    }
}

impl Serialize for PeriodKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Renders period keys as `["01/2025", ...]` in log fields.
pub struct PeriodKeyList<'a>(pub &'a [PeriodKey]);

impl fmt::Debug for PeriodKeyList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|k| k.to_string()))
            .finish()
    }
}

/// Chronologically-latest `n` distinct valid keys, returned oldest first.
/// Unparseable keys are dropped.
pub fn select_latest_period_keys<S: AsRef<str>>(keys: &[S], n: usize) -> Vec<PeriodKey> {
    let distinct: BTreeSet<PeriodKey> = keys
        .iter()
        .filter_map(|k| PeriodKey::parse(k.as_ref()))
        .collect();

    let skip = distinct.len().saturating_sub(n);
    distinct.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalization_ignores_case_whitespace_and_punctuation() {
        let a = normalize_payroll_name("Ali Raza");
        assert_eq!(a, "ali raza");
        assert_eq!(normalize_payroll_name("ALI-RAZA"), a);
        assert_eq!(normalize_payroll_name(" ali   raza "), a);
        assert_eq!(normalize_payroll_name("Raza, Ali"), "raza ali");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["  Muhammad  O'Brien-Khan ", "SANA.", "x", "", "Aliya\tBasit"] {
            let once = normalize_payroll_name(raw);
            assert_eq!(normalize_payroll_name(&once), once);
        }
    }

    #[test]
    fn parses_numbers_with_symbols_and_separators() {
        assert_eq!(parse_cell_number(&json!(1200)).unwrap(), 1200.0);
        assert_eq!(parse_cell_number(&json!("$1,250.50")).unwrap(), 1250.5);
        assert_eq!(parse_cell_number(&json!("Rs. 3,000")).unwrap(), 3000.0);
        assert_eq!(parse_cell_number(&json!("-45.25")).unwrap(), -45.25);
        assert_eq!(parse_cell_number(&json!("(300)")).unwrap(), -300.0);
        assert_eq!(parse_cell_number(&json!({"result": "2,000"})).unwrap(), 2000.0);
    }

    #[test]
    fn rejects_non_numeric_cells() {
        assert!(parse_cell_number(&json!("n/a")).is_err());
        assert!(parse_cell_number(&json!("")).is_err());
        assert!(parse_cell_number(&json!(null)).is_err());
        assert!(parse_cell_number(&json!({"formula": "=A1"})).is_err());
        assert!(parse_cell_number(&json!("12-34-56")).is_err());
    }

    #[test]
    fn period_key_parses_and_formats() {
        let key = PeriodKey::parse("3/2025").unwrap();
        assert_eq!(key.to_string(), "03/2025");
        assert_eq!(PeriodKey::parse("2025-03"), Some(key));
        assert_eq!(PeriodKey::parse("13/2025"), None);
        assert_eq!(PeriodKey::parse("March 2025"), None);
        assert_eq!(key.to_date(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn period_key_round_trips_through_dates() {
        let mut d = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        while d < end {
            let back = PeriodKey::from_date(d).to_date();
            assert_eq!((back.year(), back.month()), (d.year(), d.month()));
            assert_eq!(back.day(), 1);
            d += Duration::days(7);
        }
    }

    #[test]
    fn month_bounds_cover_full_calendar_month() {
        let (start, end) = PeriodKey::parse("02/2024").unwrap().month_bounds();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (_, dec_end) = PeriodKey::parse("12/2024").unwrap().month_bounds();
        assert_eq!(dec_end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn previous_wraps_year() {
        let jan = PeriodKey::parse("01/2025").unwrap();
        assert_eq!(jan.previous().to_string(), "12/2024");
        assert_eq!(jan.previous().next(), jan);
    }

    #[test]
    fn selects_latest_keys_in_ascending_order() {
        let keys = ["03/2025", "01/2025", "02/2025", "12/2024", "04/2025"];
        let picked: Vec<String> = select_latest_period_keys(&keys, 3)
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(picked, vec!["02/2025", "03/2025", "04/2025"]);
    }

    #[test]
    fn selection_drops_garbage_and_duplicates() {
        let keys = ["03/2025", "garbage", "03/2025", "12/2024"];
        let picked = select_latest_period_keys(&keys, 10);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].to_string(), "12/2024");
    }

    #[test]
    fn period_key_serializes_as_text() {
        let key = PeriodKey::parse("07/2024").unwrap();
        assert_eq!(serde_json::to_value(key).unwrap(), json!("07/2024"));
        let back: PeriodKey = serde_json::from_value(json!("7/2024")).unwrap();
        assert_eq!(back, key);
    }
}
