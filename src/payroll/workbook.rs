//! Structured rows a workbook parser hands to the backfill, plus the JSON parser used in
//! place of a spreadsheet reader.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::components::{ComponentKey, ExpenseCategory};
use super::normalizer::normalize_payroll_name;
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::NewImportRow;

/// One pay component cell. `amount` is the raw cell so bad values can be counted, not fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookInputRow {
    pub period_key: String,
    pub payroll_name: String,
    pub component_key: ComponentKey,
    pub amount: Value,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookExpenseRow {
    pub period_key: String,
    #[serde(default)]
    pub payroll_name: Option<String>,
    pub category: ExpenseCategory,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: Value,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedWorkbook {
    #[serde(default)]
    pub inputs: Vec<WorkbookInputRow>,
    #[serde(default)]
    pub expenses: Vec<WorkbookExpenseRow>,
}

impl ParsedWorkbook {
    /// Raw period keys as written, valid or not.
    pub fn period_keys(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .map(|r| r.period_key.as_str())
            .chain(self.expenses.iter().map(|r| r.period_key.as_str()))
            .collect()
    }

    /// Distinct payroll names in first-seen order.
    pub fn payroll_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.inputs
            .iter()
            .map(|r| r.payroll_name.as_str())
            .chain(self.expenses.iter().filter_map(|r| r.payroll_name.as_deref()))
            .filter(|name| {
                let key = normalize_payroll_name(name);
                !key.is_empty() && seen.insert(key)
            })
            .map(|name| name.trim().to_string())
            .collect()
    }

    /// Every parsed row as an audit record, numbered from 1.
    pub fn import_rows(&self) -> PayrollResult<Vec<NewImportRow>> {
        let inputs = self.inputs.iter().map(|r| {
            (
                r.sheet.clone(),
                r.period_key.clone(),
                serde_json::to_value(r),
            )
        });
        let expenses = self.expenses.iter().map(|r| {
            (
                r.sheet.clone(),
                r.period_key.clone(),
                serde_json::to_value(r),
            )
        });

        inputs
            .chain(expenses)
            .enumerate()
            .map(|(i, (sheet, period_key, payload))| {
                Ok(NewImportRow {
                    row_index: i as u32 + 1,
                    sheet,
                    period_key: Some(period_key),
                    payload: payload.map_err(|e| PayrollError::Workbook(e.to_string()))?,
                })
            })
            .collect()
    }
}

/// Turns an uploaded workbook into structured rows.
pub trait WorkbookParser: Send + Sync {
    fn parse(&self, buffer: &[u8]) -> PayrollResult<ParsedWorkbook>;
}

/// Reads `{"inputs": [...], "expenses": [...]}` exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWorkbookParser;

impl WorkbookParser for JsonWorkbookParser {
    fn parse(&self, buffer: &[u8]) -> PayrollResult<ParsedWorkbook> {
        if buffer.iter().all(u8::is_ascii_whitespace) {
            return Err(PayrollError::Workbook("workbook is empty".to_string()));
        }
        serde_json::from_slice(buffer).map_err(|e| PayrollError::Workbook(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<u8> {
        json!({
            "inputs": [
                { "period_key": "01/2025", "payroll_name": "Aliya Noor", "component_key": "BASIC_SALARY", "amount": "50,000", "sheet": "Jan", "cell": "C4" },
                { "period_key": "2025-02", "payroll_name": "ALIYA-NOOR", "component_key": "PAID", "amount": 48000 },
                { "period_key": "02/2025", "payroll_name": "Basit", "component_key": "BONUS", "amount": { "result": 250 } }
            ],
            "expenses": [
                { "period_key": "02/2025", "payroll_name": "Zara", "category": "ADVANCE", "amount": 100 },
                { "period_key": "02/2025", "category": "COMPANY_EXPENSE", "amount": 900, "description": "rent" }
            ]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn parses_rows_and_collects_names() {
        let parsed = JsonWorkbookParser.parse(&sample()).unwrap();

        assert_eq!(parsed.inputs.len(), 3);
        assert_eq!(parsed.expenses[1].payroll_name, None);
        assert_eq!(parsed.payroll_names(), vec!["Aliya Noor", "Basit", "Zara"]);
        assert_eq!(parsed.period_keys().len(), 5);
    }

    #[test]
    fn import_rows_are_numbered_in_order() {
        let rows = JsonWorkbookParser.parse(&sample()).unwrap().import_rows().unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].row_index, 1);
        assert_eq!(rows[0].sheet.as_deref(), Some("Jan"));
        assert_eq!(rows[4].payload["category"], json!("COMPANY_EXPENSE"));
    }

    #[test]
    fn unknown_component_or_empty_body_is_a_workbook_error() {
        let bad = br#"{"inputs":[{"period_key":"01/2025","payroll_name":"A","component_key":"SALARY","amount":1}]}"#;
        assert!(matches!(
            JsonWorkbookParser.parse(bad),
            Err(PayrollError::Workbook(_))
        ));
        assert!(matches!(
            JsonWorkbookParser.parse(b"  "),
            Err(PayrollError::Workbook(_))
        ));
    }
}
