//! Progressive monthly income-tax brackets.
//!
//! Only used when a payroll name has no explicit `INCOME_TAX` input for the period.
//! An empty table derives nothing.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxBracket {
    /// Upper bound of taxable monthly income for this slice; `None` is the open top slice.
    pub up_to: Option<f64>,
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaxBracketTable {
    brackets: Vec<TaxBracket>,
}

impl TaxBracketTable {
    pub fn new(brackets: Vec<TaxBracket>) -> Result<Self, String> {
        let mut previous = 0.0;
        for (i, b) in brackets.iter().enumerate() {
            if !(0.0..=1.0).contains(&b.rate) {
                return Err(format!("bracket {} rate {} is outside 0..=1", i + 1, b.rate));
            }
            match b.up_to {
                Some(limit) if limit <= previous => {
                    return Err(format!("bracket {} limits must increase", i + 1));
                }
                Some(limit) => previous = limit,
                None if i + 1 != brackets.len() => {
                    return Err("only the last bracket may be open-ended".to_string());
                }
                None => {}
            }
        }
        Ok(Self { brackets })
    }

    /// Parses `"25000:0,50000:0.05,*:0.1"`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let brackets = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|part| {
                let (limit, rate) = part
                    .split_once(':')
                    .ok_or_else(|| format!("`{}` must look like limit:rate", part))?;
                let up_to = match limit.trim() {
                    "*" => None,
                    l => Some(l.parse::<f64>().map_err(|_| format!("bad limit `{}`", l))?),
                };
                let rate = rate
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("bad rate `{}`", rate))?;
                Ok(TaxBracket { up_to, rate })
            })
            .collect::<Result<Vec<_>, String>>()?;

        Self::new(brackets)
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    pub fn tax_for(&self, taxable: f64) -> f64 {
        if taxable <= 0.0 {
            return 0.0;
        }

        let mut tax = 0.0;
        let mut lower = 0.0;
        for b in &self.brackets {
            let upper = b.up_to.unwrap_or(f64::INFINITY);
            if taxable > lower {
                tax += (taxable.min(upper) - lower) * b.rate;
            }
            lower = upper;
            if taxable <= upper {
                break;
            }
        }
        tax
    }
}
