//! Per-name pay computation and NET vs PAID reconciliation for one period.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::instrument;
use utoipa::ToSchema;

use super::components::{Bucket, ComponentKey, ExpenseCategory, MetricKey};
use super::normalizer::{PeriodKey, normalize_payroll_name};
use super::store::PayrollStore;
use super::tax::TaxBracketTable;
use crate::config::Config;
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    ComputedMetric, PayrollExpenseEntry, PayrollInputValue, PeriodStatus,
};

/// Critical mismatches exceed the tolerance by this factor.
const CRITICAL_FACTOR: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct CalculationSettings {
    pub tolerance: f64,
    pub tax_table: TaxBracketTable,
}

impl Default for CalculationSettings {
    fn default() -> Self {
        Self {
            tolerance: 1.0,
            tax_table: TaxBracketTable::default(),
        }
    }
}

impl CalculationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tolerance: config.payroll_tolerance,
            tax_table: config.tax_brackets.clone(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationCheck {
    NetVsPaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Mismatch {
    pub payroll_name: String,
    pub period_key: String,
    pub check: ReconciliationCheck,
    pub expected: f64,
    pub actual: f64,
    pub delta: f64,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RecalculationResult {
    pub computed: Vec<ComputedMetric>,
    pub mismatches: Vec<Mismatch>,
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Default)]
struct NameTotals {
    user_id: Option<u64>,
    earnings: f64,
    reimbursements: f64,
    deductions: f64,
    adjustment: f64,
    paid: f64,
    previous_balance: Option<f64>,
    has_income_tax: bool,
}

impl NameTotals {
    fn add(&mut self, bucket: Bucket, amount: f64) {
        match bucket {
            Bucket::Earning => self.earnings += amount,
            Bucket::Reimbursement => self.reimbursements += amount,
            Bucket::Deduction => self.deductions += amount,
            Bucket::Adjustment => self.adjustment += amount,
            Bucket::Paid => self.paid += amount,
            Bucket::PreviousBalance => {
                *self.previous_balance.get_or_insert(0.0) += amount;
            }
        }
    }
}

/// Derives every metric for every payroll name of a period.
///
/// `previous_balances` holds last month's BALANCE keyed by normalized payroll name; an
/// explicit PREVIOUS_BALANCE input takes precedence. Output is rounded to cents and
/// sorted by (payroll name, metric).
pub fn compute_period_metrics(
    inputs: &[PayrollInputValue],
    expenses: &[PayrollExpenseEntry],
    previous_balances: &HashMap<String, f64>,
    tax_table: &TaxBracketTable,
) -> Vec<ComputedMetric> {
    let mut by_name: BTreeMap<String, NameTotals> = BTreeMap::new();

    for input in inputs {
        let totals = by_name.entry(input.payroll_name.clone()).or_default();
        totals.user_id = totals.user_id.or(input.user_id);
        if input.component_key == ComponentKey::IncomeTax {
            totals.has_income_tax = true;
        }
        totals.add(input.component_key.bucket(), input.amount);
    }

    for entry in expenses {
        let (Some(name), Some(bucket)) = (entry.payroll_name.as_ref(), entry.category.bucket())
        else {
            continue;
        };
        let totals = by_name.entry(name.clone()).or_default();
        totals.user_id = totals.user_id.or(entry.user_id);
        totals.add(bucket, entry.amount);
    }

    let mut computed = Vec::with_capacity(by_name.len() * 8);
    for (name, totals) in by_name {
        let derived_tax = (!totals.has_income_tax && !tax_table.is_empty())
            .then(|| round_cents(tax_table.tax_for(totals.earnings)));

        let total_earnings = totals.earnings + totals.reimbursements;
        let total_deductions = totals.deductions + derived_tax.unwrap_or(0.0);
        let net = total_earnings - total_deductions + totals.adjustment;
        let previous = totals.previous_balance.unwrap_or_else(|| {
            previous_balances
                .get(&normalize_payroll_name(&name))
                .copied()
                .unwrap_or(0.0)
        });
        let balance = net - totals.paid + previous;

        let mut push = |metric_key: MetricKey, amount: f64| {
            computed.push(ComputedMetric {
                payroll_name: name.clone(),
                user_id: totals.user_id,
                metric_key,
                amount: round_cents(amount),
            })
        };

        push(MetricKey::TotalEarnings, total_earnings);
        push(MetricKey::TotalReimbursements, totals.reimbursements);
        push(MetricKey::TotalDeductions, total_deductions);
        if let Some(tax) = derived_tax {
            push(MetricKey::DerivedIncomeTax, tax);
        }
        push(MetricKey::NetSalary, net);
        push(MetricKey::PaidAmount, totals.paid);
        push(MetricKey::PreviousBalance, previous);
        push(MetricKey::Balance, balance);
    }

    computed.sort_by(|a, b| {
        a.payroll_name
            .cmp(&b.payroll_name)
            .then(a.metric_key.cmp(&b.metric_key))
    });
    computed
}

/// NET_SALARY against the PAID input for every name that has both.
pub fn reconcile(
    inputs: &[PayrollInputValue],
    computed: &[ComputedMetric],
    period_key: PeriodKey,
    tolerance: f64,
) -> Vec<Mismatch> {
    let paid_names: HashSet<&str> = inputs
        .iter()
        .filter(|i| i.component_key == ComponentKey::Paid)
        .map(|i| i.payroll_name.as_str())
        .collect();

    let metric = |name: &str, key: MetricKey| {
        computed
            .iter()
            .find(|m| m.payroll_name == name && m.metric_key == key)
            .map(|m| m.amount)
    };

    let mut mismatches = Vec::new();
    for m in computed.iter().filter(|m| m.metric_key == MetricKey::NetSalary) {
        if !paid_names.contains(m.payroll_name.as_str()) {
            continue;
        }
        let net = m.amount;
        let paid = metric(&m.payroll_name, MetricKey::PaidAmount).unwrap_or(0.0);
        let delta = round_cents(net - paid);
        if delta.abs() <= tolerance {
            continue;
        }

        let severity = if delta.abs() > CRITICAL_FACTOR * tolerance {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let reason = if delta > 0.0 {
            format!("net salary exceeds paid amount by {:.2}", delta)
        } else {
            format!("paid amount exceeds net salary by {:.2}", -delta)
        };

        mismatches.push(Mismatch {
            payroll_name: m.payroll_name.clone(),
            period_key: period_key.to_string(),
            check: ReconciliationCheck::NetVsPaid,
            expected: net,
            actual: paid,
            delta,
            severity,
            reason,
        });
    }
    mismatches
}

fn reconciliation_summary(
    period_key: PeriodKey,
    computed: &[ComputedMetric],
    mismatches: &[Mismatch],
    expenses: &[PayrollExpenseEntry],
    tolerance: f64,
) -> Value {
    let total = |key: MetricKey| {
        round_cents(
            computed
                .iter()
                .filter(|m| m.metric_key == key)
                .map(|m| m.amount)
                .sum(),
        )
    };
    let company_expenses: f64 = expenses
        .iter()
        .filter(|e| e.category == ExpenseCategory::CompanyExpense)
        .map(|e| e.amount)
        .sum();
    let names: HashSet<&str> = computed.iter().map(|m| m.payroll_name.as_str()).collect();

    json!({
        "period_key": period_key,
        "payroll_names": names.len(),
        "tolerance": tolerance,
        "totals": {
            "net_salary": total(MetricKey::NetSalary),
            "paid_amount": total(MetricKey::PaidAmount),
            "balance": total(MetricKey::Balance),
            "company_expenses": round_cents(company_expenses),
        },
        "mismatch_count": mismatches.len(),
        "critical_count": mismatches.iter().filter(|m| m.severity == Severity::Critical).count(),
        "mismatches": mismatches,
    })
}

/// Last month's BALANCE per normalized payroll name, empty when there is no prior period.
async fn previous_balances(
    store: &dyn PayrollStore,
    key: PeriodKey,
) -> PayrollResult<HashMap<String, f64>> {
    let Some(prior) = store.find_period_by_start(key.previous().to_date()).await? else {
        return Ok(HashMap::new());
    };

    Ok(store
        .list_computed_values(prior.id)
        .await?
        .into_iter()
        .filter(|v| v.metric_key == MetricKey::Balance)
        .map(|v| (normalize_payroll_name(&v.payroll_name), v.amount))
        .collect())
}

/// Regenerates the computed values of a period and marks it CALCULATED.
#[instrument(skip(store, settings))]
pub async fn recalculate_payroll_period(
    store: &dyn PayrollStore,
    period_id: u64,
    settings: &CalculationSettings,
) -> PayrollResult<RecalculationResult> {
    let period = store
        .find_period(period_id)
        .await?
        .ok_or_else(|| PayrollError::not_found(format!("payroll period {}", period_id)))?;

    if period.status == PeriodStatus::Locked {
        return Err(PayrollError::policy(
            period.status,
            "locked periods cannot be recalculated",
        ));
    }

    let key = period.period_key();
    let inputs = store.list_input_values(period_id).await?;
    let expenses = store.list_expense_entries(period_id).await?;
    let previous = previous_balances(store, key).await?;

    let computed = compute_period_metrics(&inputs, &expenses, &previous, &settings.tax_table);
    let mismatches = reconcile(&inputs, &computed, key, settings.tolerance);
    let summary = reconciliation_summary(key, &computed, &mismatches, &expenses, settings.tolerance);

    store
        .replace_computed_values(period_id, computed.clone(), summary)
        .await?;

    tracing::info!(
        period = %key,
        computed = computed.len(),
        mismatches = mismatches.len(),
        "Payroll period recalculated"
    );

    Ok(RecalculationResult {
        computed,
        mismatches,
    })
}
