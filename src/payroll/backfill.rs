//! Multi-month workbook import: select months, replace their content in bulk, then
//! recalculate and optionally lock each month in ascending order.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use utoipa::ToSchema;

use super::components::ComponentKey;
use super::engine::{CalculationSettings, Mismatch, recalculate_payroll_period};
use super::identity::{IdentityMatchOutcome, MappingSummary, apply_roster_aliases, resolve_identities};
use super::lifecycle::{approve_and_lock, blocked_payroll_names, create_or_reuse_period};
use super::normalizer::{
    PeriodKey, PeriodKeyList, normalize_payroll_name, parse_cell_number,
    select_latest_period_keys,
};
use super::store::{PayrollStore, PeriodContentReplacement};
use super::workbook::{ParsedWorkbook, WorkbookParser};
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    NewExpenseEntry, NewInputValue, PayrollPeriod, PeriodSourceType, PeriodStatus, SourceMethod,
};

pub const MAX_BACKFILL_MONTHS: u32 = 120;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub file_name: Option<String>,
    pub actor_id: u64,
    /// Clamped to 1..=120.
    pub months: u32,
    /// Overrides the configured reconciliation tolerance.
    pub tolerance: Option<f64>,
    pub lock_approved: bool,
    pub use_employee_roster_names: bool,
    pub overwrite_locked: bool,
    pub persist_import_rows: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            file_name: None,
            actor_id: 0,
            months: 12,
            tolerance: None,
            lock_approved: false,
            use_employee_roster_names: false,
            overwrite_locked: false,
            persist_import_rows: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodOutcome {
    Blocked { payroll_names: Vec<String> },
    Processed { locked: bool, mismatches: Vec<Mismatch> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PeriodReport {
    pub period_key: String,
    pub period_id: u64,
    pub outcome: PeriodOutcome,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct PayrollBackfillSummary {
    pub batch_id: u64,
    pub periods_created: usize,
    pub periods_processed: usize,
    pub periods_locked: usize,
    pub periods_blocked: usize,
    pub periods_failed: usize,
    pub blocked_by_period: BTreeMap<String, Vec<String>>,
    pub imported_inputs: usize,
    pub imported_expenses: usize,
    pub imported_rows: usize,
    pub invalid_rows: usize,
    pub mapping_summary: MappingSummary,
    pub skipped_locked_period_keys: Vec<String>,
    pub selected_period_keys: Vec<String>,
    pub periods: Vec<PeriodReport>,
}

impl PayrollBackfillSummary {
    /// Folds per-period outcomes into the counters.
    fn tally(&mut self, reports: Vec<PeriodReport>) {
        for report in &reports {
            match &report.outcome {
                PeriodOutcome::Blocked { payroll_names } => {
                    self.periods_blocked += 1;
                    self.blocked_by_period
                        .insert(report.period_key.clone(), payroll_names.clone());
                }
                PeriodOutcome::Processed { locked, .. } => {
                    self.periods_processed += 1;
                    if *locked {
                        self.periods_locked += 1;
                    }
                }
                PeriodOutcome::Failed { .. } => self.periods_failed += 1,
            }
        }
        self.periods = reports;
    }
}

/// Month selection: latest `months` keys, newest first, skipping locked months unless
/// overwriting. Both lists come back oldest first.
async fn select_periods(
    store: &dyn PayrollStore,
    parsed: &ParsedWorkbook,
    months: usize,
    overwrite_locked: bool,
) -> PayrollResult<(Vec<PeriodKey>, Vec<PeriodKey>)> {
    let all = select_latest_period_keys(&parsed.period_keys()[..], usize::MAX);

    let mut selected = Vec::new();
    let mut skipped = Vec::new();
    for key in all.into_iter().rev() {
        if selected.len() == months {
            break;
        }
        let existing = store.find_period_by_start(key.to_date()).await?;
        match existing {
            Some(p) if p.status == PeriodStatus::Locked && !overwrite_locked => skipped.push(key),
            _ => selected.push(key),
        }
    }

    selected.reverse();
    skipped.reverse();
    Ok((selected, skipped))
}

struct BuiltRows {
    inputs: Vec<NewInputValue>,
    expenses: Vec<NewExpenseEntry>,
    invalid_rows: usize,
}

/// Canonical name and user for a workbook spelling. Every spelling of one normalized
/// name lands on the matcher's name, resolved or not.
fn canonical(identities: &IdentityMatchOutcome, raw: &str) -> (String, Option<u64>) {
    match identities.resolve(raw) {
        Some(r) => (r.canonical_name.clone(), r.user_id),
        None => (raw.trim().to_string(), None),
    }
}

/// Input and expense rows for the selected months. Bad cells are counted and skipped;
/// repeated (period, name, component) inputs are summed.
fn build_rows(
    parsed: &ParsedWorkbook,
    periods: &HashMap<PeriodKey, u64>,
    identities: &IdentityMatchOutcome,
    batch_id: u64,
) -> BuiltRows {
    let mut invalid_rows = 0;
    // Keyed by normalized name so spellings that differ only in case or punctuation merge.
    let mut merged: BTreeMap<(u64, String, ComponentKey), (NewInputValue, usize)> = BTreeMap::new();

    for row in &parsed.inputs {
        let Some(period_id) = PeriodKey::parse(&row.period_key).and_then(|k| periods.get(&k)) else {
            continue;
        };
        let amount = match parse_cell_number(&row.amount) {
            Ok(a) if !row.payroll_name.trim().is_empty() => a,
            _ => {
                invalid_rows += 1;
                continue;
            }
        };
        let (payroll_name, user_id) = canonical(identities, &row.payroll_name);
        let provenance = json!({
            "batch_id": batch_id,
            "sheet": row.sheet,
            "cell": row.cell,
        });

        merged
            .entry((*period_id, normalize_payroll_name(&payroll_name), row.component_key))
            .and_modify(|(existing, rows)| {
                existing.amount += amount;
                *rows += 1;
            })
            .or_insert_with(|| {
                (
                    NewInputValue {
                        period_id: *period_id,
                        payroll_name,
                        component_key: row.component_key,
                        amount,
                        source_method: SourceMethod::Workbook,
                        is_override: false,
                        user_id,
                        provenance,
                    },
                    1,
                )
            });
    }

    let inputs = merged
        .into_values()
        .map(|(mut input, rows)| {
            input.provenance["merged_rows"] = json!(rows);
            input
        })
        .collect();

    let mut expenses = Vec::new();
    for row in &parsed.expenses {
        let Some(period_id) = PeriodKey::parse(&row.period_key).and_then(|k| periods.get(&k)) else {
            continue;
        };
        let Ok(amount) = parse_cell_number(&row.amount) else {
            invalid_rows += 1;
            continue;
        };
        let (payroll_name, user_id) = match row.payroll_name.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let (name, user) = canonical(identities, raw);
                (Some(name), user)
            }
            _ => (None, None),
        };

        expenses.push(NewExpenseEntry {
            period_id: *period_id,
            payroll_name,
            user_id,
            category: row.category,
            description: row.description.clone(),
            amount,
            source_method: SourceMethod::Workbook,
            provenance: json!({
                "batch_id": batch_id,
                "sheet": row.sheet,
                "cell": row.cell,
            }),
        });
    }

    BuiltRows {
        inputs,
        expenses,
        invalid_rows,
    }
}

async fn process_period(
    store: &dyn PayrollStore,
    period: &PayrollPeriod,
    relock: bool,
    actor_id: u64,
    settings: &CalculationSettings,
) -> PayrollResult<PeriodOutcome> {
    let blocked = blocked_payroll_names(store, period.id).await?;
    if !blocked.is_empty() {
        store
            .update_period_summary(period.id, json!({ "blocked_payroll_names": blocked }))
            .await?;
        return Ok(PeriodOutcome::Blocked {
            payroll_names: blocked,
        });
    }

    let result = recalculate_payroll_period(store, period.id, settings).await?;
    if relock {
        approve_and_lock(
            store,
            period.id,
            actor_id,
            Some("approved and locked by workbook backfill".to_string()),
        )
        .await?;
    }

    Ok(PeriodOutcome::Processed {
        locked: relock,
        mismatches: result.mismatches,
    })
}

async fn import(
    store: &dyn PayrollStore,
    parsed: &ParsedWorkbook,
    selected: &[PeriodKey],
    batch_id: u64,
    options: &BackfillOptions,
    settings: &CalculationSettings,
    chunk_size: usize,
    summary: &mut PayrollBackfillSummary,
) -> PayrollResult<()> {
    let mut periods = Vec::with_capacity(selected.len());
    for key in selected {
        let (period, created) =
            create_or_reuse_period(store, *key, PeriodSourceType::Workbook, Some(options.actor_id))
                .await?;
        if created {
            summary.periods_created += 1;
        }
        periods.push((*key, period));
    }

    let names = parsed.payroll_names();
    let identities = if options.use_employee_roster_names {
        apply_roster_aliases(store, &names[..]).await?
    } else {
        resolve_identities(store, &names[..]).await?
    };
    summary.mapping_summary = identities.summary.clone();

    let ids: HashMap<PeriodKey, u64> = periods.iter().map(|(k, p)| (*k, p.id)).collect();
    let rows = build_rows(parsed, &ids, &identities, batch_id);
    summary.invalid_rows = rows.invalid_rows;

    let (inputs, expenses) = store
        .replace_period_content(PeriodContentReplacement {
            period_ids: periods.iter().map(|(_, p)| p.id).collect(),
            inputs: rows.inputs,
            expenses: rows.expenses,
            chunk_size,
        })
        .await?;
    summary.imported_inputs = inputs;
    summary.imported_expenses = expenses;

    if options.persist_import_rows {
        summary.imported_rows = store
            .insert_import_rows(batch_id, parsed.import_rows()?, chunk_size)
            .await?;
    }

    let mut reports = Vec::with_capacity(periods.len());
    for (key, period) in &periods {
        let relock = options.lock_approved || period.status == PeriodStatus::Locked;
        let outcome = match process_period(store, period, relock, options.actor_id, settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(period = %key, error = %e, "Backfill period failed");
                PeriodOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        reports.push(PeriodReport {
            period_key: key.to_string(),
            period_id: period.id,
            outcome,
        });
    }
    summary.tally(reports);

    Ok(())
}

/// Imports a workbook into the latest `months` payroll periods it covers.
///
/// The import batch is opened before the first write. A hard failure marks it FAILED and
/// is returned; per-month recalculation failures are reported in the summary instead.
#[instrument(skip_all, fields(file = ?options.file_name, months = options.months))]
pub async fn run_payroll_backfill(
    store: &dyn PayrollStore,
    parser: &dyn WorkbookParser,
    buffer: &[u8],
    options: BackfillOptions,
    settings: &CalculationSettings,
    chunk_size: usize,
) -> PayrollResult<PayrollBackfillSummary> {
    let parsed = parser.parse(buffer)?;
    let months = options.months.clamp(1, MAX_BACKFILL_MONTHS) as usize;
    let (selected, skipped) =
        select_periods(store, &parsed, months, options.overwrite_locked).await?;

    tracing::info!(
        selected = ?PeriodKeyList(&selected),
        skipped_locked = ?PeriodKeyList(&skipped),
        "Backfill months selected"
    );

    let settings = match options.tolerance {
        Some(t) => settings.clone().with_tolerance(t),
        None => settings.clone(),
    };

    let batch_id = store
        .create_import_batch(
            PeriodSourceType::Workbook,
            options.file_name.clone(),
            options.actor_id,
        )
        .await?;

    let mut summary = PayrollBackfillSummary {
        batch_id,
        selected_period_keys: selected.iter().map(|k| k.to_string()).collect(),
        skipped_locked_period_keys: skipped.iter().map(|k| k.to_string()).collect(),
        ..Default::default()
    };

    let result = import(
        store,
        &parsed,
        &selected,
        batch_id,
        &options,
        &settings,
        chunk_size.max(1),
        &mut summary,
    )
    .await;

    if let Err(e) = result {
        tracing::error!(batch_id, error = %e, "Payroll backfill failed");
        if let Err(mark) = store.fail_import_batch(batch_id, &e.to_string()).await {
            tracing::error!(batch_id, error = %mark, "Could not mark import batch failed");
        }
        return Err(e);
    }

    let summary_json = match serde_json::to_value(&summary) {
        Ok(v) => v,
        Err(e) => {
            let e = PayrollError::from(e);
            if let Err(mark) = store.fail_import_batch(batch_id, &e.to_string()).await {
                tracing::error!(batch_id, error = %mark, "Could not mark import batch failed");
            }
            return Err(e);
        }
    };
    store.complete_import_batch(batch_id, summary_json).await?;

    tracing::info!(
        batch_id,
        created = summary.periods_created,
        processed = summary.periods_processed,
        locked = summary.periods_locked,
        blocked = summary.periods_blocked,
        failed = summary.periods_failed,
        "Payroll backfill completed"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::payroll::{BatchStatus, MappingStatus, RosterEmployee};
    use crate::payroll::components::MetricKey;
    use crate::payroll::store::memory::MemoryPayrollStore;
    use crate::payroll::workbook::JsonWorkbookParser;
    use serde_json::Value;

    fn roster() -> Vec<RosterEmployee> {
        vec![
            RosterEmployee {
                id: 1,
                name: "Aliya Noor".into(),
            },
            RosterEmployee {
                id: 2,
                name: "Basit Khan".into(),
            },
        ]
    }

    fn row(key: &str, name: &str, component: &str, amount: Value) -> Value {
        json!({ "period_key": key, "payroll_name": name, "component_key": component, "amount": amount })
    }

    fn workbook(inputs: Vec<Value>) -> Vec<u8> {
        json!({ "inputs": inputs }).to_string().into_bytes()
    }

    fn options(months: u32) -> BackfillOptions {
        BackfillOptions {
            file_name: Some("payroll.json".into()),
            actor_id: 5,
            months,
            ..Default::default()
        }
    }

    async fn run(store: &MemoryPayrollStore, buffer: &[u8], options: BackfillOptions) -> PayrollResult<PayrollBackfillSummary> {
        run_payroll_backfill(
            store,
            &JsonWorkbookParser,
            buffer,
            options,
            &CalculationSettings::default(),
            2,
        )
        .await
    }

    fn fourteen_months() -> Vec<u8> {
        let rows = (0..14)
            .map(|i| {
                let key = PeriodKey::new(2024, 1).unwrap();
                let key = (0..i).fold(key, |k, _| k.next());
                row(&key.to_string(), "Aliya Noor", "BASIC_SALARY", json!(1000))
            })
            .collect();
        workbook(rows)
    }

    #[actix_web::test]
    async fn creates_only_the_latest_months() {
        let store = MemoryPayrollStore::with_roster(roster());
        let summary = run(&store, &fourteen_months(), options(12)).await.unwrap();

        assert_eq!(summary.periods_created, 12);
        assert_eq!(summary.periods_processed, 12);
        assert_eq!(summary.periods.len(), 12);
        assert_eq!(summary.selected_period_keys.first().unwrap(), "03/2024");
        assert_eq!(summary.selected_period_keys.last().unwrap(), "02/2025");
        assert_eq!(store.list_periods().await.unwrap().len(), 12);

        let batch = store.find_import_batch(summary.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.summary_json.unwrap()["periods_created"], json!(12));
    }

    #[actix_web::test]
    async fn months_are_clamped() {
        let store = MemoryPayrollStore::with_roster(roster());
        let summary = run(&store, &fourteen_months(), options(0)).await.unwrap();
        assert_eq!(summary.selected_period_keys, vec!["02/2025"]);
    }

    #[actix_web::test]
    async fn blocked_month_stays_draft_while_others_lock() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
            row("01/2025", "Aliya Noor", "PAID", json!(1000)),
            row("02/2025", "aliya noor", "BASIC_SALARY", json!(1000)),
            row("02/2025", "Mystery Person", "BASIC_SALARY", json!(500)),
            row("03/2025", "Basit Khan", "BASIC_SALARY", json!(800)),
        ]);
        let summary = run(
            &store,
            &buffer,
            BackfillOptions {
                lock_approved: true,
                ..options(12)
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.periods_processed, 2);
        assert_eq!(summary.periods_locked, 2);
        assert_eq!(summary.periods_blocked, 1);
        assert_eq!(summary.periods_failed, 0);
        assert_eq!(
            summary.blocked_by_period.get("02/2025"),
            Some(&vec!["Mystery Person".to_string()])
        );
        assert_eq!(summary.mapping_summary.unresolved, 1);
        assert_eq!(
            summary.periods_processed + summary.periods_blocked + summary.periods_failed,
            summary.selected_period_keys.len()
        );

        let mut statuses = Vec::new();
        for p in &summary.periods {
            statuses.push(store.find_period(p.period_id).await.unwrap().unwrap().status);
        }
        assert_eq!(
            statuses,
            vec![PeriodStatus::Locked, PeriodStatus::Draft, PeriodStatus::Locked]
        );

        let jan = summary.periods[0].period_id;
        assert_eq!(store.list_approval_events(jan).await.unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn ambiguous_name_blocks_its_month() {
        let store = MemoryPayrollStore::with_roster(vec![
            RosterEmployee {
                id: 1,
                name: "Aliya Noor".into(),
            },
            RosterEmployee {
                id: 3,
                name: "Sara Ali".into(),
            },
            RosterEmployee {
                id: 4,
                name: "Sara Ali".into(),
            },
        ]);
        let buffer = workbook(vec![
            row("01/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
            row("01/2025", "Aliya Noor", "PAID", json!(1000)),
            row("02/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
            row("02/2025", "SARA  ALI", "BASIC_SALARY", json!(700)),
        ]);
        let summary = run(
            &store,
            &buffer,
            BackfillOptions {
                lock_approved: true,
                ..options(12)
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.mapping_summary.ambiguous, 1);
        assert_eq!(summary.periods_locked, 1);
        assert_eq!(summary.periods_blocked, 1);
        assert_eq!(
            summary.blocked_by_period.get("02/2025"),
            Some(&vec!["SARA  ALI".to_string()])
        );

        let feb = store.find_period(summary.periods[1].period_id).await.unwrap().unwrap();
        assert_eq!(feb.status, PeriodStatus::Draft);
        assert_eq!(
            feb.summary_json.unwrap()["blocked_payroll_names"],
            json!(["SARA  ALI"])
        );
        let alias = store
            .list_identity_mappings()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.normalized_payroll_name == "sara ali")
            .unwrap();
        assert_eq!(alias.status, MappingStatus::Ambiguous);
        assert_eq!(alias.user_id, None);
    }

    #[actix_web::test]
    async fn spellings_of_an_unresolved_name_become_one_payee() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Mystery Person", "BASIC_SALARY", json!(100)),
            row("01/2025", "MYSTERY-PERSON", "BASIC_SALARY", json!(50)),
            row("01/2025", "mystery person", "BONUS", json!(10)),
        ]);
        let summary = run(&store, &buffer, options(12)).await.unwrap();

        assert_eq!(summary.mapping_summary.total, 1);
        assert_eq!(summary.imported_inputs, 2);
        assert_eq!(summary.periods_blocked, 1);
        assert_eq!(
            summary.blocked_by_period.get("01/2025"),
            Some(&vec!["Mystery Person".to_string()])
        );

        let id = summary.periods[0].period_id;
        let inputs = store.list_input_values(id).await.unwrap();
        assert!(inputs.iter().all(|i| i.payroll_name == "Mystery Person"));
        let basic = inputs
            .iter()
            .find(|i| i.component_key == ComponentKey::BasicSalary)
            .unwrap();
        assert_eq!(basic.amount, 150.0);
        assert_eq!(basic.provenance.as_ref().unwrap()["merged_rows"], json!(2));

        let batch = store.find_import_batch(summary.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
    }

    #[actix_web::test]
    async fn duplicate_cells_are_summed_and_bad_cells_counted() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Aliya Noor", "OVERTIME", json!(100)),
            row("01/2025", "ALIYA NOOR", "OVERTIME", json!("Rs. 50")),
            row("01/2025", "Aliya Noor", "BONUS", json!("n/a")),
            row("13/2025", "Aliya Noor", "BONUS", json!(1)),
        ]);
        let summary = run(&store, &buffer, options(12)).await.unwrap();

        assert_eq!(summary.imported_inputs, 1);
        assert_eq!(summary.invalid_rows, 1);

        let id = summary.periods[0].period_id;
        let inputs = store.list_input_values(id).await.unwrap();
        assert_eq!(inputs[0].amount, 150.0);
        assert_eq!(inputs[0].payroll_name, "Aliya Noor");
        assert_eq!(inputs[0].user_id, Some(1));
        assert_eq!(inputs[0].provenance.as_ref().unwrap()["merged_rows"], json!(2));
    }

    #[actix_web::test]
    async fn roster_alias_mode_resolves_every_name() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Dummy A", "BASIC_SALARY", json!(1)),
            row("01/2025", "Dummy B", "BASIC_SALARY", json!(1)),
            row("01/2025", "Dummy C", "BASIC_SALARY", json!(1)),
        ]);
        let summary = run(
            &store,
            &buffer,
            BackfillOptions {
                use_employee_roster_names: true,
                ..options(12)
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.periods_blocked, 0);
        assert_eq!(summary.mapping_summary.auto_matched, 3);
        let id = summary.periods[0].period_id;
        let aliya = store
            .list_input_values(id)
            .await
            .unwrap()
            .into_iter()
            .find(|i| i.payroll_name == "Aliya Noor")
            .unwrap();
        assert_eq!(aliya.amount, 2.0);
    }

    #[actix_web::test]
    async fn locked_months_are_skipped_unless_overwriting() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
            row("02/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
        ]);
        let first = run(
            &store,
            &buffer,
            BackfillOptions {
                lock_approved: true,
                ..options(12)
            },
        )
        .await
        .unwrap();
        assert_eq!(first.periods_locked, 2);

        let updated = workbook(vec![
            row("01/2025", "Aliya Noor", "BASIC_SALARY", json!(2000)),
            row("02/2025", "Aliya Noor", "BASIC_SALARY", json!(2000)),
        ]);
        let skipped = run(&store, &updated, options(12)).await.unwrap();
        assert_eq!(skipped.skipped_locked_period_keys, vec!["01/2025", "02/2025"]);
        assert!(skipped.selected_period_keys.is_empty());

        let overwritten = run(
            &store,
            &updated,
            BackfillOptions {
                overwrite_locked: true,
                ..options(12)
            },
        )
        .await
        .unwrap();
        assert_eq!(overwritten.periods_locked, 2);
        let jan = overwritten.periods[0].period_id;
        let net = store
            .list_computed_values(jan)
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.metric_key == MetricKey::NetSalary)
            .unwrap();
        assert_eq!(net.amount, 2000.0);
        assert_eq!(
            store.find_period(jan).await.unwrap().unwrap().status,
            PeriodStatus::Locked
        );
    }

    #[actix_web::test]
    async fn failed_bulk_replace_marks_batch_failed() {
        let store = MemoryPayrollStore::with_roster(roster());
        store.fail_next_content_replace();

        let err = run(&store, &fourteen_months(), options(3)).await.unwrap_err();
        assert!(matches!(err, PayrollError::Transaction(_)));

        let batch = store.batches().pop().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch.error_message.is_some());
    }

    #[actix_web::test]
    async fn import_rows_are_persisted_on_request() {
        let store = MemoryPayrollStore::with_roster(roster());
        let summary = run(
            &store,
            &fourteen_months(),
            BackfillOptions {
                persist_import_rows: true,
                ..options(12)
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.imported_rows, 14);
        assert_eq!(store.import_row_count(summary.batch_id), 14);
    }

    #[actix_web::test]
    async fn rerun_produces_identical_computed_values() {
        let store = MemoryPayrollStore::with_roster(roster());
        let buffer = workbook(vec![
            row("01/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
            row("01/2025", "Aliya Noor", "PAID", json!(700)),
            row("02/2025", "Aliya Noor", "BASIC_SALARY", json!(1000)),
        ]);

        let first = run(&store, &buffer, options(12)).await.unwrap();
        let feb = first.periods[1].period_id;
        let before: Vec<(String, MetricKey, f64)> = store
            .list_computed_values(feb)
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.payroll_name, v.metric_key, v.amount))
            .collect();

        let second = run(&store, &buffer, options(12)).await.unwrap();
        let after: Vec<(String, MetricKey, f64)> = store
            .list_computed_values(feb)
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.payroll_name, v.metric_key, v.amount))
            .collect();

        assert_eq!(second.periods_created, 0);
        assert_eq!(before, after);
        assert!(before.contains(&("Aliya Noor".to_string(), MetricKey::PreviousBalance, 300.0)));
    }

    #[test]
    fn tally_counts_each_outcome() {
        let mut summary = PayrollBackfillSummary::default();
        summary.tally(vec![
            PeriodReport {
                period_key: "01/2025".into(),
                period_id: 1,
                outcome: PeriodOutcome::Processed {
                    locked: true,
                    mismatches: vec![],
                },
            },
            PeriodReport {
                period_key: "02/2025".into(),
                period_id: 2,
                outcome: PeriodOutcome::Failed {
                    reason: "deadlock".into(),
                },
            },
        ]);

        assert_eq!(
            (
                summary.periods_processed,
                summary.periods_locked,
                summary.periods_failed,
                summary.periods_blocked
            ),
            (1, 1, 1, 0)
        );
        assert_eq!(summary.periods.len(), 2);
    }
}
