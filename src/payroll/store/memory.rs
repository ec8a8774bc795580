//! In-memory store for engine tests.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use super::{PayrollStore, PeriodContentReplacement, PeriodTransition};
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    BatchStatus, ComputedMetric, IdentityMappingUpsert, NewExpenseEntry, NewImportRow,
    NewInputValue, NewPeriod, NewReceipt, PayrollApprovalEvent, PayrollComputedValue,
    PayrollExpenseEntry, PayrollIdentityMapping, PayrollImportBatch, PayrollInputValue,
    PayrollPeriod, PayrollReceipt, PeriodSourceType, PeriodStatus, ReceiptStatus,
    RosterEmployee,
};

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    periods: Vec<PayrollPeriod>,
    inputs: Vec<PayrollInputValue>,
    expenses: Vec<PayrollExpenseEntry>,
    computed: Vec<PayrollComputedValue>,
    receipts: Vec<PayrollReceipt>,
    events: Vec<PayrollApprovalEvent>,
    mappings: Vec<PayrollIdentityMapping>,
    batches: Vec<PayrollImportBatch>,
    import_rows: Vec<(u64, NewImportRow)>,
    roster: Vec<RosterEmployee>,
}

impl MemoryState {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn period_mut(&mut self, id: u64) -> PayrollResult<&mut PayrollPeriod> {
        self.periods
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PayrollError::not_found(format!("payroll period {}", id)))
    }

    fn apply_transition(&mut self, t: &PeriodTransition) -> PayrollResult<()> {
        let now = Utc::now();
        let period = self.period_mut(t.period_id)?;
        if let Some((from, _)) = t.steps.first() {
            if period.status != *from {
                return Err(PayrollError::policy(
                    period.status,
                    format!("expected {} for this transition", from),
                ));
            }
        }
        for (_, to) in &t.steps {
            period.status = *to;
            match to {
                PeriodStatus::Approved => {
                    period.approved_by_id = Some(t.actor_id);
                    period.approved_at = Some(now);
                }
                PeriodStatus::Locked => period.locked_at = Some(now),
                _ => {}
            }
        }
        for (from, to) in &t.steps {
            let id = self.id();
            self.events.push(PayrollApprovalEvent {
                id,
                period_id: t.period_id,
                actor_id: t.actor_id,
                from_status: *from,
                to_status: *to,
                comment: t.comment.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    fn push_input(&mut self, row: NewInputValue) {
        let id = self.id();
        self.inputs.push(PayrollInputValue {
            id,
            period_id: row.period_id,
            payroll_name: row.payroll_name,
            component_key: row.component_key,
            amount: row.amount,
            source_method: row.source_method,
            is_override: row.is_override,
            user_id: row.user_id,
            provenance: Some(row.provenance),
        });
    }

    fn push_expense(&mut self, row: NewExpenseEntry) {
        let id = self.id();
        self.expenses.push(PayrollExpenseEntry {
            id,
            period_id: row.period_id,
            payroll_name: row.payroll_name,
            user_id: row.user_id,
            category: row.category,
            description: row.description,
            amount: row.amount,
            source_method: row.source_method,
            provenance: Some(row.provenance),
        });
    }
}

#[derive(Default)]
pub struct MemoryPayrollStore {
    state: Mutex<MemoryState>,
    fail_content_replace: AtomicBool,
}

impl MemoryPayrollStore {
    pub fn with_roster(roster: Vec<RosterEmployee>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().roster = roster;
        store
    }

    /// Makes the next bulk replace fail the way a dropped connection would.
    pub fn fail_next_content_replace(&self) {
        self.fail_content_replace.store(true, Ordering::SeqCst);
    }

    pub fn set_period_status(&self, period_id: u64, status: PeriodStatus) {
        let mut state = self.state.lock().unwrap();
        state.period_mut(period_id).unwrap().status = status;
    }

    pub fn import_row_count(&self, batch_id: u64) -> usize {
        let state = self.state.lock().unwrap();
        state.import_rows.iter().filter(|(b, _)| *b == batch_id).count()
    }

    pub fn batches(&self) -> Vec<PayrollImportBatch> {
        self.state.lock().unwrap().batches.clone()
    }
}

#[async_trait]
impl PayrollStore for MemoryPayrollStore {
    async fn find_period(&self, id: u64) -> PayrollResult<Option<PayrollPeriod>> {
        let state = self.state.lock().unwrap();
        Ok(state.periods.iter().find(|p| p.id == id).cloned())
    }

    async fn find_period_by_start(&self, start: NaiveDate) -> PayrollResult<Option<PayrollPeriod>> {
        let state = self.state.lock().unwrap();
        Ok(state.periods.iter().find(|p| p.period_start == start).cloned())
    }

    async fn list_periods(&self) -> PayrollResult<Vec<PayrollPeriod>> {
        let mut periods = self.state.lock().unwrap().periods.clone();
        periods.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(periods)
    }

    async fn create_period(&self, period: NewPeriod) -> PayrollResult<PayrollPeriod> {
        let mut state = self.state.lock().unwrap();
        let (start, end) = period.key.month_bounds();
        if state.periods.iter().any(|p| p.period_start == start) {
            return Err(PayrollError::Transaction(sqlx::Error::Protocol(format!(
                "duplicate period for {}",
                period.key
            ))));
        }
        let id = state.id();
        let row = PayrollPeriod {
            id,
            label: period.key.label(),
            period_start: start,
            period_end: end,
            status: PeriodStatus::Draft,
            source_type: period.source_type,
            created_by_id: period.created_by_id,
            approved_by_id: None,
            approved_at: None,
            locked_at: None,
            summary_json: None,
        };
        state.periods.push(row.clone());
        Ok(row)
    }

    async fn update_period_summary(&self, period_id: u64, summary: Value) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        state.period_mut(period_id)?.summary_json = Some(summary);
        Ok(())
    }

    async fn transition_period(&self, transition: PeriodTransition) -> PayrollResult<()> {
        self.state.lock().unwrap().apply_transition(&transition)
    }

    async fn list_approval_events(&self, period_id: u64) -> PayrollResult<Vec<PayrollApprovalEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn list_input_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollInputValue>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .inputs
            .iter()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn list_expense_entries(&self, period_id: u64) -> PayrollResult<Vec<PayrollExpenseEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .expenses
            .iter()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn list_computed_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollComputedValue>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .computed
            .iter()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn upsert_manual_input(&self, input: NewInputValue) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        state.period_mut(input.period_id)?.status = PeriodStatus::Draft;
        let found = state.inputs.iter().position(|r| {
            r.period_id == input.period_id
                && r.payroll_name.to_lowercase() == input.payroll_name.to_lowercase()
                && r.component_key == input.component_key
        });
        match found {
            Some(i) => {
                let existing = &mut state.inputs[i];
                existing.amount = input.amount;
                existing.source_method = input.source_method;
                existing.is_override = input.is_override;
                existing.user_id = input.user_id.or(existing.user_id);
                existing.provenance = Some(input.provenance);
            }
            None => state.push_input(input),
        }
        Ok(())
    }

    async fn insert_manual_expense(&self, entry: NewExpenseEntry) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        state.period_mut(entry.period_id)?.status = PeriodStatus::Draft;
        state.push_expense(entry);
        Ok(())
    }

    async fn replace_computed_values(
        &self,
        period_id: u64,
        computed: Vec<ComputedMetric>,
        summary: Value,
    ) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        {
            let period = state.period_mut(period_id)?;
            period.status = PeriodStatus::Calculated;
            period.summary_json = Some(summary);
        }
        state.computed.retain(|r| r.period_id != period_id);
        for m in computed {
            let id = state.id();
            state.computed.push(PayrollComputedValue {
                id,
                period_id,
                payroll_name: m.payroll_name,
                user_id: m.user_id,
                metric_key: m.metric_key,
                amount: m.amount,
            });
        }
        Ok(())
    }

    async fn replace_period_content(
        &self,
        replacement: PeriodContentReplacement,
    ) -> PayrollResult<(usize, usize)> {
        if self.fail_content_replace.swap(false, Ordering::SeqCst) {
            return Err(PayrollError::Transaction(sqlx::Error::PoolTimedOut));
        }

        // Same unique key as `uq_payroll_input`, which compares names case-insensitively.
        let mut keys = BTreeSet::new();
        for row in &replacement.inputs {
            let key = (row.period_id, row.payroll_name.to_lowercase(), row.component_key);
            if !keys.insert(key) {
                return Err(PayrollError::Transaction(sqlx::Error::Protocol(format!(
                    "duplicate input for {} {:?}",
                    row.payroll_name, row.component_key
                ))));
            }
        }

        let mut state = self.state.lock().unwrap();
        let ids = &replacement.period_ids;
        for id in ids {
            state.period_mut(*id)?.status = PeriodStatus::Draft;
        }
        state.inputs.retain(|r| !ids.contains(&r.period_id));
        state.expenses.retain(|r| !ids.contains(&r.period_id));
        state.computed.retain(|r| !ids.contains(&r.period_id));
        state.receipts.retain(|r| !ids.contains(&r.period_id));

        let counts = (replacement.inputs.len(), replacement.expenses.len());
        for row in replacement.inputs {
            state.push_input(row);
        }
        for row in replacement.expenses {
            state.push_expense(row);
        }
        Ok(counts)
    }

    async fn list_receipts(&self, period_id: u64) -> PayrollResult<Vec<PayrollReceipt>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .receipts
            .iter()
            .filter(|r| r.period_id == period_id)
            .cloned()
            .collect())
    }

    async fn stage_receipts(
        &self,
        receipts: Vec<NewReceipt>,
        transition: PeriodTransition,
    ) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        state.apply_transition(&transition)?;
        let period_id = transition.period_id;
        state.receipts.retain(|r| r.period_id != period_id);
        for r in receipts {
            let id = state.id();
            state.receipts.push(PayrollReceipt {
                id,
                period_id,
                payroll_name: r.payroll_name,
                user_id: r.user_id,
                snapshot: r.snapshot,
                status: ReceiptStatus::PendingSignature,
                envelope_id: None,
            });
        }
        Ok(())
    }

    async fn confirm_receipts(&self, transition: PeriodTransition) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        state.apply_transition(&transition)?;
        for r in state
            .receipts
            .iter_mut()
            .filter(|r| r.period_id == transition.period_id)
        {
            if r.status == ReceiptStatus::PendingSignature {
                r.status = ReceiptStatus::Signed;
            }
        }
        Ok(())
    }

    async fn list_roster(&self) -> PayrollResult<Vec<RosterEmployee>> {
        Ok(self.state.lock().unwrap().roster.clone())
    }

    async fn list_identity_mappings(&self) -> PayrollResult<Vec<PayrollIdentityMapping>> {
        Ok(self.state.lock().unwrap().mappings.clone())
    }

    async fn upsert_identity_mappings(&self, rows: Vec<IdentityMappingUpsert>) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        for row in rows {
            let found = state
                .mappings
                .iter()
                .position(|m| m.normalized_payroll_name == row.normalized_payroll_name);
            match found {
                Some(i) => {
                    let m = &mut state.mappings[i];
                    m.display_payroll_name = row.display_payroll_name;
                    m.user_id = row.user_id;
                    m.status = row.status;
                    m.last_matched_at = Some(now);
                    m.notes = row.notes;
                }
                None => {
                    let id = state.id();
                    state.mappings.push(PayrollIdentityMapping {
                        id,
                        normalized_payroll_name: row.normalized_payroll_name,
                        display_payroll_name: row.display_payroll_name,
                        user_id: row.user_id,
                        status: row.status,
                        last_matched_at: Some(now),
                        notes: row.notes,
                    });
                }
            }
        }
        Ok(())
    }

    async fn create_import_batch(
        &self,
        source_type: PeriodSourceType,
        file_name: Option<String>,
        imported_by_id: u64,
    ) -> PayrollResult<u64> {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        state.batches.push(PayrollImportBatch {
            id,
            source_type,
            file_name,
            imported_by_id,
            status: BatchStatus::Processing,
            summary_json: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn complete_import_batch(&self, batch_id: u64, summary: Value) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(b) = state.batches.iter_mut().find(|b| b.id == batch_id) {
            b.status = BatchStatus::Completed;
            b.summary_json = Some(summary);
        }
        Ok(())
    }

    async fn fail_import_batch(&self, batch_id: u64, error_message: &str) -> PayrollResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(b) = state.batches.iter_mut().find(|b| b.id == batch_id) {
            b.status = BatchStatus::Failed;
            b.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn find_import_batch(&self, batch_id: u64) -> PayrollResult<Option<PayrollImportBatch>> {
        let state = self.state.lock().unwrap();
        Ok(state.batches.iter().find(|b| b.id == batch_id).cloned())
    }

    async fn insert_import_rows(
        &self,
        batch_id: u64,
        rows: Vec<NewImportRow>,
        _chunk_size: usize,
    ) -> PayrollResult<usize> {
        let mut state = self.state.lock().unwrap();
        let count = rows.len();
        state
            .import_rows
            .extend(rows.into_iter().map(|r| (batch_id, r)));
        Ok(count)
    }
}
