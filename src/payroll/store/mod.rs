//! Persistence seam for the payroll engine.
//!
//! Every method that touches more than one row commits atomically: a failure leaves the
//! period exactly as it was.

pub mod mysql;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::error::PayrollResult;
use crate::model::payroll::{
    ComputedMetric, IdentityMappingUpsert, NewExpenseEntry, NewImportRow, NewInputValue,
    NewPeriod, NewReceipt, PayrollApprovalEvent, PayrollComputedValue, PayrollExpenseEntry,
    PayrollIdentityMapping, PayrollImportBatch, PayrollInputValue, PayrollPeriod,
    PayrollReceipt, PeriodSourceType, PeriodStatus, RosterEmployee,
};

/// A status change applied as one unit: every step appends one approval event and the
/// period ends in the last step's `to` status.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTransition {
    pub period_id: u64,
    pub actor_id: u64,
    pub steps: Vec<(PeriodStatus, PeriodStatus)>,
    pub comment: Option<String>,
}

impl PeriodTransition {
    pub fn single(
        period_id: u64,
        actor_id: u64,
        from: PeriodStatus,
        to: PeriodStatus,
        comment: Option<String>,
    ) -> Self {
        Self {
            period_id,
            actor_id,
            steps: vec![(from, to)],
            comment,
        }
    }

    pub fn final_status(&self) -> Option<PeriodStatus> {
        self.steps.last().map(|(_, to)| *to)
    }
}

/// Full replacement of the workbook-owned content of a set of periods.
#[derive(Debug, Clone, Default)]
pub struct PeriodContentReplacement {
    pub period_ids: Vec<u64>,
    pub inputs: Vec<NewInputValue>,
    pub expenses: Vec<NewExpenseEntry>,
    pub chunk_size: usize,
}

#[async_trait]
pub trait PayrollStore: Send + Sync {
    // Periods
    async fn find_period(&self, id: u64) -> PayrollResult<Option<PayrollPeriod>>;
    async fn find_period_by_start(&self, start: NaiveDate) -> PayrollResult<Option<PayrollPeriod>>;
    async fn list_periods(&self) -> PayrollResult<Vec<PayrollPeriod>>;
    async fn create_period(&self, period: NewPeriod) -> PayrollResult<PayrollPeriod>;
    async fn update_period_summary(&self, period_id: u64, summary: Value) -> PayrollResult<()>;
    /// Applies every step of the transition plus its approval events in one transaction.
    async fn transition_period(&self, transition: PeriodTransition) -> PayrollResult<()>;
    async fn list_approval_events(&self, period_id: u64) -> PayrollResult<Vec<PayrollApprovalEvent>>;

    // Inputs, expenses and computed values
    async fn list_input_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollInputValue>>;
    async fn list_expense_entries(&self, period_id: u64) -> PayrollResult<Vec<PayrollExpenseEntry>>;
    async fn list_computed_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollComputedValue>>;
    /// Upserts one (period, name, component) row and moves the period back to DRAFT.
    async fn upsert_manual_input(&self, input: NewInputValue) -> PayrollResult<()>;
    /// Inserts one expense line and moves the period back to DRAFT.
    async fn insert_manual_expense(&self, entry: NewExpenseEntry) -> PayrollResult<()>;
    /// Replaces the computed rows of a period, stores the reconciliation summary and marks
    /// the period CALCULATED.
    async fn replace_computed_values(
        &self,
        period_id: u64,
        computed: Vec<ComputedMetric>,
        summary: Value,
    ) -> PayrollResult<()>;
    /// Deletes inputs, expenses, computed values and receipts of every listed period,
    /// inserts the new rows in chunks and resets the periods to DRAFT.
    async fn replace_period_content(
        &self,
        replacement: PeriodContentReplacement,
    ) -> PayrollResult<(usize, usize)>;

    // Receipts
    async fn list_receipts(&self, period_id: u64) -> PayrollResult<Vec<PayrollReceipt>>;
    /// Replaces the period's receipts and applies the transition that submits them.
    async fn stage_receipts(
        &self,
        receipts: Vec<NewReceipt>,
        transition: PeriodTransition,
    ) -> PayrollResult<()>;
    /// Marks every pending receipt signed and applies the transition.
    async fn confirm_receipts(&self, transition: PeriodTransition) -> PayrollResult<()>;

    // Identities
    async fn list_roster(&self) -> PayrollResult<Vec<RosterEmployee>>;
    async fn list_identity_mappings(&self) -> PayrollResult<Vec<PayrollIdentityMapping>>;
    /// Last writer wins on display name, user and status.
    async fn upsert_identity_mappings(&self, rows: Vec<IdentityMappingUpsert>) -> PayrollResult<()>;

    // Import batches
    async fn create_import_batch(
        &self,
        source_type: PeriodSourceType,
        file_name: Option<String>,
        imported_by_id: u64,
    ) -> PayrollResult<u64>;
    async fn complete_import_batch(&self, batch_id: u64, summary: Value) -> PayrollResult<()>;
    async fn fail_import_batch(&self, batch_id: u64, error_message: &str) -> PayrollResult<()>;
    async fn find_import_batch(&self, batch_id: u64) -> PayrollResult<Option<PayrollImportBatch>>;
    async fn insert_import_rows(
        &self,
        batch_id: u64,
        rows: Vec<NewImportRow>,
        chunk_size: usize,
    ) -> PayrollResult<usize>;
}
