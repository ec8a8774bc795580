use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::{MySql, MySqlConnection, MySqlPool, QueryBuilder};

use super::{PayrollStore, PeriodContentReplacement, PeriodTransition};
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    BatchStatus, ComputedMetric, IdentityMappingUpsert, NewExpenseEntry, NewImportRow,
    NewInputValue, NewPeriod, NewReceipt, PayrollApprovalEvent, PayrollComputedValue,
    PayrollExpenseEntry, PayrollIdentityMapping, PayrollImportBatch, PayrollInputValue,
    PayrollPeriod, PayrollReceipt, PeriodSourceType, PeriodStatus, ReceiptStatus,
    RosterEmployee,
};
use crate::utils::roster_cache;

const PERIOD_COLUMNS: &str = r#"
    id, label, period_start, period_end, status, source_type, created_by_id,
    approved_by_id, approved_at, locked_at, summary_json
"#;

/// Tables whose rows belong to one period and are rebuilt on every re-import.
const PERIOD_CONTENT_TABLES: [&str; 4] = [
    "payroll_receipts",
    "payroll_computed_values",
    "payroll_expense_entries",
    "payroll_input_values",
];

#[derive(Clone)]
pub struct MySqlPayrollStore {
    pool: MySqlPool,
    /// Rows per multi-row INSERT.
    chunk_size: usize,
}

impl MySqlPayrollStore {
    pub fn new(pool: MySqlPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }
}

async fn apply_transition(
    conn: &mut MySqlConnection,
    t: &PeriodTransition,
) -> PayrollResult<()> {
    for (from, to) in &t.steps {
        let sql = match to {
            PeriodStatus::Approved => {
                r#"
                UPDATE payroll_periods
                SET status = ?, approved_by_id = ?, approved_at = NOW()
                WHERE id = ? AND status = ?
                "#
            }
            PeriodStatus::Locked => {
                r#"
                UPDATE payroll_periods
                SET status = ?, locked_at = NOW()
                WHERE id = ? AND status = ?
                "#
            }
            _ => {
                r#"
                UPDATE payroll_periods
                SET status = ?
                WHERE id = ? AND status = ?
                "#
            }
        };

        let mut query = sqlx::query(sql).bind(to.as_ref());
        if *to == PeriodStatus::Approved {
            query = query.bind(t.actor_id);
        }
        let result = query
            .bind(t.period_id)
            .bind(from.as_ref())
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM payroll_periods WHERE id = ?")
                    .bind(t.period_id)
                    .fetch_optional(&mut *conn)
                    .await?;

            return match current.and_then(|s| s.parse::<PeriodStatus>().ok()) {
                Some(status) => Err(PayrollError::policy(
                    status,
                    format!("expected {} for this transition", from),
                )),
                None => Err(PayrollError::not_found(format!("payroll period {}", t.period_id))),
            };
        }

        sqlx::query(
            r#"
            INSERT INTO payroll_approval_events
                (period_id, actor_id, from_status, to_status, comment)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(t.period_id)
        .bind(t.actor_id)
        .bind(from.as_ref())
        .bind(to.as_ref())
        .bind(t.comment.as_deref())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn set_draft(conn: &mut MySqlConnection, period_ids: &[u64]) -> PayrollResult<()> {
    if period_ids.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<MySql> = QueryBuilder::new("UPDATE payroll_periods SET status = ");
    qb.push_bind(PeriodStatus::Draft.as_ref());
    qb.push(" WHERE id IN (");
    let mut ids = qb.separated(", ");
    for id in period_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn insert_inputs(
    conn: &mut MySqlConnection,
    rows: &[NewInputValue],
    chunk_size: usize,
) -> PayrollResult<()> {
    for chunk in rows.chunks(chunk_size.max(1)) {
        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"INSERT INTO payroll_input_values
            (period_id, payroll_name, component_key, amount, source_method, is_override, user_id, provenance) "#,
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.period_id)
                .push_bind(&row.payroll_name)
                .push_bind(row.component_key.as_ref())
                .push_bind(row.amount)
                .push_bind(row.source_method.as_ref())
                .push_bind(row.is_override)
                .push_bind(row.user_id)
                .push_bind(&row.provenance);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_expenses(
    conn: &mut MySqlConnection,
    rows: &[NewExpenseEntry],
    chunk_size: usize,
) -> PayrollResult<()> {
    for chunk in rows.chunks(chunk_size.max(1)) {
        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
            r#"INSERT INTO payroll_expense_entries
            (period_id, payroll_name, user_id, category, description, amount, source_method, provenance) "#,
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(row.period_id)
                .push_bind(row.payroll_name.as_deref())
                .push_bind(row.user_id)
                .push_bind(row.category.as_ref())
                .push_bind(row.description.as_deref())
                .push_bind(row.amount)
                .push_bind(row.source_method.as_ref())
                .push_bind(&row.provenance);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

#[async_trait]
impl PayrollStore for MySqlPayrollStore {
    async fn find_period(&self, id: u64) -> PayrollResult<Option<PayrollPeriod>> {
        let sql = format!("SELECT {} FROM payroll_periods WHERE id = ?", PERIOD_COLUMNS);
        Ok(sqlx::query_as::<_, PayrollPeriod>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_period_by_start(&self, start: NaiveDate) -> PayrollResult<Option<PayrollPeriod>> {
        let sql = format!(
            "SELECT {} FROM payroll_periods WHERE period_start = ?",
            PERIOD_COLUMNS
        );
        Ok(sqlx::query_as::<_, PayrollPeriod>(&sql)
            .bind(start)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_periods(&self) -> PayrollResult<Vec<PayrollPeriod>> {
        let sql = format!(
            "SELECT {} FROM payroll_periods ORDER BY period_start DESC",
            PERIOD_COLUMNS
        );
        Ok(sqlx::query_as::<_, PayrollPeriod>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_period(&self, period: NewPeriod) -> PayrollResult<PayrollPeriod> {
        let (start, end) = period.key.month_bounds();
        let result = sqlx::query(
            r#"
            INSERT INTO payroll_periods
                (label, period_start, period_end, status, source_type, created_by_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(period.key.label())
        .bind(start)
        .bind(end)
        .bind(PeriodStatus::Draft.as_ref())
        .bind(period.source_type.as_ref())
        .bind(period.created_by_id)
        .execute(&self.pool)
        .await?;

        self.find_period(result.last_insert_id())
            .await?
            .ok_or_else(|| PayrollError::not_found(format!("payroll period {}", period.key)))
    }

    async fn update_period_summary(&self, period_id: u64, summary: Value) -> PayrollResult<()> {
        sqlx::query("UPDATE payroll_periods SET summary_json = ? WHERE id = ?")
            .bind(&summary)
            .bind(period_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn transition_period(&self, transition: PeriodTransition) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;
        apply_transition(&mut tx, &transition).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_approval_events(&self, period_id: u64) -> PayrollResult<Vec<PayrollApprovalEvent>> {
        Ok(sqlx::query_as::<_, PayrollApprovalEvent>(
            r#"
            SELECT id, period_id, actor_id, from_status, to_status, comment, created_at
            FROM payroll_approval_events
            WHERE period_id = ?
            ORDER BY id
            "#,
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_input_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollInputValue>> {
        Ok(sqlx::query_as::<_, PayrollInputValue>(
            r#"
            SELECT id, period_id, payroll_name, component_key, amount, source_method,
                   is_override, user_id, provenance
            FROM payroll_input_values
            WHERE period_id = ?
            ORDER BY payroll_name, component_key
            "#,
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_expense_entries(&self, period_id: u64) -> PayrollResult<Vec<PayrollExpenseEntry>> {
        Ok(sqlx::query_as::<_, PayrollExpenseEntry>(
            r#"
            SELECT id, period_id, payroll_name, user_id, category, description, amount,
                   source_method, provenance
            FROM payroll_expense_entries
            WHERE period_id = ?
            ORDER BY id
            "#,
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_computed_values(&self, period_id: u64) -> PayrollResult<Vec<PayrollComputedValue>> {
        Ok(sqlx::query_as::<_, PayrollComputedValue>(
            r#"
            SELECT id, period_id, payroll_name, user_id, metric_key, amount
            FROM payroll_computed_values
            WHERE period_id = ?
            ORDER BY payroll_name, id
            "#,
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_manual_input(&self, input: NewInputValue) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO payroll_input_values
                (period_id, payroll_name, component_key, amount, source_method, is_override, user_id, provenance)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                amount = VALUES(amount),
                source_method = VALUES(source_method),
                is_override = VALUES(is_override),
                user_id = COALESCE(VALUES(user_id), user_id),
                provenance = VALUES(provenance)
            "#,
        )
        .bind(input.period_id)
        .bind(&input.payroll_name)
        .bind(input.component_key.as_ref())
        .bind(input.amount)
        .bind(input.source_method.as_ref())
        .bind(input.is_override)
        .bind(input.user_id)
        .bind(&input.provenance)
        .execute(&mut *tx)
        .await?;

        set_draft(&mut tx, &[input.period_id]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_manual_expense(&self, entry: NewExpenseEntry) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;
        let period_id = entry.period_id;
        insert_expenses(&mut tx, &[entry], 1).await?;
        set_draft(&mut tx, &[period_id]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_computed_values(
        &self,
        period_id: u64,
        computed: Vec<ComputedMetric>,
        summary: Value,
    ) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM payroll_computed_values WHERE period_id = ?")
            .bind(period_id)
            .execute(&mut *tx)
            .await?;

        for chunk in computed.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO payroll_computed_values (period_id, payroll_name, user_id, metric_key, amount) ",
            );
            qb.push_values(chunk, |mut b, m| {
                b.push_bind(period_id)
                    .push_bind(&m.payroll_name)
                    .push_bind(m.user_id)
                    .push_bind(m.metric_key.as_ref())
                    .push_bind(m.amount);
            });
            qb.build().execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE payroll_periods SET status = ?, summary_json = ? WHERE id = ?")
            .bind(PeriodStatus::Calculated.as_ref())
            .bind(&summary)
            .bind(period_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_period_content(
        &self,
        replacement: PeriodContentReplacement,
    ) -> PayrollResult<(usize, usize)> {
        if replacement.period_ids.is_empty() {
            return Ok((0, 0));
        }

        let mut tx = self.pool.begin().await?;

        for table in PERIOD_CONTENT_TABLES {
            let mut qb: QueryBuilder<MySql> =
                QueryBuilder::new(format!("DELETE FROM {} WHERE period_id IN (", table));
            let mut ids = qb.separated(", ");
            for id in &replacement.period_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
            qb.build().execute(&mut *tx).await?;
        }

        insert_inputs(&mut tx, &replacement.inputs, replacement.chunk_size).await?;
        insert_expenses(&mut tx, &replacement.expenses, replacement.chunk_size).await?;
        set_draft(&mut tx, &replacement.period_ids).await?;

        tx.commit().await?;
        Ok((replacement.inputs.len(), replacement.expenses.len()))
    }

    async fn list_receipts(&self, period_id: u64) -> PayrollResult<Vec<PayrollReceipt>> {
        Ok(sqlx::query_as::<_, PayrollReceipt>(
            r#"
            SELECT id, period_id, payroll_name, user_id, snapshot, status, envelope_id
            FROM payroll_receipts
            WHERE period_id = ?
            ORDER BY payroll_name
            "#,
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn stage_receipts(
        &self,
        receipts: Vec<NewReceipt>,
        transition: PeriodTransition,
    ) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;
        apply_transition(&mut tx, &transition).await?;

        sqlx::query("DELETE FROM payroll_receipts WHERE period_id = ?")
            .bind(transition.period_id)
            .execute(&mut *tx)
            .await?;

        for chunk in receipts.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO payroll_receipts (period_id, payroll_name, user_id, snapshot, status) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(transition.period_id)
                    .push_bind(&r.payroll_name)
                    .push_bind(r.user_id)
                    .push_bind(&r.snapshot)
                    .push_bind(ReceiptStatus::PendingSignature.as_ref());
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn confirm_receipts(&self, transition: PeriodTransition) -> PayrollResult<()> {
        let mut tx = self.pool.begin().await?;
        apply_transition(&mut tx, &transition).await?;

        sqlx::query("UPDATE payroll_receipts SET status = ? WHERE period_id = ? AND status = ?")
            .bind(ReceiptStatus::Signed.as_ref())
            .bind(transition.period_id)
            .bind(ReceiptStatus::PendingSignature.as_ref())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_roster(&self) -> PayrollResult<Vec<RosterEmployee>> {
        let roster = roster_cache::get_roster(&self.pool).await?;
        Ok(roster.as_ref().clone())
    }

    async fn list_identity_mappings(&self) -> PayrollResult<Vec<PayrollIdentityMapping>> {
        Ok(sqlx::query_as::<_, PayrollIdentityMapping>(
            r#"
            SELECT id, normalized_payroll_name, display_payroll_name, user_id, status,
                   last_matched_at, notes
            FROM payroll_identity_mappings
            ORDER BY normalized_payroll_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_identity_mappings(&self, rows: Vec<IdentityMappingUpsert>) -> PayrollResult<()> {
        for chunk in rows.chunks(self.chunk_size) {
            let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
                r#"INSERT INTO payroll_identity_mappings
                (normalized_payroll_name, display_payroll_name, user_id, status, notes, last_matched_at) "#,
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(&row.normalized_payroll_name)
                    .push_bind(&row.display_payroll_name)
                    .push_bind(row.user_id)
                    .push_bind(row.status.as_ref())
                    .push_bind(row.notes.as_deref())
                    .push("NOW()");
            });
            qb.push(
                r#"
                ON DUPLICATE KEY UPDATE
                    display_payroll_name = VALUES(display_payroll_name),
                    user_id = VALUES(user_id),
                    status = VALUES(status),
                    notes = VALUES(notes),
                    last_matched_at = NOW()
                "#,
            );
            qb.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn create_import_batch(
        &self,
        source_type: PeriodSourceType,
        file_name: Option<String>,
        imported_by_id: u64,
    ) -> PayrollResult<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO payroll_import_batches (source_type, file_name, imported_by_id, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(source_type.as_ref())
        .bind(file_name)
        .bind(imported_by_id)
        .bind(BatchStatus::Processing.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_id())
    }

    async fn complete_import_batch(&self, batch_id: u64, summary: Value) -> PayrollResult<()> {
        sqlx::query(
            r#"
            UPDATE payroll_import_batches
            SET status = ?, summary_json = ?, completed_at = NOW()
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(BatchStatus::Completed.as_ref())
        .bind(&summary)
        .bind(batch_id)
        .bind(BatchStatus::Processing.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_import_batch(&self, batch_id: u64, error_message: &str) -> PayrollResult<()> {
        sqlx::query(
            r#"
            UPDATE payroll_import_batches
            SET status = ?, error_message = ?, completed_at = NOW()
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(BatchStatus::Failed.as_ref())
        .bind(error_message)
        .bind(batch_id)
        .bind(BatchStatus::Processing.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_import_batch(&self, batch_id: u64) -> PayrollResult<Option<PayrollImportBatch>> {
        Ok(sqlx::query_as::<_, PayrollImportBatch>(
            r#"
            SELECT id, source_type, file_name, imported_by_id, status, summary_json, error_message
            FROM payroll_import_batches
            WHERE id = ?
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_import_rows(
        &self,
        batch_id: u64,
        rows: Vec<NewImportRow>,
        chunk_size: usize,
    ) -> PayrollResult<usize> {
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(chunk_size.max(1)) {
            let mut qb: QueryBuilder<MySql> = QueryBuilder::new(
                "INSERT INTO payroll_import_rows (batch_id, row_index, sheet, period_key, payload) ",
            );
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(batch_id)
                    .push_bind(r.row_index)
                    .push_bind(r.sheet.as_deref())
                    .push_bind(r.period_key.as_deref())
                    .push_bind(&r.payload);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }
}
