//! Period status gating: manual edits, approval, e-signature dispatch and locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

use super::components::{ComponentKey, ExpenseCategory};
use super::normalizer::{PeriodKey, normalize_payroll_name, parse_cell_number};
use super::store::{PayrollStore, PeriodTransition};
use crate::error::{PayrollError, PayrollResult};
use crate::model::payroll::{
    NewExpenseEntry, NewInputValue, NewPeriod, NewReceipt, PayrollIdentityMapping, PayrollPeriod,
    PeriodSourceType, PeriodStatus, SourceMethod,
};

pub async fn load_period(store: &dyn PayrollStore, period_id: u64) -> PayrollResult<PayrollPeriod> {
    store
        .find_period(period_id)
        .await?
        .ok_or_else(|| PayrollError::not_found(format!("payroll period {}", period_id)))
}

/// Manual edits are frozen once a period is approved.
pub fn ensure_editable(period: &PayrollPeriod) -> PayrollResult<()> {
    match period.status {
        PeriodStatus::Approved
        | PeriodStatus::Sending
        | PeriodStatus::Sent
        | PeriodStatus::Locked => Err(PayrollError::policy(period.status, "inputs are frozen")),
        PeriodStatus::Draft | PeriodStatus::Calculated => Ok(()),
    }
}

/// Returns the period for `key`, creating a DRAFT one when the month has none yet.
/// The flag tells whether it was created.
pub async fn create_or_reuse_period(
    store: &dyn PayrollStore,
    key: PeriodKey,
    source_type: PeriodSourceType,
    actor_id: Option<u64>,
) -> PayrollResult<(PayrollPeriod, bool)> {
    if let Some(existing) = store.find_period_by_start(key.to_date()).await? {
        return Ok((existing, false));
    }

    let period = store
        .create_period(NewPeriod {
            key,
            source_type,
            created_by_id: actor_id,
        })
        .await?;

    tracing::info!(period = %key, id = period.id, "Payroll period created");
    Ok((period, true))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InputEdit {
    pub payroll_name: String,
    pub component_key: ComponentKey,
    /// Number or spreadsheet-style text such as `"1,250.00"`.
    #[schema(value_type = Object)]
    pub amount: Value,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExpenseEdit {
    pub payroll_name: Option<String>,
    pub category: ExpenseCategory,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub amount: Value,
    pub note: Option<String>,
}

fn matched_user(mappings: &[PayrollIdentityMapping], payroll_name: &str) -> Option<u64> {
    let key = normalize_payroll_name(payroll_name);
    mappings
        .iter()
        .find(|m| m.normalized_payroll_name == key && m.status.is_matched())
        .and_then(|m| m.user_id)
}

fn manual_provenance(actor_id: u64, note: Option<String>) -> Value {
    json!({
        "actor_id": actor_id,
        "edited_at": Utc::now(),
        "note": note,
    })
}

fn required_name(raw: &str) -> PayrollResult<String> {
    let name = raw.trim();
    if normalize_payroll_name(name).is_empty() {
        return Err(PayrollError::validation("payroll_name must not be empty"));
    }
    Ok(name.to_string())
}

/// The spelling a manual edit is stored under, with its matched user.
///
/// A name already on the period (same normalized name, or same matched user) keeps that
/// spelling; a matched alias falls back to the roster name; anything else is stored trimmed.
async fn canonical_payroll_name(
    store: &dyn PayrollStore,
    period_id: u64,
    raw: &str,
) -> PayrollResult<(String, Option<u64>)> {
    let name = required_name(raw)?;
    let key = normalize_payroll_name(&name);
    let user_id = matched_user(&store.list_identity_mappings().await?, &name);

    let inputs = store.list_input_values(period_id).await?;
    let expenses = store.list_expense_entries(period_id).await?;
    let existing = inputs
        .iter()
        .map(|i| (i.payroll_name.as_str(), i.user_id))
        .chain(
            expenses
                .iter()
                .filter_map(|e| e.payroll_name.as_deref().map(|n| (n, e.user_id))),
        )
        .find(|(n, u)| normalize_payroll_name(n) == key || (user_id.is_some() && *u == user_id));
    if let Some((existing, _)) = existing {
        return Ok((existing.to_string(), user_id));
    }

    if let Some(id) = user_id {
        if let Some(employee) = store.list_roster().await?.into_iter().find(|e| e.id == id) {
            return Ok((employee.name, user_id));
        }
    }

    Ok((name, user_id))
}

/// Upserts one manual input and sends the period back to DRAFT.
pub async fn update_input_value(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
    edit: InputEdit,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    ensure_editable(&period)?;

    let amount = parse_cell_number(&edit.amount)?;
    let (payroll_name, user_id) = canonical_payroll_name(store, period_id, &edit.payroll_name).await?;

    let key = normalize_payroll_name(&payroll_name);
    let is_override = store.list_input_values(period_id).await?.iter().any(|i| {
        i.component_key == edit.component_key && normalize_payroll_name(&i.payroll_name) == key
    });

    store
        .upsert_manual_input(NewInputValue {
            period_id,
            payroll_name,
            component_key: edit.component_key,
            amount,
            source_method: SourceMethod::Manual,
            is_override,
            user_id,
            provenance: manual_provenance(actor_id, edit.note),
        })
        .await?;

    load_period(store, period_id).await
}

/// Adds one manual expense line and sends the period back to DRAFT.
pub async fn add_expense_entry(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
    edit: ExpenseEdit,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    ensure_editable(&period)?;

    let amount = parse_cell_number(&edit.amount)?;
    let (payroll_name, user_id) = match edit.payroll_name.as_deref() {
        Some(raw) => {
            let (name, user_id) = canonical_payroll_name(store, period_id, raw).await?;
            (Some(name), user_id)
        }
        None => (None, None),
    };

    store
        .insert_manual_expense(NewExpenseEntry {
            period_id,
            payroll_name,
            user_id,
            category: edit.category,
            description: edit.description,
            amount,
            source_method: SourceMethod::Manual,
            provenance: manual_provenance(actor_id, edit.note),
        })
        .await?;

    load_period(store, period_id).await
}

/// Names on the period's rows that neither carry a user id nor have a matched alias.
pub async fn blocked_payroll_names(
    store: &dyn PayrollStore,
    period_id: u64,
) -> PayrollResult<Vec<String>> {
    let mappings: HashMap<String, PayrollIdentityMapping> = store
        .list_identity_mappings()
        .await?
        .into_iter()
        .map(|m| (m.normalized_payroll_name.clone(), m))
        .collect();

    let inputs = store.list_input_values(period_id).await?;
    let expenses = store.list_expense_entries(period_id).await?;

    let rows = inputs
        .iter()
        .map(|i| (Some(i.payroll_name.as_str()), i.user_id))
        .chain(expenses.iter().map(|e| (e.payroll_name.as_deref(), e.user_id)));

    let mut blocked = BTreeSet::new();
    for (name, user_id) in rows {
        let Some(name) = name else { continue };
        if user_id.is_some() {
            continue;
        }
        let matched = mappings
            .get(&normalize_payroll_name(name))
            .is_some_and(|m| m.status.is_matched() && m.user_id.is_some());
        if !matched {
            blocked.insert(name.to_string());
        }
    }

    Ok(blocked.into_iter().collect())
}

/// CALCULATED -> APPROVED. Approving an already approved period is a no-op.
pub async fn approve_period(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
    comment: Option<String>,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    match period.status {
        PeriodStatus::Approved => return Ok(period),
        PeriodStatus::Calculated => {}
        status => {
            return Err(PayrollError::policy(
                status,
                "only calculated periods can be approved",
            ));
        }
    }

    let blocked = blocked_payroll_names(store, period_id).await?;
    if !blocked.is_empty() {
        return Err(PayrollError::policy(
            period.status,
            format!("unresolved payroll names: {}", blocked.join(", ")),
        ));
    }

    store
        .transition_period(PeriodTransition::single(
            period_id,
            actor_id,
            PeriodStatus::Calculated,
            PeriodStatus::Approved,
            comment,
        ))
        .await?;

    tracing::info!(period_id, actor_id, "Payroll period approved");
    load_period(store, period_id).await
}

/// Pay-stub snapshots, one per payroll name, from the computed values.
async fn build_receipts(
    store: &dyn PayrollStore,
    period: &PayrollPeriod,
) -> PayrollResult<Vec<NewReceipt>> {
    let mut by_name: BTreeMap<String, (Option<u64>, Map<String, Value>)> = BTreeMap::new();
    for value in store.list_computed_values(period.id).await? {
        let (user_id, metrics) = by_name.entry(value.payroll_name).or_default();
        *user_id = user_id.or(value.user_id);
        metrics.insert(value.metric_key.to_string(), json!(value.amount));
    }

    Ok(by_name
        .into_iter()
        .map(|(payroll_name, (user_id, metrics))| NewReceipt {
            snapshot: json!({
                "period_key": period.period_key(),
                "label": period.label,
                "payroll_name": payroll_name,
                "user_id": user_id,
                "metrics": metrics,
            }),
            payroll_name,
            user_id,
        })
        .collect())
}

/// APPROVED -> SENDING, staging one receipt per payroll name for e-signature.
pub async fn send_period(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    if period.status != PeriodStatus::Approved {
        return Err(PayrollError::policy(
            period.status,
            "only approved periods can be sent",
        ));
    }

    let receipts = build_receipts(store, &period).await?;
    let count = receipts.len();
    store
        .stage_receipts(
            receipts,
            PeriodTransition::single(
                period_id,
                actor_id,
                PeriodStatus::Approved,
                PeriodStatus::Sending,
                None,
            ),
        )
        .await?;

    tracing::info!(period_id, receipts = count, "Payroll receipts staged for signature");
    load_period(store, period_id).await
}

/// SENDING -> SENT once the envelope provider confirms delivery.
pub async fn mark_period_sent(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    if period.status != PeriodStatus::Sending {
        return Err(PayrollError::policy(
            period.status,
            "only periods being sent can be confirmed",
        ));
    }

    store
        .confirm_receipts(PeriodTransition::single(
            period_id,
            actor_id,
            PeriodStatus::Sending,
            PeriodStatus::Sent,
            None,
        ))
        .await?;

    load_period(store, period_id).await
}

/// APPROVED or SENT -> LOCKED. Terminal.
pub async fn lock_period(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
    comment: Option<String>,
) -> PayrollResult<PayrollPeriod> {
    let period = load_period(store, period_id).await?;
    let from = match period.status {
        PeriodStatus::Approved | PeriodStatus::Sent => period.status,
        status => {
            return Err(PayrollError::policy(
                status,
                "only approved or sent periods can be locked",
            ));
        }
    };

    store
        .transition_period(PeriodTransition::single(
            period_id,
            actor_id,
            from,
            PeriodStatus::Locked,
            comment,
        ))
        .await?;

    tracing::info!(period_id, actor_id, "Payroll period locked");
    load_period(store, period_id).await
}

/// CALCULATED -> APPROVED -> LOCKED as one unit, two approval events.
pub async fn approve_and_lock(
    store: &dyn PayrollStore,
    period_id: u64,
    actor_id: u64,
    comment: Option<String>,
) -> PayrollResult<()> {
    store
        .transition_period(PeriodTransition {
            period_id,
            actor_id,
            steps: vec![
                (PeriodStatus::Calculated, PeriodStatus::Approved),
                (PeriodStatus::Approved, PeriodStatus::Locked),
            ],
            comment,
        })
        .await
}
