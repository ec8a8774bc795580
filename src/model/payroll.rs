use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::payroll::components::{ComponentKey, ExpenseCategory, MetricKey};
use crate::payroll::normalizer::PeriodKey;

/// Enum columns are stored as their SCREAMING_SNAKE_CASE text.
macro_rules! text_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = strum::ParseError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }
        )+
    };
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    Draft,
    Calculated,
    Approved,
    Sending,
    Sent,
    Locked,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodSourceType {
    Workbook,
    Manual,
    CarryForward,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceMethod {
    Manual,
    Workbook,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingStatus {
    AutoMatched,
    ManualMatched,
    Ambiguous,
    Unresolved,
}

impl MappingStatus {
    pub fn is_matched(self) -> bool {
        matches!(self, MappingStatus::AutoMatched | MappingStatus::ManualMatched)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    PendingSignature,
    Signed,
    Void,
}

text_column!(
    PeriodStatus,
    PeriodSourceType,
    SourceMethod,
    MappingStatus,
    BatchStatus,
    ReceiptStatus,
    ComponentKey,
    ExpenseCategory,
    MetricKey,
);

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PayrollPeriod {
    pub id: u64,
    pub label: String,
    #[schema(value_type = String, format = "date")]
    pub period_start: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub period_end: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: PeriodStatus,
    #[sqlx(try_from = "String")]
    pub source_type: PeriodSourceType,
    pub created_by_id: Option<u64>,
    pub approved_by_id: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub approved_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub locked_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub summary_json: Option<Value>,
}

impl PayrollPeriod {
    pub fn period_key(&self) -> PeriodKey {
        PeriodKey::from_date(self.period_start)
    }
}

#[derive(Debug, Clone)]
pub struct NewPeriod {
    pub key: PeriodKey,
    pub source_type: PeriodSourceType,
    pub created_by_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollInputValue {
    pub id: u64,
    pub period_id: u64,
    pub payroll_name: String,
    #[sqlx(try_from = "String")]
    pub component_key: ComponentKey,
    pub amount: f64,
    #[sqlx(try_from = "String")]
    pub source_method: SourceMethod,
    pub is_override: bool,
    pub user_id: Option<u64>,
    #[schema(value_type = Option<Object>)]
    pub provenance: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInputValue {
    pub period_id: u64,
    pub payroll_name: String,
    pub component_key: ComponentKey,
    pub amount: f64,
    pub source_method: SourceMethod,
    pub is_override: bool,
    pub user_id: Option<u64>,
    pub provenance: Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollExpenseEntry {
    pub id: u64,
    pub period_id: u64,
    pub payroll_name: Option<String>,
    pub user_id: Option<u64>,
    #[sqlx(try_from = "String")]
    pub category: ExpenseCategory,
    pub description: Option<String>,
    pub amount: f64,
    #[sqlx(try_from = "String")]
    pub source_method: SourceMethod,
    #[schema(value_type = Option<Object>)]
    pub provenance: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExpenseEntry {
    pub period_id: u64,
    pub payroll_name: Option<String>,
    pub user_id: Option<u64>,
    pub category: ExpenseCategory,
    pub description: Option<String>,
    pub amount: f64,
    pub source_method: SourceMethod,
    pub provenance: Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollComputedValue {
    pub id: u64,
    pub period_id: u64,
    pub payroll_name: String,
    pub user_id: Option<u64>,
    #[sqlx(try_from = "String")]
    pub metric_key: MetricKey,
    pub amount: f64,
}

/// One derived figure before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ComputedMetric {
    pub payroll_name: String,
    pub user_id: Option<u64>,
    pub metric_key: MetricKey,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollIdentityMapping {
    pub id: u64,
    pub normalized_payroll_name: String,
    pub display_payroll_name: String,
    pub user_id: Option<u64>,
    #[sqlx(try_from = "String")]
    pub status: MappingStatus,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_matched_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMappingUpsert {
    pub normalized_payroll_name: String,
    pub display_payroll_name: String,
    pub user_id: Option<u64>,
    pub status: MappingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollImportBatch {
    pub id: u64,
    #[sqlx(try_from = "String")]
    pub source_type: PeriodSourceType,
    pub file_name: Option<String>,
    pub imported_by_id: u64,
    #[sqlx(try_from = "String")]
    pub status: BatchStatus,
    #[schema(value_type = Option<Object>)]
    pub summary_json: Option<Value>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewImportRow {
    pub row_index: u32,
    pub sheet: Option<String>,
    pub period_key: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollApprovalEvent {
    pub id: u64,
    pub period_id: u64,
    pub actor_id: u64,
    #[sqlx(try_from = "String")]
    pub from_status: PeriodStatus,
    #[sqlx(try_from = "String")]
    pub to_status: PeriodStatus,
    pub comment: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PayrollReceipt {
    pub id: u64,
    pub period_id: u64,
    pub payroll_name: String,
    pub user_id: Option<u64>,
    #[schema(value_type = Object)]
    pub snapshot: Value,
    #[sqlx(try_from = "String")]
    pub status: ReceiptStatus,
    pub envelope_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReceipt {
    pub payroll_name: String,
    pub user_id: Option<u64>,
    pub snapshot: Value,
}

/// An employee that workbook names can resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow, ToSchema)]
pub struct RosterEmployee {
    pub id: u64,
    pub name: String,
}
