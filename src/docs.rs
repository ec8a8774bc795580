use crate::api::payroll::{
    CreatePeriod, PeriodDetail, PeriodResponse, ResolveIdentity, TransitionComment,
};
use crate::model::payroll::{
    BatchStatus, ComputedMetric, MappingStatus, PayrollApprovalEvent, PayrollComputedValue,
    PayrollExpenseEntry, PayrollIdentityMapping, PayrollInputValue, PayrollPeriod, PayrollReceipt,
    PeriodSourceType, PeriodStatus, ReceiptStatus, SourceMethod,
};
use crate::payroll::backfill::{PayrollBackfillSummary, PeriodOutcome, PeriodReport};
use crate::payroll::components::{ComponentKey, ExpenseCategory, MetricKey};
use crate::payroll::engine::{Mismatch, RecalculationResult, ReconciliationCheck, Severity};
use crate::payroll::identity::MappingSummary;
use crate::payroll::lifecycle::{ExpenseEdit, InputEdit};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HRM Payroll API",
        version = "1.0.0",
        description = r#"
## Payroll Period Engine

Turns a month of payroll inputs (manual entries, historical workbook imports, carried-forward
balances) into reconciled per-employee pay computations.

### 🔹 Key Features
- **Periods**
  - One period per calendar month, created on demand or by workbook backfill
- **Calculation**
  - Earnings, deductions, net salary and running balance per payroll name
  - NET vs PAID reconciliation with a configurable tolerance
- **Lifecycle**
  - DRAFT → CALCULATED → APPROVED → SENDING → SENT → LOCKED
- **Identities**
  - Free-text workbook names resolved to employees through a persistent alias table

### 🔐 Security
Every endpoint requires **JWT Bearer authentication** with the **Admin** or **HR** role.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::payroll::create_period,
        crate::api::payroll::list_periods,
        crate::api::payroll::get_period,
        crate::api::payroll::recalculate_period,
        crate::api::payroll::approve,
        crate::api::payroll::send,
        crate::api::payroll::mark_sent,
        crate::api::payroll::lock,
        crate::api::payroll::update_input,
        crate::api::payroll::add_expense,
        crate::api::payroll::backfill,
        crate::api::payroll::list_identities,
        crate::api::payroll::resolve_identity
    ),
    components(
        schemas(
            CreatePeriod,
            PeriodResponse,
            PeriodDetail,
            TransitionComment,
            ResolveIdentity,
            InputEdit,
            ExpenseEdit,
            PayrollPeriod,
            PayrollInputValue,
            PayrollExpenseEntry,
            PayrollComputedValue,
            PayrollIdentityMapping,
            PayrollApprovalEvent,
            PayrollReceipt,
            ComputedMetric,
            RecalculationResult,
            Mismatch,
            ReconciliationCheck,
            Severity,
            PayrollBackfillSummary,
            PeriodReport,
            PeriodOutcome,
            MappingSummary,
            PeriodStatus,
            PeriodSourceType,
            SourceMethod,
            MappingStatus,
            BatchStatus,
            ReceiptStatus,
            ComponentKey,
            ExpenseCategory,
            MetricKey
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Payroll", description = "Payroll period engine APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
