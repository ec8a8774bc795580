use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::model::payroll::{
    PayrollApprovalEvent, PayrollComputedValue, PayrollExpenseEntry, PayrollIdentityMapping,
    PayrollInputValue, PayrollPeriod, PayrollReceipt, PeriodSourceType,
};
use crate::payroll::backfill::{BackfillOptions, PayrollBackfillSummary, run_payroll_backfill};
use crate::payroll::engine::{CalculationSettings, RecalculationResult, recalculate_payroll_period};
use crate::payroll::identity::resolve_identity_manually;
use crate::payroll::lifecycle::{
    ExpenseEdit, InputEdit, add_expense_entry, approve_period, create_or_reuse_period,
    load_period, lock_period, mark_period_sent, send_period, update_input_value,
};
use crate::payroll::normalizer::PeriodKey;
use crate::payroll::store::PayrollStore;
use crate::payroll::workbook::JsonWorkbookParser;

#[derive(Deserialize, ToSchema)]
pub struct CreatePeriod {
    #[schema(example = "01/2026")]
    pub period_key: String,
}

#[derive(Serialize, ToSchema)]
pub struct PeriodResponse {
    pub period: PayrollPeriod,
    pub created: bool,
}

#[derive(Serialize, ToSchema)]
pub struct PeriodDetail {
    pub period: PayrollPeriod,
    pub inputs: Vec<PayrollInputValue>,
    pub expenses: Vec<PayrollExpenseEntry>,
    pub computed: Vec<PayrollComputedValue>,
    pub receipts: Vec<PayrollReceipt>,
    pub events: Vec<PayrollApprovalEvent>,
}

#[derive(Deserialize, ToSchema)]
pub struct TransitionComment {
    #[schema(example = "Checked against bank sheet")]
    pub comment: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct BackfillQuery {
    /// Original workbook file name, kept on the import batch.
    pub file_name: Option<String>,
    /// Latest months to import, 1 to 120.
    pub months: Option<u32>,
    pub tolerance: Option<f64>,
    #[serde(default)]
    pub lock_approved: bool,
    #[serde(default)]
    pub use_employee_roster_names: bool,
    #[serde(default)]
    pub overwrite_locked: bool,
    #[serde(default)]
    pub persist_import_rows: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ResolveIdentity {
    #[schema(example = "A. Noor")]
    pub payroll_name: String,
    #[schema(example = 42)]
    pub user_id: u64,
    pub notes: Option<String>,
}

fn comment(body: Option<web::Json<TransitionComment>>) -> Option<String> {
    body.and_then(|b| b.into_inner().comment)
}

#[utoipa::path(
    post,
    path = "/api/payroll/periods",
    request_body = CreatePeriod,
    responses(
        (status = 201, description = "Period created", body = PeriodResponse),
        (status = 200, description = "Period already existed", body = PeriodResponse),
        (status = 400, description = "Invalid period key"),
        (status = 403)
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn create_period(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    payload: web::Json<CreatePeriod>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let key: PeriodKey = payload.period_key.parse()?;
    let (period, created) =
        create_or_reuse_period(store.get_ref(), key, PeriodSourceType::Manual, Some(auth.user_id))
            .await?;

    let mut resp = if created {
        HttpResponse::Created()
    } else {
        HttpResponse::Ok()
    };
    Ok(resp.json(PeriodResponse { period, created }))
}

#[utoipa::path(
    get,
    path = "/api/payroll/periods",
    responses(
        (status = 200, body = [PayrollPeriod])
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn list_periods(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let periods = store.list_periods().await?;
    Ok(HttpResponse::Ok().json(periods))
}

#[utoipa::path(
    get,
    path = "/api/payroll/periods/{period_id}",
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, body = PeriodDetail),
        (status = 404)
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn get_period(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period_id = path.into_inner();
    let store = store.get_ref();
    let period = load_period(store, period_id).await?;

    Ok(HttpResponse::Ok().json(PeriodDetail {
        period,
        inputs: store.list_input_values(period_id).await?,
        expenses: store.list_expense_entries(period_id).await?,
        computed: store.list_computed_values(period_id).await?,
        receipts: store.list_receipts(period_id).await?,
        events: store.list_approval_events(period_id).await?,
    }))
}

#[utoipa::path(
    post,
    path = "/api/payroll/periods/{period_id}/recalculate",
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, body = RecalculationResult),
        (status = 404),
        (status = 409, description = "Period is locked")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn recalculate_period(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let settings = CalculationSettings::from_config(&config);
    let result = recalculate_payroll_period(store.get_ref(), path.into_inner(), &settings).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[utoipa::path(
    put,
    path = "/api/payroll/periods/{period_id}/approve",
    request_body(content = TransitionComment, description = "Optional approval comment"),
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, body = PayrollPeriod),
        (status = 409, description = "Period is not calculated or has unresolved names")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn approve(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
    body: Option<web::Json<TransitionComment>>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period =
        approve_period(store.get_ref(), path.into_inner(), auth.user_id, comment(body)).await?;
    Ok(HttpResponse::Ok().json(period))
}

#[utoipa::path(
    put,
    path = "/api/payroll/periods/{period_id}/send",
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, description = "Receipts staged for e-signature", body = PayrollPeriod),
        (status = 409, description = "Period is not approved")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn send(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period = send_period(store.get_ref(), path.into_inner(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(period))
}

#[utoipa::path(
    put,
    path = "/api/payroll/periods/{period_id}/sent",
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, description = "Envelope delivery confirmed", body = PayrollPeriod),
        (status = 409, description = "Period is not being sent")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn mark_sent(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period = mark_period_sent(store.get_ref(), path.into_inner(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(period))
}

#[utoipa::path(
    put,
    path = "/api/payroll/periods/{period_id}/lock",
    request_body(content = TransitionComment, description = "Optional lock comment"),
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, body = PayrollPeriod),
        (status = 409, description = "Period is not approved or sent")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn lock(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
    body: Option<web::Json<TransitionComment>>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period = lock_period(store.get_ref(), path.into_inner(), auth.user_id, comment(body)).await?;
    Ok(HttpResponse::Ok().json(period))
}

#[utoipa::path(
    put,
    path = "/api/payroll/periods/{period_id}/inputs",
    request_body = InputEdit,
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 200, description = "Input saved, period back to DRAFT", body = PayrollPeriod),
        (status = 400, description = "Amount is not numeric"),
        (status = 409, description = "Period inputs are frozen")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn update_input(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
    body: web::Json<InputEdit>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period =
        update_input_value(store.get_ref(), path.into_inner(), auth.user_id, body.into_inner())
            .await?;
    Ok(HttpResponse::Ok().json(period))
}

#[utoipa::path(
    post,
    path = "/api/payroll/periods/{period_id}/expenses",
    request_body = ExpenseEdit,
    params(
        ("period_id", description = "Payroll period ID")
    ),
    responses(
        (status = 201, description = "Expense added, period back to DRAFT", body = PayrollPeriod),
        (status = 400),
        (status = 409, description = "Period inputs are frozen")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn add_expense(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    path: web::Path<u64>,
    body: web::Json<ExpenseEdit>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let period =
        add_expense_entry(store.get_ref(), path.into_inner(), auth.user_id, body.into_inner())
            .await?;
    Ok(HttpResponse::Created().json(period))
}

#[utoipa::path(
    post,
    path = "/api/payroll/backfill",
    params(BackfillQuery),
    request_body(content = String, description = "Workbook export", content_type = "application/json"),
    responses(
        (status = 200, description = "Backfill summary, including blocked months", body = PayrollBackfillSummary),
        (status = 400, description = "Workbook could not be parsed"),
        (status = 500, description = "Import batch failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn backfill(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    config: web::Data<Config>,
    query: web::Query<BackfillQuery>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let query = query.into_inner();
    let options = BackfillOptions {
        file_name: query.file_name,
        actor_id: auth.user_id,
        months: query.months.unwrap_or(config.backfill_default_months),
        tolerance: query.tolerance,
        lock_approved: query.lock_approved,
        use_employee_roster_names: query.use_employee_roster_names,
        overwrite_locked: query.overwrite_locked,
        persist_import_rows: query.persist_import_rows,
    };
    let settings = CalculationSettings::from_config(&config);

    let summary = run_payroll_backfill(
        store.get_ref(),
        &JsonWorkbookParser,
        &body,
        options,
        &settings,
        config.bulk_chunk_size,
    )
    .await?;

    Ok(HttpResponse::Ok().json(summary))
}

#[utoipa::path(
    get,
    path = "/api/payroll/identities",
    responses(
        (status = 200, body = [PayrollIdentityMapping])
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn list_identities(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let mappings = store.list_identity_mappings().await?;
    Ok(HttpResponse::Ok().json(mappings))
}

#[utoipa::path(
    put,
    path = "/api/payroll/identities/resolve",
    request_body = ResolveIdentity,
    responses(
        (status = 200, body = PayrollIdentityMapping),
        (status = 400, description = "User is not an active employee")
    ),
    security(("bearer_auth" = [])),
    tag = "Payroll"
)]
pub async fn resolve_identity(
    auth: AuthUser,
    store: web::Data<dyn PayrollStore>,
    body: web::Json<ResolveIdentity>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let body = body.into_inner();
    let mapping =
        resolve_identity_manually(store.get_ref(), &body.payroll_name, body.user_id, body.notes)
            .await?;
    Ok(HttpResponse::Ok().json(mapping))
}
