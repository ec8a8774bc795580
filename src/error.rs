use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::model::payroll::PeriodStatus;

pub type PayrollResult<T> = Result<T, PayrollError>;

#[derive(Debug, Error)]
pub enum PayrollError {
    /// Malformed payload, rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Legal payload that the period's current status does not allow.
    #[error("payroll period is {status}: {reason}")]
    Policy { status: PeriodStatus, reason: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("workbook could not be parsed: {0}")]
    Workbook(String),

    #[error("database transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),

    #[error("payroll summary could not be encoded: {0}")]
    Summary(#[from] serde_json::Error),
}

impl PayrollError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PayrollError::Validation(msg.into())
    }

    pub fn policy(status: PeriodStatus, reason: impl Into<String>) -> Self {
        PayrollError::Policy {
            status,
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        PayrollError::NotFound(what.into())
    }
}

impl ResponseError for PayrollError {
    fn status_code(&self) -> StatusCode {
        match self {
            PayrollError::Validation(_) | PayrollError::Workbook(_) => StatusCode::BAD_REQUEST,
            PayrollError::Policy { .. } => StatusCode::CONFLICT,
            PayrollError::NotFound(_) => StatusCode::NOT_FOUND,
            PayrollError::Transaction(_) | PayrollError::Summary(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            PayrollError::Policy { status, reason } => json!({
                "error": "Payroll period does not allow this action",
                "status": status,
                "reason": reason,
            }),
            PayrollError::Transaction(e) => {
                tracing::error!(error = %e, "Payroll database failure");
                json!({ "error": "Internal Server Error" })
            }
            PayrollError::Summary(e) => {
                tracing::error!(error = %e, "Payroll summary encoding failure");
                json!({ "error": "Internal Server Error" })
            }
            other => json!({ "error": other.to_string() }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}
