//! Closed enumerations shared by input rows, expense lines, computed metrics and the
//! bucket classification the calculation engine aggregates with.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKey {
    BasicSalary,
    HouseRentAllowance,
    MedicalAllowance,
    ConveyanceAllowance,
    Overtime,
    Bonus,
    Commission,
    Arrears,
    TravelReimbursement,
    OtherReimbursement,
    IncomeTax,
    ProvidentFund,
    LoanRepayment,
    AdvanceRecovery,
    UnpaidLeaveDeduction,
    OtherDeduction,
    /// Signed correction applied directly to net salary.
    Adjustment,
    Paid,
    PreviousBalance,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    Reimbursement,
    Advance,
    Loan,
    Penalty,
    CompanyExpense,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKey {
    TotalEarnings,
    TotalReimbursements,
    TotalDeductions,
    DerivedIncomeTax,
    NetSalary,
    PaidAmount,
    PreviousBalance,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Earning,
    Reimbursement,
    Deduction,
    Adjustment,
    Paid,
    PreviousBalance,
}

impl ComponentKey {
    pub fn bucket(self) -> Bucket {
        use ComponentKey::*;
        match self {
            BasicSalary | HouseRentAllowance | MedicalAllowance | ConveyanceAllowance
            | Overtime | Bonus | Commission | Arrears => Bucket::Earning,
            TravelReimbursement | OtherReimbursement => Bucket::Reimbursement,
            IncomeTax | ProvidentFund | LoanRepayment | AdvanceRecovery
            | UnpaidLeaveDeduction | OtherDeduction => Bucket::Deduction,
            Adjustment => Bucket::Adjustment,
            Paid => Bucket::Paid,
            PreviousBalance => Bucket::PreviousBalance,
        }
    }
}

impl ExpenseCategory {
    /// `None` means the line is a company-level expense and does not touch anyone's pay.
    pub fn bucket(self) -> Option<Bucket> {
        match self {
            ExpenseCategory::Reimbursement => Some(Bucket::Reimbursement),
            ExpenseCategory::Advance | ExpenseCategory::Loan | ExpenseCategory::Penalty => {
                Some(Bucket::Deduction)
            }
            ExpenseCategory::CompanyExpense => None,
        }
    }
}
