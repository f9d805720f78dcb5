//! Request payloads and query parameters for the HTTP surface.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{InvoiceStatus, PaymentMode, PaymentStatus};

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        return Err(ValidationError::new("amount_negative"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFeeStructureRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub academic_year_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub class_name: String,
    #[validate(custom(function = "validate_non_negative"))]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFeeStructureRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_non_negative"))]
    pub amount: Option<Decimal>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_invoice_request"))]
pub struct CreateInvoiceRequest {
    pub student_id: Uuid,
    pub academic_year_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[validate(custom(function = "validate_non_negative"))]
    pub total_amount: Decimal,
    /// Only draft and issued are accepted at creation.
    pub status: Option<InvoiceStatus>,
}

fn validate_invoice_request(req: &CreateInvoiceRequest) -> Result<(), ValidationError> {
    if req.due_date < req.issue_date {
        return Err(ValidationError::new("due_date_before_issue_date"));
    }
    if matches!(
        req.status,
        Some(InvoiceStatus::Paid) | Some(InvoiceStatus::Partial) | Some(InvoiceStatus::Cancelled)
    ) {
        return Err(ValidationError::new("invalid_initial_status"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
    pub student_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_payment_request"))]
pub struct RecordPaymentRequest {
    pub student_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub payment_mode: PaymentMode,
    /// Defaults to today when omitted.
    pub payment_date: Option<NaiveDate>,
    #[validate(length(max = 100))]
    pub reference_number: Option<String>,
    /// Expected amount; defaults to the invoice's outstanding balance.
    #[validate(custom(function = "validate_non_negative"))]
    pub amount: Option<Decimal>,
    #[validate(custom(function = "validate_non_negative"))]
    pub amount_paid: Decimal,
    /// Defaults to pending.
    pub status: Option<PaymentStatus>,
    pub remarks: Option<String>,
}

fn validate_payment_request(req: &RecordPaymentRequest) -> Result<(), ValidationError> {
    if let Some(amount) = req.amount {
        if req.amount_paid > amount {
            return Err(ValidationError::new("amount_paid_exceeds_amount"));
        }
    }
    if req.invoice_id.is_none() && req.student_id.is_none() {
        return Err(ValidationError::new("payment_needs_student_or_invoice"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
pub struct ListPaymentsQuery {
    pub invoice_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: Option<i32>,
    pub page_token: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListFeeStructuresQuery {
    pub active_only: Option<bool>,
}
