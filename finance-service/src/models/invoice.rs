//! Invoice model for finance-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Partial,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "issued" => InvoiceStatus::Issued,
            "paid" => InvoiceStatus::Paid,
            "partial" => InvoiceStatus::Partial,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// Recompute an invoice status from its amounts.
///
/// `paid` and `partial` are the only statuses ever auto-assigned; anything
/// explicitly set (draft, issued, cancelled) is left alone when no payment
/// has been applied. Zero-total invoices are never marked paid.
pub fn derive_invoice_status(
    paid_amount: Decimal,
    total_amount: Decimal,
    current: InvoiceStatus,
) -> InvoiceStatus {
    if total_amount > Decimal::ZERO && paid_amount >= total_amount {
        InvoiceStatus::Paid
    } else if paid_amount > Decimal::ZERO {
        InvoiceStatus::Partial
    } else {
        current
    }
}

/// Fee invoice issued to a student for an academic year.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub institution_id: Uuid,
    pub invoice_number: String,
    pub student_id: Uuid,
    pub academic_year_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// Remaining balance, clamped at zero.
    pub fn balance(&self) -> Decimal {
        (self.total_amount - self.paid_amount).max(Decimal::ZERO)
    }

    /// Unpaid and past its due date.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        let status = InvoiceStatus::from_string(&self.status);
        !matches!(status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
            && self.due_date < today
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub institution_id: Uuid,
    pub student_id: Uuid,
    pub academic_year_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub student_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
