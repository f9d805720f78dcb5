//! Payment model for finance-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How the money was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Cheque,
    BankTransfer,
    Online,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Cheque => "cheque",
            PaymentMode::BankTransfer => "bank_transfer",
            PaymentMode::Online => "online",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "cheque" => PaymentMode::Cheque,
            "bank_transfer" => PaymentMode::BankTransfer,
            "online" => PaymentMode::Online,
            _ => PaymentMode::Cash,
        }
    }
}

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Failed,
    Refunded,
    Cancelled,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Completed => "completed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => PaymentStatus::PartiallyPaid,
            "paid" => PaymentStatus::Paid,
            "overdue" => PaymentStatus::Overdue,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "cancelled" => PaymentStatus::Cancelled,
            "completed" => PaymentStatus::Completed,
            _ => PaymentStatus::Pending,
        }
    }

    /// Terminal statuses freeze the payment; no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid
                | PaymentStatus::Completed
                | PaymentStatus::Refunded
                | PaymentStatus::Cancelled
        )
    }

    /// Whether a payment in this status counts toward the linked
    /// invoice's paid amount.
    pub fn counts_toward_balance(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Paid | PaymentStatus::PartiallyPaid
        )
    }

    /// Status transition guard: terminal statuses only allow a no-op
    /// write of the same status.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        !self.is_terminal() || *self == next
    }
}

/// Money received from (or refunded to) a student, optionally against
/// an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub institution_id: Uuid,
    pub payment_number: String,
    pub student_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub payment_mode: String,
    pub payment_date: NaiveDate,
    pub reference_number: String,
    pub amount: Decimal,
    pub amount_paid: Decimal,
    pub status: String,
    pub remarks: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    /// Expected amount still outstanding on this payment.
    pub fn balance(&self) -> Decimal {
        (self.amount - self.amount_paid).max(Decimal::ZERO)
    }

    pub fn is_fully_paid(&self) -> bool {
        matches!(
            PaymentStatus::from_string(&self.status),
            PaymentStatus::Paid | PaymentStatus::Completed
        )
    }
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub institution_id: Uuid,
    pub student_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub payment_mode: PaymentMode,
    pub payment_date: NaiveDate,
    pub reference_number: String,
    pub amount: Option<Decimal>,
    pub amount_paid: Decimal,
    pub status: PaymentStatus,
    pub remarks: String,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub invoice_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(PaymentStatus::Paid.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::PartiallyPaid.is_terminal());
        assert!(!PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn qualifying_statuses_count_toward_balance() {
        assert!(PaymentStatus::Completed.counts_toward_balance());
        assert!(PaymentStatus::Paid.counts_toward_balance());
        assert!(PaymentStatus::PartiallyPaid.counts_toward_balance());
        assert!(!PaymentStatus::Pending.counts_toward_balance());
        assert!(!PaymentStatus::Refunded.counts_toward_balance());
        assert!(!PaymentStatus::Cancelled.counts_toward_balance());
        assert!(!PaymentStatus::Failed.counts_toward_balance());
    }

    #[test]
    fn terminal_status_only_allows_same_status_write() {
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Completed.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::PartiallyPaid.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in [
            PaymentMode::Cash,
            PaymentMode::Cheque,
            PaymentMode::BankTransfer,
            PaymentMode::Online,
        ] {
            assert_eq!(PaymentMode::from_string(mode.as_str()), mode);
        }
    }

    #[test]
    fn payment_balance_clamps_at_zero() {
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            institution_id: Uuid::new_v4(),
            payment_number: "PAY-2025-06-0001".to_string(),
            student_id: None,
            invoice_id: None,
            payment_mode: "cash".to_string(),
            payment_date: chrono::NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
            reference_number: String::new(),
            amount: Decimal::from(100),
            amount_paid: Decimal::from(150),
            status: "completed".to_string(),
            remarks: String::new(),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        assert_eq!(payment.balance(), Decimal::ZERO);
        assert!(payment.is_fully_paid());
    }
}
