//! Fee structure model for finance-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Standard fee amount for a class within an academic year.
///
/// Unique per (institution, academic year, class).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeeStructure {
    pub fee_structure_id: Uuid,
    pub institution_id: Uuid,
    pub name: String,
    pub academic_year_id: Uuid,
    pub class_name: String,
    pub amount: Decimal,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a fee structure.
#[derive(Debug, Clone)]
pub struct CreateFeeStructure {
    pub institution_id: Uuid,
    pub name: String,
    pub academic_year_id: Uuid,
    pub class_name: String,
    pub amount: Decimal,
}

/// Input for updating a fee structure.
#[derive(Debug, Clone, Default)]
pub struct UpdateFeeStructure {
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub active: Option<bool>,
}
