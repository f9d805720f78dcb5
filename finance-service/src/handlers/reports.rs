//! Payment summary reports.

use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{middleware::InstitutionContext, services::PaymentTotals, startup::AppState};

pub async fn student_totals(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(student_id): Path<Uuid>,
) -> Result<Json<PaymentTotals>, AppError> {
    let totals = state
        .db
        .student_totals(institution.institution_id, student_id)
        .await?;

    Ok(Json(totals))
}

pub async fn institution_totals(
    State(state): State<AppState>,
    institution: InstitutionContext,
) -> Result<Json<PaymentTotals>, AppError> {
    let totals = state
        .db
        .institution_totals(institution.institution_id)
        .await?;

    Ok(Json(totals))
}
