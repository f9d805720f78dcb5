//! Payment handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{ListPaymentsQuery, RecordPaymentRequest, UpdatePaymentStatusRequest},
    middleware::InstitutionContext,
    models::{CreatePayment, ListPaymentsFilter, Payment, PaymentStatus},
    startup::AppState,
};

pub async fn record_payment(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    payload.validate()?;

    let input = CreatePayment {
        institution_id: institution.institution_id,
        student_id: payload.student_id,
        invoice_id: payload.invoice_id,
        payment_mode: payload.payment_mode,
        payment_date: payload
            .payment_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive()),
        reference_number: payload.reference_number.unwrap_or_default(),
        amount: payload.amount,
        amount_paid: payload.amount_paid,
        status: payload.status.unwrap_or(PaymentStatus::Pending),
        remarks: payload.remarks.unwrap_or_default(),
    };

    tracing::info!(
        institution_id = %institution.institution_id,
        invoice_id = ?input.invoice_id,
        amount_paid = %input.amount_paid,
        "Recording payment"
    );

    let payment = state.db.record_payment(&input).await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .db
        .get_payment(institution.institution_id, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(payment))
}

pub async fn list_payments(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let filter = ListPaymentsFilter {
        invoice_id: query.invoice_id,
        student_id: query.student_id,
        status: query.status,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let payments = state
        .db
        .list_payments(institution.institution_id, &filter)
        .await?;

    Ok(Json(payments))
}

pub async fn update_payment_status(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<Payment>, AppError> {
    tracing::info!(
        institution_id = %institution.institution_id,
        payment_id = %payment_id,
        new_status = %payload.status.as_str(),
        "Updating payment status"
    );

    let payment = state
        .db
        .update_payment_status(institution.institution_id, payment_id, payload.status)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(payment))
}
