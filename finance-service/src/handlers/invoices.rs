//! Invoice handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateInvoiceRequest, ListInvoicesQuery},
    middleware::InstitutionContext,
    models::{CreateInvoice, Invoice, InvoiceStatus, ListInvoicesFilter},
    startup::AppState,
};

pub async fn create_invoice(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>), AppError> {
    payload.validate()?;

    let input = CreateInvoice {
        institution_id: institution.institution_id,
        student_id: payload.student_id,
        academic_year_id: payload.academic_year_id,
        issue_date: payload.issue_date,
        due_date: payload.due_date,
        total_amount: payload.total_amount,
        status: payload.status.unwrap_or(InvoiceStatus::Issued),
    };

    tracing::info!(
        institution_id = %institution.institution_id,
        student_id = %input.student_id,
        total_amount = %input.total_amount,
        "Creating invoice"
    );

    let invoice = state.db.create_invoice(&input).await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    let invoice = state
        .db
        .get_invoice(institution.institution_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(invoice))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    let filter = ListInvoicesFilter {
        status: query.status,
        student_id: query.student_id,
        start_date: query.start_date,
        end_date: query.end_date,
        page_size: query.page_size.unwrap_or(50),
        page_token: query.page_token,
    };

    let invoices = state
        .db
        .list_invoices(institution.institution_id, &filter)
        .await?;

    Ok(Json(invoices))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    tracing::info!(
        institution_id = %institution.institution_id,
        invoice_id = %invoice_id,
        "Cancelling invoice"
    );

    let invoice = state
        .db
        .cancel_invoice(institution.institution_id, invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(invoice))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .db
        .delete_invoice(institution.institution_id, invoice_id)
        .await?;

    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
    }

    Ok(StatusCode::NO_CONTENT)
}
