//! Fee structure handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateFeeStructureRequest, ListFeeStructuresQuery, UpdateFeeStructureRequest},
    middleware::InstitutionContext,
    models::{CreateFeeStructure, FeeStructure, UpdateFeeStructure},
    startup::AppState,
};

pub async fn create_fee_structure(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Json(payload): Json<CreateFeeStructureRequest>,
) -> Result<(StatusCode, Json<FeeStructure>), AppError> {
    payload.validate()?;

    let input = CreateFeeStructure {
        institution_id: institution.institution_id,
        name: payload.name,
        academic_year_id: payload.academic_year_id,
        class_name: payload.class_name,
        amount: payload.amount,
    };

    let fee_structure = state.db.create_fee_structure(&input).await?;

    Ok((StatusCode::CREATED, Json(fee_structure)))
}

pub async fn get_fee_structure(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(fee_structure_id): Path<Uuid>,
) -> Result<Json<FeeStructure>, AppError> {
    let fee_structure = state
        .db
        .get_fee_structure(institution.institution_id, fee_structure_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Fee structure not found")))?;

    Ok(Json(fee_structure))
}

pub async fn list_fee_structures(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Query(query): Query<ListFeeStructuresQuery>,
) -> Result<Json<Vec<FeeStructure>>, AppError> {
    let fee_structures = state
        .db
        .list_fee_structures(
            institution.institution_id,
            query.active_only.unwrap_or(false),
        )
        .await?;

    Ok(Json(fee_structures))
}

pub async fn update_fee_structure(
    State(state): State<AppState>,
    institution: InstitutionContext,
    Path(fee_structure_id): Path<Uuid>,
    Json(payload): Json<UpdateFeeStructureRequest>,
) -> Result<Json<FeeStructure>, AppError> {
    payload.validate()?;

    let input = UpdateFeeStructure {
        name: payload.name,
        amount: payload.amount,
        active: payload.active,
    };

    let fee_structure = state
        .db
        .update_fee_structure(institution.institution_id, fee_structure_id, &input)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Fee structure not found")))?;

    Ok(Json(fee_structure))
}
