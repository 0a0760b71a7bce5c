// src/prescription_handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::str::FromStr;
use std::sync::Arc;
use crate::AppState;
use crate::audit::audit;
use crate::auth::{require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{CreatePrescriptionRequest, PrescriptionQuery, PrescriptionStatus};
use crate::prescription_tracker::{self, PrescriptionFilter};

pub async fn get_prescriptions(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PrescriptionQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_prescriptions)?;
    let (page, per_page, offset) = PaginationQuery::new(query.page, query.per_page).normalize();

    let status = query
        .status
        .as_deref()
        .map(PrescriptionStatus::from_str)
        .transpose()
        .map_err(|_| ApiError::bad_request("Invalid status. Must be one of: en_attente, partielle, complete"))?;

    let filter = PrescriptionFilter {
        status,
        patient_id: query.patient_id,
    };
    let (prescriptions, total) =
        prescription_tracker::list_prescriptions(&app_state.db_pool, &filter, per_page, offset).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(prescriptions, total, page, per_page))))
}

pub async fn get_prescription(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_prescriptions)?;
    let detail = prescription_tracker::get_prescription(&app_state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(detail)))
}

pub async fn create_prescription(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreatePrescriptionRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_prescribe)?;
    let pool = &app_state.db_pool;

    let detail = prescription_tracker::create_prescription(pool, &body, &actor).await?;

    audit(
        pool,
        actor.user_id,
        "create",
        "prescription",
        detail.prescription.id,
        &format!(
            "Prescription for patient {} with {} line(s)",
            detail.prescription.patient_id,
            detail.lines.len()
        ),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        detail,
        "Prescription created successfully".to_string(),
    )))
}
