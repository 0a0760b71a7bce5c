// src/dispensation_handlers.rs
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use crate::AppState;
use crate::audit::audit;
use crate::auth::{require_permission, UserRole};
use crate::dispensation::{self, DispensationFilter};
use crate::error::ApiResult;
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::{DispensationQuery, DispensationRequest};

/// Records a dispensation against a prescription.
///
/// Lines are capped to what remains and what is in stock, so the returned
/// quantities may be lower than requested.
pub async fn dispense_prescription(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    body: web::Json<DispensationRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_dispense)?;
    let prescription_id = path.into_inner();
    let pool = &app_state.db_pool;

    let detail = dispensation::record_dispensation(
        pool,
        prescription_id,
        &actor,
        &body,
        app_state.config.pharmacy.conflict_retries,
    ).await?;

    let requested: i64 = body.lines.iter().map(|l| l.requested_quantity).sum();
    let dispensed: i64 = detail.lines.iter().map(|l| l.dispensed_quantity).sum();

    audit(
        pool,
        actor.user_id,
        "dispense",
        "prescription",
        prescription_id,
        &format!(
            "Dispensation {}: {} of {} unit(s) requested, total {:.2}",
            detail.dispensation.id, dispensed, requested, detail.dispensation.total_amount
        ),
        &http_request,
    ).await;

    let message = if dispensed < requested {
        format!("Partially dispensed: {} of {} unit(s)", dispensed, requested)
    } else {
        "Dispensation recorded successfully".to_string()
    };

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(detail, message)))
}

pub async fn get_prescription_dispensations(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_prescriptions)?;
    let history = dispensation::dispensations_for_prescription(&app_state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(history)))
}

pub async fn get_dispensations(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<DispensationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_prescriptions)?;
    let (page, per_page, offset) = PaginationQuery::new(query.page, query.per_page).normalize();

    let filter = DispensationFilter {
        prescription_id: query.prescription_id,
        pharmacist_id: query.pharmacist_id,
    };
    let (dispensations, total) =
        dispensation::list_dispensations(&app_state.db_pool, &filter, per_page, offset).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(dispensations, total, page, per_page))))
}

pub async fn get_dispensation(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_prescriptions)?;
    let detail = dispensation::get_dispensation(&app_state.db_pool, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(detail)))
}
