// src/export.rs - CSV exports of stock and ledger data
use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use crate::AppState;
use crate::auth::{require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::models::{Medication, StockMovement};
use crate::stock_ledger::get_active_medication;

fn csv_error(e: csv::Error) -> ApiError {
    ApiError::InternalServerError(format!("CSV export failed: {}", e))
}

fn csv_response(data: Vec<u8>, filename: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
        .body(data)
}

pub fn medications_csv(medications: &[Medication]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "id", "name", "dosage", "form", "price", "quantity", "alert_threshold",
        "stock_status", "expiration_date",
    ])?;

    for med in medications {
        writer.write_record([
            med.id.to_string(),
            med.name.clone(),
            med.dosage.clone(),
            med.form.clone(),
            format!("{:.2}", med.price),
            med.quantity.to_string(),
            med.alert_threshold.to_string(),
            med.stock_status().to_string(),
            med.expiration_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

pub fn movements_csv(movements: &[StockMovement]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record([
        "id", "created_at", "kind", "delta", "quantity_after", "reason", "actor_id", "dispensation_id",
    ])?;

    for movement in movements {
        writer.write_record([
            movement.id.to_string(),
            movement.created_at.to_rfc3339(),
            movement.kind.to_string(),
            movement.delta.to_string(),
            movement.quantity_after.to_string(),
            movement.reason.clone(),
            movement.actor_id.to_string(),
            movement.dispensation_id.map(|id| id.to_string()).unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

pub async fn export_medications(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_export_data)?;

    let medications: Vec<Medication> = sqlx::query_as(
        "SELECT * FROM medications WHERE is_active = 1 ORDER BY name, dosage"
    )
        .fetch_all(&app_state.db_pool)
        .await?;

    let data = medications_csv(&medications).map_err(csv_error)?;
    Ok(csv_response(data, "medications.csv"))
}

pub async fn export_movements(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_export_data)?;
    let medication_id = path.into_inner();

    let medication = get_active_medication(&app_state.db_pool, medication_id).await?;

    let movements: Vec<StockMovement> = sqlx::query_as(
        "SELECT * FROM stock_movements WHERE medication_id = ? ORDER BY created_at, id"
    )
        .bind(medication_id)
        .fetch_all(&app_state.db_pool)
        .await?;

    let data = movements_csv(&movements).map_err(csv_error)?;
    Ok(csv_response(data, &format!("movements_{}.csv", medication.id)))
}
