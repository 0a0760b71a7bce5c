// src/medication_handlers.rs
//! Medication catalogue and stock endpoints.

use actix_web::{web, HttpRequest, HttpResponse};
use std::str::FromStr;
use std::sync::Arc;
use chrono::{Duration, Utc};
use sqlx::{QueryBuilder, Sqlite};
use validator::Validate;
use log::{info, warn};
use crate::AppState;
use crate::audit::{audit, audit_with_changes, ChangeSet};
use crate::auth::{require_permission, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse, PaginationQuery};
use crate::models::*;
use crate::stock_ledger::{self, StockAdjustment};
use crate::validator::CustomValidate;

async fn fetch_medication(pool: &sqlx::SqlitePool, id: i64) -> ApiResult<Medication> {
    sqlx::query_as::<_, Medication>("SELECT * FROM medications WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::medication_not_found(id))
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, query: &'a MedicationQuery) -> ApiResult<()> {
    builder.push(" AND m.is_active = ").push_bind(query.active.unwrap_or(true));

    if let Some(ref search) = query.search {
        let search = search.trim();
        if !search.is_empty() {
            let pattern = format!("%{}%", search);
            builder
                .push(" AND (m.name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR m.form LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    if let Some(ref status) = query.status {
        let status = StockStatus::from_str(status).map_err(|_| {
            ApiError::bad_request(&format!(
                "Invalid stock status '{}'. Must be one of: normal, alerte, rupture",
                status
            ))
        })?;
        builder.push(" AND ").push(status.sql_condition());
    }

    Ok(())
}

pub async fn get_medications(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<MedicationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;
    let (page, per_page, offset) = PaginationQuery::new(query.page, query.per_page).normalize();

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM medications m WHERE 1=1");
    push_filters(&mut count, &query)?;
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(&app_state.db_pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new("SELECT m.* FROM medications m WHERE 1=1");
    push_filters(&mut select, &query)?;
    select
        .push(" ORDER BY m.name, m.dosage LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);

    let medications: Vec<Medication> = select
        .build_query_as()
        .fetch_all(&app_state.db_pool)
        .await?;

    let warn_days = app_state.config.pharmacy.expiry_warning_days;
    let data = medications
        .into_iter()
        .map(|m| MedicationResponse::new(m, warn_days))
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(data, total, page, per_page))))
}

pub async fn get_medication(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;
    let medication = fetch_medication(&app_state.db_pool, path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MedicationResponse::new(
        medication,
        app_state.config.pharmacy.expiry_warning_days,
    ))))
}

pub async fn create_medication(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateMedicationRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_manage_stock)?;
    body.validate()?;

    let validation = body.custom_validate();
    if !validation.is_valid() {
        return Err(validation.to_api_error());
    }
    for (field, warnings) in &validation.warnings {
        warn!("Creating medication '{}': {} {}", body.name, field, warnings.join(", "));
    }

    let pool = &app_state.db_pool;
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM medications WHERE name = ? AND dosage = ? AND form = ?"
    )
        .bind(body.name.trim())
        .bind(&body.dosage)
        .bind(&body.form)
        .fetch_one(pool)
        .await?;
    if exists > 0 {
        return Err(ApiError::medication_already_exists(body.name.trim(), &body.dosage, &body.form));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let medication_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO medications
           (name, dosage, form, price, quantity, alert_threshold, expiration_date, is_active, created_at, updated_at)
           VALUES (?, ?, ?, ?, 0, ?, ?, 1, ?, ?)
           RETURNING id"#
    )
        .bind(body.name.trim())
        .bind(&body.dosage)
        .bind(&body.form)
        .bind(body.price)
        .bind(body.alert_threshold.unwrap_or(0))
        .bind(body.expiration_date)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

    if let Some(quantity) = body.initial_quantity.filter(|q| *q > 0) {
        let entry = StockAdjustment::new(medication_id, quantity, MovementKind::Entry, "Stock initial");
        stock_ledger::adjust_stock(&mut tx, &entry, &actor).await?;
    }

    tx.commit().await?;

    let medication = fetch_medication(pool, medication_id).await?;
    info!("Created medication: {} {} ({})", medication.name, medication.dosage, medication.id);
    audit(
        pool,
        actor.user_id,
        "create",
        "medication",
        medication.id,
        &format!("Created medication {} {}", medication.name, medication.dosage),
        &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        MedicationResponse::new(medication, app_state.config.pharmacy.expiry_warning_days),
        "Medication created successfully".to_string(),
    )))
}

/// Updates catalogue fields. Quantity is not editable here; it only moves
/// through stock adjustments.
pub async fn update_medication(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    body: web::Json<UpdateMedicationRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_manage_stock)?;
    let medication_id = path.into_inner();
    body.validate()?;

    let pool = &app_state.db_pool;
    let existing = fetch_medication(pool, medication_id).await?;

    let mut changes = ChangeSet::new();
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE medications SET ");
    let mut fields = builder.separated(", ");

    if let Some(ref name) = body.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ApiError::ValidationError("name: Name cannot be blank".to_string()));
        }
        changes.add("name", &existing.name, &name);
        fields.push("name = ").push_bind_unseparated(name);
    }
    if let Some(ref dosage) = body.dosage {
        changes.add("dosage", &existing.dosage, dosage);
        fields.push("dosage = ").push_bind_unseparated(dosage.clone());
    }
    if let Some(ref form) = body.form {
        changes.add("form", &existing.form, form);
        fields.push("form = ").push_bind_unseparated(form.clone());
    }
    if let Some(price) = body.price {
        changes.add("price", &existing.price, &price);
        fields.push("price = ").push_bind_unseparated(price);
    }
    if let Some(threshold) = body.alert_threshold {
        changes.add("alert_threshold", &existing.alert_threshold, &threshold);
        fields.push("alert_threshold = ").push_bind_unseparated(threshold);
    }
    if let Some(expiration_date) = body.expiration_date {
        changes.add("expiration_date", &existing.expiration_date, &Some(expiration_date));
        fields.push("expiration_date = ").push_bind_unseparated(expiration_date);
    }

    if changes.is_empty() {
        return Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            MedicationResponse::new(existing, app_state.config.pharmacy.expiry_warning_days),
            "No changes".to_string(),
        )));
    }

    fields.push("updated_at = ").push_bind_unseparated(Utc::now());
    builder.push(" WHERE id = ").push_bind(medication_id);

    builder.build().execute(pool).await.map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            ApiError::Conflict("Another medication already has this name, dosage and form".to_string())
        }
        other => ApiError::from(other),
    })?;

    let updated = fetch_medication(pool, medication_id).await?;
    info!("Updated medication: {} ({})", updated.name, updated.id);
    audit_with_changes(
        pool,
        actor.user_id,
        "update",
        "medication",
        medication_id,
        &format!("Updated medication {}", updated.name),
        Some(&changes),
        &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MedicationResponse::new(
        updated,
        app_state.config.pharmacy.expiry_warning_days,
    ))))
}

/// Medications are never deleted; this clears `is_active`.
pub async fn deactivate_medication(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_manage_stock)?;
    let medication_id = path.into_inner();
    let pool = &app_state.db_pool;

    let result = sqlx::query("UPDATE medications SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1")
        .bind(Utc::now())
        .bind(medication_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::medication_not_found(medication_id));
    }

    info!("Deactivated medication {}", medication_id);
    audit(pool, actor.user_id, "deactivate", "medication", medication_id, "Medication deactivated", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Medication deactivated successfully".to_string(),
    )))
}

pub async fn adjust_medication_stock(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    body: web::Json<StockAdjustmentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let actor = require_permission(&http_request, UserRole::can_manage_stock)?;
    let medication_id = path.into_inner();
    body.validate()?;

    let validation = body.custom_validate();
    if !validation.is_valid() {
        return Err(validation.to_api_error());
    }

    let adjustment = StockAdjustment::new(medication_id, body.delta, body.kind, body.reason.trim());
    let pool = &app_state.db_pool;
    let quantity = stock_ledger::apply_adjustment(pool, &adjustment, &actor).await?;

    audit(
        pool,
        actor.user_id,
        "stock_adjust",
        "medication",
        medication_id,
        &format!("{} {:+} ({}) -> {}", body.kind, body.delta, adjustment.reason, quantity),
        &http_request,
    ).await;

    let medication = fetch_medication(pool, medication_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(MedicationResponse::new(
        medication,
        app_state.config.pharmacy.expiry_warning_days,
    ))))
}

pub async fn get_medication_movements(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    query: web::Query<PaginationQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;
    let medication_id = path.into_inner();
    let (page, per_page, offset) = query.normalize();

    fetch_medication(&app_state.db_pool, medication_id).await?;
    let (movements, total) =
        stock_ledger::movement_history(&app_state.db_pool, medication_id, per_page, offset).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(PaginatedResponse::new(movements, total, page, per_page))))
}

/// Active medications in `alerte` or `rupture`, emptiest first.
pub async fn get_stock_alerts(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;

    let medications: Vec<Medication> = sqlx::query_as(
        "SELECT * FROM medications WHERE is_active = 1 AND quantity <= alert_threshold ORDER BY quantity, name"
    )
        .fetch_all(&app_state.db_pool)
        .await?;

    let warn_days = app_state.config.pharmacy.expiry_warning_days;
    let data: Vec<MedicationResponse> = medications
        .into_iter()
        .map(|m| MedicationResponse::new(m, warn_days))
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

pub async fn get_expiring_medications(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ExpiringQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;
    let days = query
        .days
        .unwrap_or(app_state.config.pharmacy.expiry_warning_days)
        .clamp(0, 3650);

    let medications: Vec<Medication> = sqlx::query_as(
        r#"SELECT * FROM medications
           WHERE is_active = 1 AND expiration_date IS NOT NULL AND expiration_date <= ?
           ORDER BY expiration_date"#
    )
        .bind(Utc::now() + Duration::days(days))
        .fetch_all(&app_state.db_pool)
        .await?;

    let data: Vec<MedicationResponse> = medications
        .into_iter()
        .map(|m| MedicationResponse::new(m, days))
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

pub async fn verify_stock_ledger(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_verify_ledger)?;
    let discrepancies = stock_ledger::verify_ledger(&app_state.db_pool).await?;

    let message = if discrepancies.is_empty() {
        "Stock ledger is consistent".to_string()
    } else {
        format!("{} medication(s) out of balance", discrepancies.len())
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(discrepancies, message)))
}
