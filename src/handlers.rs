// src/handlers.rs
use actix_web::{web, HttpResponse, HttpRequest};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use chrono::{NaiveTime, Utc};
use crate::AppState;
use crate::auth::{require_permission, UserRole};
use crate::error::ApiResult;
use crate::models::{DashboardStats, PrescriptionStatus, StockStatus};

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        Self {
            data,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaginationQuery {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self { page, per_page }
    }

    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1).saturating_mul(per_page);
        (page, per_page, offset)
    }
}

// ==================== DASHBOARD STATISTICS ====================

async fn count(pool: &sqlx::SqlitePool, sql: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(sql).fetch_one(pool).await
}

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_permission(&http_request, UserRole::can_view_stock)?;
    let pool = &app_state.db_pool;

    let active_medications = count(pool, "SELECT COUNT(*) FROM medications m WHERE m.is_active = 1").await?;
    let alert_medications = count(
        pool,
        &format!("SELECT COUNT(*) FROM medications m WHERE m.is_active = 1 AND {}", StockStatus::Alert.sql_condition()),
    ).await?;
    let out_of_stock_medications = count(
        pool,
        &format!("SELECT COUNT(*) FROM medications m WHERE m.is_active = 1 AND {}", StockStatus::OutOfStock.sql_condition()),
    ).await?;

    let now = Utc::now();
    let expired_medications: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM medications WHERE is_active = 1 AND expiration_date IS NOT NULL AND expiration_date < ?"
    )
        .bind(now)
        .fetch_one(pool)
        .await?;

    let prescriptions_by_status = |status: PrescriptionStatus| {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM prescriptions WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
    };
    let pending_prescriptions = prescriptions_by_status(PrescriptionStatus::Pending).await?;
    let partial_prescriptions = prescriptions_by_status(PrescriptionStatus::Partial).await?;

    let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let (dispensations_today, dispensed_amount_today): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), CAST(COALESCE(SUM(total_amount), 0) AS REAL) FROM dispensations WHERE dispensed_at >= ?"
    )
        .bind(day_start)
        .fetch_one(pool)
        .await?;

    let stats = DashboardStats {
        active_medications,
        alert_medications,
        out_of_stock_medications,
        expired_medications,
        pending_prescriptions,
        partial_prescriptions,
        dispensations_today,
        dispensed_amount_today,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}
