// src/monitoring.rs
use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use std::time::Instant;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, Duration};
use crate::audit::purge_older_than;
use crate::config::PharmacyConfig;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub response_times: Arc<std::sync::Mutex<Vec<u64>>>,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            response_times: Arc::new(std::sync::Mutex::new(Vec::new())),
            started_at: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > 1000 {
                times.remove(0);
            }
        }
    }

    pub fn average_response_time(&self) -> f64 {
        match self.response_times.lock() {
            Ok(times) if !times.is_empty() => times.iter().sum::<u64>() as f64 / times.len() as f64,
            _ => 0.0,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
    pub database_connections: u32,
    pub idle_connections: usize,
}

pub async fn health_check(metrics: web::Data<Arc<Metrics>>) -> HttpResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: metrics.uptime_seconds(),
    };

    HttpResponse::Ok().json(response)
}

pub async fn readiness_check(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(&app_state.db_pool).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        })),
        Err(e) => {
            log::warn!("Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "not ready",
                "database": "disconnected"
            }))
        }
    }
}

pub async fn metrics_endpoint(
    metrics: web::Data<Arc<Metrics>>,
    app_state: web::Data<Arc<AppState>>,
) -> HttpResponse {
    let response = MetricsResponse {
        requests_total: metrics.request_count.load(Ordering::Relaxed),
        errors_total: metrics.error_count.load(Ordering::Relaxed),
        avg_response_time_ms: metrics.average_response_time(),
        database_connections: app_state.db_pool.size(),
        idle_connections: app_state.db_pool.num_idle(),
    };

    HttpResponse::Ok().json(response)
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let metrics = self.metrics.clone();
        let path = req.path().to_string();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            let elapsed = start_time.elapsed().as_millis() as u64;
            metrics.record_response_time(elapsed);

            match res {
                Ok(ref response) if response.status().is_server_error() => {
                    metrics.increment_errors();
                    log::error!("{} -> {} in {}ms", path, response.status(), elapsed);
                }
                Ok(ref response) if response.status().is_client_error() => {
                    metrics.increment_errors();
                }
                Err(_) => metrics.increment_errors(),
                _ => {}
            }
            res
        })
    }
}

// ==================== STOCK ALERT SCAN ====================

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct StockAlertSummary {
    pub alert: Vec<String>,
    pub out_of_stock: Vec<String>,
    pub expired: Vec<String>,
    pub expiring: Vec<String>,
}

/// Read-only scan of active medications needing attention.
pub async fn scan_stock_alerts(pool: &SqlitePool, expiry_warning_days: i64) -> Result<StockAlertSummary, sqlx::Error> {
    let now = Utc::now();
    let horizon = now + ChronoDuration::days(expiry_warning_days);

    let rows: Vec<(String, i64, i64, Option<DateTime<Utc>>)> = sqlx::query_as(
        r#"SELECT name, quantity, alert_threshold, expiration_date
           FROM medications
           WHERE is_active = 1
             AND (quantity <= alert_threshold OR (expiration_date IS NOT NULL AND expiration_date <= ?))
           ORDER BY name"#
    )
        .bind(horizon)
        .fetch_all(pool)
        .await?;

    let mut summary = StockAlertSummary::default();
    for (name, quantity, threshold, expiration_date) in rows {
        if quantity == 0 {
            summary.out_of_stock.push(name.clone());
        } else if quantity <= threshold {
            summary.alert.push(name.clone());
        }
        match expiration_date {
            Some(date) if date < now => summary.expired.push(name),
            Some(date) if date <= horizon => summary.expiring.push(name),
            _ => {}
        }
    }

    Ok(summary)
}

pub async fn start_maintenance_tasks(pool: SqlitePool, config: PharmacyConfig) {
    let audit_pool = pool.clone();
    let retention_days = config.audit_retention_days;

    tokio::spawn(async move {
        cleanup_old_audit_logs(audit_pool, retention_days).await;
    });

    tokio::spawn(async move {
        report_stock_alerts(pool, config).await;
    });
}

async fn cleanup_old_audit_logs(pool: SqlitePool, retention_days: i64) {
    let mut interval = interval(Duration::from_secs(24 * 3600));

    loop {
        interval.tick().await;
        match purge_older_than(&pool, retention_days).await {
            Ok(0) => {}
            Ok(count) => log::info!("Cleaned up {} audit log entries older than {} days", count, retention_days),
            Err(e) => log::error!("Failed to clean up audit logs: {}", e),
        }
    }
}

async fn report_stock_alerts(pool: SqlitePool, config: PharmacyConfig) {
    let minutes = config.alert_scan_interval_minutes.max(1);
    let mut interval = interval(Duration::from_secs(minutes * 60));

    loop {
        interval.tick().await;
        match scan_stock_alerts(&pool, config.expiry_warning_days).await {
            Ok(summary) => {
                if !summary.out_of_stock.is_empty() {
                    log::warn!("Out of stock: {}", summary.out_of_stock.join(", "));
                }
                if !summary.alert.is_empty() {
                    log::warn!("Below alert threshold: {}", summary.alert.join(", "));
                }
                if !summary.expired.is_empty() {
                    log::warn!("Expired medications still active: {}", summary.expired.join(", "));
                }
                if !summary.expiring.is_empty() {
                    log::info!(
                        "Expiring within {} days: {}",
                        config.expiry_warning_days,
                        summary.expiring.join(", ")
                    );
                }
            }
            Err(e) => log::error!("Stock alert scan failed: {}", e),
        }
    }
}
