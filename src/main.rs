// src/main.rs - Hospital pharmacy service: stock ledger, prescriptions and dispensations
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use actix_web::http::header;
use actix_cors::Cors;
use anyhow::Context;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Module declarations
mod audit;
mod auth;
mod config;
mod db;
mod dispensation;
mod dispensation_handlers;
mod error;
mod export;
mod handlers;
mod medication_handlers;
mod models;
mod monitoring;
mod prescription_handlers;
mod prescription_tracker;
mod stock_ledger;
pub mod validator;
#[cfg(test)]
mod test_support;

use auth::{jwt_middleware, AuthService};
use config::{load_config, Config};
use monitoring::{start_maintenance_tasks, Metrics, RequestLogger};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

// ==================== ROUTES ====================

/// Authenticated pharmacy API, mounted under `/api/v1`.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .wrap(HttpAuthentication::bearer(jwt_middleware))
            .route("/dashboard/stats", web::get().to(handlers::get_dashboard_stats))
            .service(
                web::scope("/medications")
                    .route("", web::get().to(medication_handlers::get_medications))
                    .route("", web::post().to(medication_handlers::create_medication))
                    // Static segments before `{id}`
                    .route("/alerts", web::get().to(medication_handlers::get_stock_alerts))
                    .route("/expiring", web::get().to(medication_handlers::get_expiring_medications))
                    .route("/export", web::get().to(export::export_medications))
                    .route("/{id}", web::get().to(medication_handlers::get_medication))
                    .route("/{id}", web::put().to(medication_handlers::update_medication))
                    .route("/{id}", web::delete().to(medication_handlers::deactivate_medication))
                    .route("/{id}/stock", web::post().to(medication_handlers::adjust_medication_stock))
                    .route("/{id}/movements", web::get().to(medication_handlers::get_medication_movements))
                    .route("/{id}/movements/export", web::get().to(export::export_movements))
            )
            .route("/stock/verify", web::get().to(medication_handlers::verify_stock_ledger))
            .service(
                web::scope("/prescriptions")
                    .route("", web::get().to(prescription_handlers::get_prescriptions))
                    .route("", web::post().to(prescription_handlers::create_prescription))
                    .route("/{id}", web::get().to(prescription_handlers::get_prescription))
                    .route("/{id}/dispensations", web::post().to(dispensation_handlers::dispense_prescription))
                    .route("/{id}/dispensations", web::get().to(dispensation_handlers::get_prescription_dispensations))
            )
            .service(
                web::scope("/dispensations")
                    .route("", web::get().to(dispensation_handlers::get_dispensations))
                    .route("/{id}", web::get().to(dispensation_handlers::get_dispensation))
            ),
    );
}

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/health")
            .route("", web::get().to(monitoring::health_check))
            .route("/ready", web::get().to(monitoring::readiness_check))
            .route("/metrics", web::get().to(monitoring::metrics_endpoint)),
    );
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let mut config = load_config()?;

    setup_logging(&config)?;

    if config.is_production() {
        validate_production_config(&config)?;
    } else if config.uses_default_jwt_secret() {
        log::warn!("No JWT secret configured, using a random secret for this run");
        config.auth.jwt_secret = config::generate_jwt_secret();
    }

    config.print_startup_info();

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
    ));

    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        config: config.clone(),
    });

    start_maintenance_tasks(pool.clone(), config.pharmacy.clone()).await;

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics_arc = Arc::new(Metrics::new());
    let server_config = config.clone();

    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&server_config.security.allowed_origins, server_config.is_production());
        let security_headers = setup_security_headers(&server_config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(metrics_arc.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics_arc.clone()))
            .app_data(web::JsonConfig::default().limit(server_config.security.max_request_size))
            .configure(configure_health)
            .configure(configure_api)
    })
        .keep_alive(Duration::from_secs(config.server.keep_alive))
        .client_request_timeout(Duration::from_secs(config.server.client_timeout))
        .client_disconnect_timeout(Duration::from_secs(config.server.client_shutdown));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_cors(allowed_origins: &[String], is_production: bool) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") && !is_production {
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin();
    } else {
        for origin in allowed_origins.iter().filter(|o| !o.is_empty() && *o != "*") {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install logger")?;

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret == config::AuthConfig::default().jwt_secret {
        anyhow::bail!("JWT_SECRET must be set in production");
    }

    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)
        .with_context(|| format!("Invalid database URL: {}", db_config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(db_config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.connect_timeout))
        .idle_timeout(Duration::from_secs(db_config.idle_timeout))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains"
        ));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::{json, Value};
    use crate::auth::UserRole;
    use crate::test_support::{seed_medication, seed_prescription, test_pool, DOCTOR_ID, PHARMACIST_ID};

    const SECRET: &str = "integration_secret_with_enough_length_42";

    fn token(user_id: i64, role: UserRole) -> String {
        let service = AuthService::new(SECRET, 1);
        let token = service.generate_token(user_id, "test", role).unwrap();
        format!("Bearer {}", token)
    }

    macro_rules! app {
        ($pool:expr) => {{
            let state = Arc::new(AppState { db_pool: $pool.clone(), config: Config::default() });
            test::init_service(
                App::new()
                    .app_data(web::Data::new(state))
                    .app_data(web::Data::new(Arc::new(AuthService::new(SECRET, 1))))
                    .app_data(web::Data::new(Arc::new(Metrics::new())))
                    .configure(configure_health)
                    .configure(configure_api),
            )
            .await
        }};
    }

    #[actix_rt::test]
    async fn test_dispense_over_http() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 15, 5, 2.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 20)]).await;
        let app = app!(pool);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/prescriptions/{}/dispensations", p1))
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .set_json(json!({ "lines": [{ "medicationId": m1, "quantiteDispensee": 20, "numeroLot": "L1" }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["montantTotal"], 30.0);
        assert_eq!(body["data"]["prescriptionId"], p1);
        assert_eq!(body["data"]["lines"][0]["medicamentId"], m1);
        assert_eq!(body["data"]["lines"][0]["quantitePrescrite"], 20);
        assert_eq!(body["data"]["lines"][0]["quantiteDispensee"], 15);
        assert_eq!(body["data"]["lines"][0]["numeroLot"], "L1");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/prescriptions/{}", p1))
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "partielle");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/medications/{}", m1))
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["quantity"], 0);
        assert_eq!(body["data"]["stock_status"], "rupture");
    }

    #[actix_rt::test]
    async fn test_error_statuses_over_http() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 15, 5, 2.0).await;
        let m2 = seed_medication(&pool, "Paracetamol", 15, 5, 0.5).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 20)]).await;
        let app = app!(pool);
        let uri = format!("/api/v1/prescriptions/{}/dispensations", p1);

        let unauthenticated = test::TestRequest::post()
            .uri(&uri)
            .set_json(json!({ "lines": [{ "medicationId": m1, "quantiteDispensee": 1 }] }))
            .to_request();
        assert_eq!(test::call_service(&app, unauthenticated).await.status(), StatusCode::UNAUTHORIZED);

        let doctor = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("Authorization", token(DOCTOR_ID, UserRole::Doctor)))
            .set_json(json!({ "lines": [{ "medicationId": m1, "quantiteDispensee": 1 }] }))
            .to_request();
        assert_eq!(test::call_service(&app, doctor).await.status(), StatusCode::FORBIDDEN);

        let not_prescribed = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .set_json(json!({ "lines": [{ "medicationId": m2, "quantiteDispensee": 1 }] }))
            .to_request();
        assert_eq!(test::call_service(&app, not_prescribed).await.status(), StatusCode::BAD_REQUEST);

        let invalid = test::TestRequest::post()
            .uri(&uri)
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .set_json(json!({ "lines": [{ "medicationId": m1, "quantiteDispensee": 0 }] }))
            .to_request();
        assert_eq!(test::call_service(&app, invalid).await.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing = test::TestRequest::post()
            .uri("/api/v1/prescriptions/999/dispensations")
            .insert_header(("Authorization", token(PHARMACIST_ID, UserRole::Pharmacist)))
            .set_json(json!({ "lines": [{ "medicationId": m1, "quantiteDispensee": 1 }] }))
            .to_request();
        assert_eq!(test::call_service(&app, missing).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_medication_lifecycle_over_http() {
        let pool = test_pool().await;
        let app = app!(pool);
        let auth = token(PHARMACIST_ID, UserRole::Pharmacist);

        let req = test::TestRequest::post()
            .uri("/api/v1/medications")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({
                "name": "Ibuprofene", "dosage": "400mg", "form": "comprime",
                "price": 0.3, "initial_quantity": 50, "alert_threshold": 10
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        let id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["quantity"], 50);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/medications/{}/stock", id))
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "delta": -45, "kind": "perte", "reason": "Rupture chaine du froid" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["quantity"], 5);
        assert_eq!(body["data"]["stock_status"], "alerte");

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/medications/{}/stock", id))
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "delta": -6, "kind": "sortie", "reason": "Service" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/medications/{}/stock", id))
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "delta": i64::MIN, "kind": "ajustement", "reason": "Inventaire" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::get()
            .uri("/api/v1/medications/alerts")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/stock/verify")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"], json!([]));

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/medications/{}/movements", id))
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["data"][0]["kind"], "perte");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/medications/{}/movements?page={}", id, i64::MAX))
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["data"], json!([]));

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/medications/{}", id))
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let audited: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE entity_type = 'medication'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(audited, 3);
    }

    #[actix_rt::test]
    async fn test_health_is_public() {
        let pool = test_pool().await;
        let app = app!(pool);

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/health/ready").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
