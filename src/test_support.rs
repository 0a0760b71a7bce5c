// src/test_support.rs - Shared fixtures for module tests

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::time::Duration;
use crate::auth::{Actor, UserRole};
use crate::db::run_migrations;
use crate::models::MovementKind;
use crate::stock_ledger::{apply_adjustment, StockAdjustment};

pub const STOREKEEPER_ID: i64 = 1;
pub const DOCTOR_ID: i64 = 2;
pub const PHARMACIST_ID: i64 = 3;

/// Fresh in-memory database with the full schema.
pub async fn test_pool() -> SqlitePool {
    // One connection: every connection to :memory: is a separate database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    run_migrations(&pool).await.expect("migrations");
    pool
}

/// File-backed database shared by several connections.
pub async fn file_pool(dir: &tempfile::TempDir, connections: u32) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("pharmacy.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(connections)
        .connect_with(options)
        .await
        .expect("file sqlite");

    run_migrations(&pool).await.expect("migrations");
    pool
}

pub fn pharmacist() -> Actor {
    Actor::new(PHARMACIST_ID, UserRole::Pharmacist)
}

pub fn doctor() -> Actor {
    Actor::new(DOCTOR_ID, UserRole::Doctor)
}

/// Inserts an active medication and books its opening stock as an entry.
pub async fn seed_medication(
    pool: &SqlitePool,
    name: &str,
    quantity: i64,
    alert_threshold: i64,
    price: f64,
) -> i64 {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO medications (name, dosage, form, price, quantity, alert_threshold, is_active, created_at, updated_at)
           VALUES (?, '500mg', 'comprime', ?, 0, ?, 1, ?, ?)
           RETURNING id"#
    )
        .bind(name)
        .bind(price)
        .bind(alert_threshold)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .expect("insert medication");

    if quantity > 0 {
        let storekeeper = Actor::new(STOREKEEPER_ID, UserRole::Admin);
        apply_adjustment(
            pool,
            &StockAdjustment::new(id, quantity, MovementKind::Entry, "Stock initial"),
            &storekeeper,
        )
            .await
            .expect("initial stock");
    }

    id
}

/// Inserts a pending prescription with one line per `(medication_id, quantity)`.
pub async fn seed_prescription(pool: &SqlitePool, patient_id: i64, lines: &[(i64, i64)]) -> i64 {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO prescriptions (patient_id, prescriber_id, prescribed_at, status, created_at, updated_at)
           VALUES (?, ?, ?, 'en_attente', ?, ?)
           RETURNING id"#
    )
        .bind(patient_id)
        .bind(DOCTOR_ID)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .expect("insert prescription");

    for (medication_id, quantity) in lines {
        sqlx::query(
            "INSERT INTO prescription_lines (prescription_id, medication_id, prescribed_quantity) VALUES (?, ?, ?)"
        )
            .bind(id)
            .bind(medication_id)
            .bind(quantity)
            .execute(pool)
            .await
            .expect("insert prescription line");
    }

    id
}
