// src/db.rs - Database migrations and setup

use sqlx::SqlitePool;
use anyhow::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Medications: quantity only moves through stock_movements
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS medications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            dosage TEXT NOT NULL CHECK(length(dosage) <= 100),
            form TEXT NOT NULL CHECK(length(form) <= 100),
            price REAL NOT NULL DEFAULT 0 CHECK(price >= 0),
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            alert_threshold INTEGER NOT NULL DEFAULT 0 CHECK(alert_threshold >= 0),
            expiration_date DATETIME,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            UNIQUE(name, dosage, form)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prescriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL,
            prescriber_id INTEGER NOT NULL,
            prescribed_at DATETIME NOT NULL,
            status TEXT NOT NULL DEFAULT 'en_attente' CHECK(
                status IN ('en_attente', 'partielle', 'complete')
            ),
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prescription_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prescription_id INTEGER NOT NULL,
            medication_id INTEGER NOT NULL,
            prescribed_quantity INTEGER NOT NULL CHECK(prescribed_quantity > 0),
            dispensed_quantity INTEGER NOT NULL DEFAULT 0 CHECK(
                dispensed_quantity >= 0 AND dispensed_quantity <= prescribed_quantity
            ),
            posology TEXT CHECK(posology IS NULL OR length(posology) <= 500),
            FOREIGN KEY (prescription_id) REFERENCES prescriptions (id),
            FOREIGN KEY (medication_id) REFERENCES medications (id),
            UNIQUE(prescription_id, medication_id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dispensations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prescription_id INTEGER NOT NULL,
            pharmacist_id INTEGER NOT NULL,
            dispensed_at DATETIME NOT NULL,
            notes TEXT CHECK(notes IS NULL OR length(notes) <= 1000),
            total_amount REAL NOT NULL DEFAULT 0 CHECK(total_amount >= 0),
            FOREIGN KEY (prescription_id) REFERENCES prescriptions (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dispensation_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dispensation_id INTEGER NOT NULL,
            medication_id INTEGER NOT NULL,
            prescribed_quantity INTEGER NOT NULL CHECK(prescribed_quantity > 0),
            dispensed_quantity INTEGER NOT NULL CHECK(dispensed_quantity > 0),
            unit_price REAL NOT NULL CHECK(unit_price >= 0),
            line_total REAL NOT NULL CHECK(line_total >= 0),
            lot_number TEXT CHECK(lot_number IS NULL OR length(lot_number) <= 100),
            FOREIGN KEY (dispensation_id) REFERENCES dispensations (id),
            FOREIGN KEY (medication_id) REFERENCES medications (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Append-only ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stock_movements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            medication_id INTEGER NOT NULL,
            delta INTEGER NOT NULL CHECK(delta <> 0),
            kind TEXT NOT NULL CHECK(
                kind IN ('entree', 'sortie', 'ajustement', 'perte', 'retour')
            ),
            reason TEXT NOT NULL CHECK(length(reason) <= 500),
            actor_id INTEGER NOT NULL,
            quantity_after INTEGER NOT NULL CHECK(quantity_after >= 0),
            dispensation_id INTEGER,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (medication_id) REFERENCES medications (id),
            FOREIGN KEY (dispensation_id) REFERENCES dispensations (id)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            user_id INTEGER,
            action TEXT NOT NULL CHECK(length(action) <= 50),
            entity_type TEXT NOT NULL CHECK(length(entity_type) <= 50),
            entity_id TEXT,
            description TEXT,
            changes TEXT,
            ip_address TEXT,
            user_agent TEXT,
            created_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_medications_active ON medications(is_active)",
        "CREATE INDEX IF NOT EXISTS idx_medications_expiration ON medications(expiration_date)",
        "CREATE INDEX IF NOT EXISTS idx_prescriptions_status ON prescriptions(status)",
        "CREATE INDEX IF NOT EXISTS idx_prescriptions_patient ON prescriptions(patient_id)",
        "CREATE INDEX IF NOT EXISTS idx_prescription_lines_prescription ON prescription_lines(prescription_id)",
        "CREATE INDEX IF NOT EXISTS idx_dispensations_prescription ON dispensations(prescription_id)",
        "CREATE INDEX IF NOT EXISTS idx_dispensation_lines_dispensation ON dispensation_lines(dispensation_id)",
        "CREATE INDEX IF NOT EXISTS idx_stock_movements_medication ON stock_movements(medication_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at)",
    ];

    for index in indexes {
        sqlx::query(index).execute(pool).await?;
    }

    log::info!("Database migrations completed");
    Ok(())
}
