// src/prescription_tracker.rs
//! Prescribed versus dispensed quantities per prescription line, and the
//! prescription status derived from them.

use chrono::Utc;
use sqlx::{Executor, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use validator::Validate;
use crate::auth::Actor;
use crate::error::{PharmacyError, PharmacyResult};
use crate::models::{
    CreatePrescriptionRequest, Prescription, PrescriptionDetail, PrescriptionLine,
    PrescriptionLineView, PrescriptionStatus,
};
use crate::stock_ledger::get_active_medication;
use crate::validator::CustomValidate;

#[derive(Debug, Default, Clone)]
pub struct PrescriptionFilter {
    pub status: Option<PrescriptionStatus>,
    pub patient_id: Option<i64>,
}

fn line_not_found(line_id: i64) -> PharmacyError {
    PharmacyError::NotFound(format!("Prescription line {} does not exist", line_id))
}

/// Quantity still to be dispensed on a line.
pub async fn get_remaining<'e, E>(executor: E, line_id: i64) -> PharmacyResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT prescribed_quantity - dispensed_quantity FROM prescription_lines WHERE id = ?")
        .bind(line_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| line_not_found(line_id))
}

pub async fn load_prescription<'e, E>(executor: E, prescription_id: i64) -> PharmacyResult<Prescription>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Prescription>("SELECT * FROM prescriptions WHERE id = ?")
        .bind(prescription_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| PharmacyError::prescription_not_found(prescription_id))
}

pub async fn load_lines<'e, E>(executor: E, prescription_id: i64) -> PharmacyResult<Vec<PrescriptionLine>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let lines = sqlx::query_as::<_, PrescriptionLine>(
        "SELECT * FROM prescription_lines WHERE prescription_id = ? ORDER BY id"
    )
        .bind(prescription_id)
        .fetch_all(executor)
        .await?;
    Ok(lines)
}

/// Adds `quantity` to a line's dispensed total without touching the status.
///
/// The write is conditional on the line staying within its prescribed
/// quantity; a violation is reported as [`PharmacyError::OverDispensation`].
pub(crate) async fn increment_dispensed(
    conn: &mut SqliteConnection,
    line_id: i64,
    quantity: i64,
) -> PharmacyResult<i64> {
    if quantity <= 0 {
        return Err(PharmacyError::Validation("Dispensed quantity must be positive".to_string()));
    }

    let prescription_id: Option<i64> = sqlx::query_scalar(
        r#"UPDATE prescription_lines
           SET dispensed_quantity = dispensed_quantity + ?
           WHERE id = ? AND dispensed_quantity + ? <= prescribed_quantity
           RETURNING prescription_id"#
    )
        .bind(quantity)
        .bind(line_id)
        .bind(quantity)
        .fetch_optional(&mut *conn)
        .await?;

    match prescription_id {
        Some(id) => Ok(id),
        None => {
            let remaining = get_remaining(&mut *conn, line_id).await?;
            Err(PharmacyError::OverDispensation {
                line_id,
                remaining,
                requested: quantity,
            })
        }
    }
}

/// Records `quantity` as dispensed on a line and refreshes the owning
/// prescription's status.
pub async fn apply_dispensation(
    conn: &mut SqliteConnection,
    line_id: i64,
    quantity: i64,
) -> PharmacyResult<PrescriptionStatus> {
    let prescription_id = increment_dispensed(&mut *conn, line_id, quantity).await?;
    recompute_status(&mut *conn, prescription_id).await
}

/// Derives the status from the current lines and persists it if it changed.
pub async fn recompute_status(
    conn: &mut SqliteConnection,
    prescription_id: i64,
) -> PharmacyResult<PrescriptionStatus> {
    let current: PrescriptionStatus = sqlx::query_scalar("SELECT status FROM prescriptions WHERE id = ?")
        .bind(prescription_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| PharmacyError::prescription_not_found(prescription_id))?;

    let lines = load_lines(&mut *conn, prescription_id).await?;
    let status = PrescriptionStatus::derive(
        lines.iter().map(|l| (l.prescribed_quantity, l.dispensed_quantity)),
    );

    if status != current {
        sqlx::query("UPDATE prescriptions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(prescription_id)
            .execute(&mut *conn)
            .await?;

        log::info!("Prescription {} status {} -> {}", prescription_id, current, status);
    }

    Ok(status)
}

pub async fn create_prescription(
    pool: &SqlitePool,
    request: &CreatePrescriptionRequest,
    actor: &Actor,
) -> PharmacyResult<PrescriptionDetail> {
    request
        .validate()
        .map_err(|e| PharmacyError::Validation(e.to_string()))?;
    let validation = request.custom_validate();
    if !validation.is_valid() {
        return Err(validation.to_pharmacy_error());
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    for line in &request.lines {
        get_active_medication(&mut *tx, line.medication_id).await?;
    }

    let prescription_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO prescriptions (patient_id, prescriber_id, prescribed_at, status, notes, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           RETURNING id"#
    )
        .bind(request.patient_id)
        .bind(actor.user_id)
        .bind(request.prescribed_at.unwrap_or(now))
        .bind(PrescriptionStatus::Pending)
        .bind(&request.notes)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

    for line in &request.lines {
        sqlx::query(
            r#"INSERT INTO prescription_lines (prescription_id, medication_id, prescribed_quantity, dispensed_quantity, posology)
               VALUES (?, ?, ?, 0, ?)"#
        )
            .bind(prescription_id)
            .bind(line.medication_id)
            .bind(line.quantity)
            .bind(&line.posology)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log::info!(
        "Prescription {} created for patient {} by user {} ({} line(s))",
        prescription_id, request.patient_id, actor.user_id, request.lines.len()
    );

    get_prescription(pool, prescription_id).await
}

pub async fn get_prescription(pool: &SqlitePool, prescription_id: i64) -> PharmacyResult<PrescriptionDetail> {
    let prescription = load_prescription(pool, prescription_id).await?;

    let lines = sqlx::query_as::<_, PrescriptionLineView>(
        r#"SELECT l.id, l.medication_id,
                  m.name AS medication_name, m.dosage,
                  l.prescribed_quantity, l.dispensed_quantity,
                  l.prescribed_quantity - l.dispensed_quantity AS remaining_quantity,
                  l.posology
           FROM prescription_lines l
           JOIN medications m ON m.id = l.medication_id
           WHERE l.prescription_id = ?
           ORDER BY l.id"#
    )
        .bind(prescription_id)
        .fetch_all(pool)
        .await?;

    Ok(PrescriptionDetail { prescription, lines })
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a PrescriptionFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(patient_id) = filter.patient_id {
        builder.push(" AND patient_id = ").push_bind(patient_id);
    }
}

/// Prescriptions matching `filter`, newest first, with the total count.
pub async fn list_prescriptions(
    pool: &SqlitePool,
    filter: &PrescriptionFilter,
    limit: i64,
    offset: i64,
) -> PharmacyResult<(Vec<Prescription>, i64)> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM prescriptions WHERE 1=1");
    push_filters(&mut count, filter);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM prescriptions WHERE 1=1");
    push_filters(&mut select, filter);
    select
        .push(" ORDER BY prescribed_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let prescriptions = select
        .build_query_as::<Prescription>()
        .fetch_all(pool)
        .await?;

    Ok((prescriptions, total))
}
