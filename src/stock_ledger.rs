// src/stock_ledger.rs
//! Stock ledger: authoritative on-hand quantity per medication and the
//! append-only movement history that reconstructs it.
//!
//! Quantities change only through [`adjust_stock`], which applies the delta
//! and appends the matching `stock_movements` row in the caller's
//! transaction. For every medication `quantity == SUM(delta)` holds.

use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use crate::auth::Actor;
use crate::error::{PharmacyError, PharmacyResult};
use crate::models::{LedgerDiscrepancy, Medication, MovementKind, StockMovement, StockStatus};

/// A single requested change to a medication's stock.
#[derive(Debug, Clone)]
pub struct StockAdjustment {
    pub medication_id: i64,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub dispensation_id: Option<i64>,
}

impl StockAdjustment {
    pub fn new(medication_id: i64, delta: i64, kind: MovementKind, reason: impl Into<String>) -> Self {
        Self {
            medication_id,
            delta,
            kind,
            reason: reason.into(),
            dispensation_id: None,
        }
    }

    pub fn for_dispensation(mut self, dispensation_id: i64) -> Self {
        self.dispensation_id = Some(dispensation_id);
        self
    }
}

pub fn compute_status(medication: &Medication) -> StockStatus {
    StockStatus::from_levels(medication.quantity, medication.alert_threshold)
}

/// Applies `adjustment` and appends its movement. Returns the new quantity.
///
/// Must run inside a transaction: the conditional UPDATE and the ledger
/// INSERT are only atomic together if the caller commits them together.
pub async fn adjust_stock(
    conn: &mut SqliteConnection,
    adjustment: &StockAdjustment,
    actor: &Actor,
) -> PharmacyResult<i64> {
    adjustment
        .kind
        .check_delta(adjustment.delta)
        .map_err(PharmacyError::InvalidMovement)?;

    let now = Utc::now();

    let quantity_after: Option<i64> = sqlx::query_scalar(
        r#"UPDATE medications
           SET quantity = quantity + ?, updated_at = ?
           WHERE id = ? AND is_active = 1 AND quantity + ? >= 0
           RETURNING quantity"#
    )
        .bind(adjustment.delta)
        .bind(now)
        .bind(adjustment.medication_id)
        .bind(adjustment.delta)
        .fetch_optional(&mut *conn)
        .await?;

    let quantity_after = match quantity_after {
        Some(q) => q,
        None => {
            let available = get_available(&mut *conn, adjustment.medication_id).await?;
            return Err(PharmacyError::InsufficientStock {
                medication_id: adjustment.medication_id,
                available,
                requested: adjustment.delta.saturating_neg(),
            });
        }
    };

    sqlx::query(
        r#"INSERT INTO stock_movements
           (medication_id, delta, kind, reason, actor_id, quantity_after, dispensation_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(adjustment.medication_id)
        .bind(adjustment.delta)
        .bind(adjustment.kind)
        .bind(&adjustment.reason)
        .bind(actor.user_id)
        .bind(quantity_after)
        .bind(adjustment.dispensation_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    log::debug!(
        "Stock {} of {} for medication {} by user {} (now {})",
        adjustment.kind, adjustment.delta, adjustment.medication_id, actor.user_id, quantity_after
    );

    Ok(quantity_after)
}

/// [`adjust_stock`] in its own transaction, for direct stock operations.
pub async fn apply_adjustment(
    pool: &SqlitePool,
    adjustment: &StockAdjustment,
    actor: &Actor,
) -> PharmacyResult<i64> {
    let mut tx = pool.begin().await?;
    let quantity = adjust_stock(&mut *tx, adjustment, actor).await?;
    tx.commit().await?;
    Ok(quantity)
}

/// Snapshot of the on-hand quantity. May be stale as soon as it returns.
pub async fn get_available<'e, E>(executor: E, medication_id: i64) -> PharmacyResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT quantity FROM medications WHERE id = ? AND is_active = 1")
        .bind(medication_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| PharmacyError::medication_not_found(medication_id))
}

pub async fn get_active_medication<'e, E>(executor: E, medication_id: i64) -> PharmacyResult<Medication>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Medication>("SELECT * FROM medications WHERE id = ? AND is_active = 1")
        .bind(medication_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| PharmacyError::medication_not_found(medication_id))
}

/// Movements of one medication, newest first, with the total count.
pub async fn movement_history(
    pool: &SqlitePool,
    medication_id: i64,
    limit: i64,
    offset: i64,
) -> PharmacyResult<(Vec<StockMovement>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements WHERE medication_id = ?")
        .bind(medication_id)
        .fetch_one(pool)
        .await?;

    let movements = sqlx::query_as::<_, StockMovement>(
        r#"SELECT * FROM stock_movements
           WHERE medication_id = ?
           ORDER BY created_at DESC, id DESC
           LIMIT ? OFFSET ?"#
    )
        .bind(medication_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok((movements, total))
}

/// Medications whose quantity differs from the sum of their movements.
pub async fn verify_ledger(pool: &SqlitePool) -> PharmacyResult<Vec<LedgerDiscrepancy>> {
    let discrepancies = sqlx::query_as::<_, LedgerDiscrepancy>(
        r#"SELECT m.id AS medication_id,
                  m.name AS name,
                  m.quantity AS quantity,
                  CAST(COALESCE(SUM(s.delta), 0) AS INTEGER) AS ledger_quantity
           FROM medications m
           LEFT JOIN stock_movements s ON s.medication_id = m.id
           GROUP BY m.id, m.name, m.quantity
           HAVING m.quantity <> COALESCE(SUM(s.delta), 0)
           ORDER BY m.id"#
    )
        .fetch_all(pool)
        .await?;

    if !discrepancies.is_empty() {
        log::error!("Stock ledger mismatch for {} medication(s)", discrepancies.len());
    }

    Ok(discrepancies)
}
