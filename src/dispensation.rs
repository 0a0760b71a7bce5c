// src/dispensation.rs
//! Dispensation recorder.
//!
//! Turns a multi-line dispensation request into stock exits, prescription
//! line increments and one immutable dispensation record, all inside a single
//! transaction. Each line is capped at `min(requested, remaining, available)`;
//! lines capped to zero are left out of the record.

use chrono::Utc;
use std::future::Future;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use validator::Validate;
use crate::auth::Actor;
use crate::error::{PharmacyError, PharmacyResult};
use crate::models::{
    Dispensation, DispensationDetail, DispensationLine, DispensationRequest, MovementKind,
    PrescriptionLine,
};
use crate::prescription_tracker::{increment_dispensed, load_lines, load_prescription, recompute_status};
use crate::stock_ledger::{adjust_stock, get_active_medication, StockAdjustment};
use crate::validator::CustomValidate;

/// Quantity that may actually be dispensed for one requested line.
pub fn allowed_quantity(requested: i64, remaining: i64, available: i64) -> i64 {
    requested.min(remaining).min(available).max(0)
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedLine {
    line_id: i64,
    medication_id: i64,
    prescribed_quantity: i64,
    quantity: i64,
    unit_price: f64,
    lot_number: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DispensationFilter {
    pub prescription_id: Option<i64>,
    pub pharmacist_id: Option<i64>,
}

/// Resolves every requested line against the prescription and current stock.
async fn plan_lines(
    conn: &mut SqliteConnection,
    prescription_id: i64,
    lines: &[PrescriptionLine],
    request: &DispensationRequest,
) -> PharmacyResult<Vec<PlannedLine>> {
    let mut planned = Vec::with_capacity(request.lines.len());

    for requested in &request.lines {
        let line = lines
            .iter()
            .find(|l| l.medication_id == requested.medication_id)
            .ok_or(PharmacyError::LineNotFound {
                prescription_id,
                medication_id: requested.medication_id,
            })?;

        let medication = get_active_medication(&mut *conn, requested.medication_id).await?;
        let quantity = allowed_quantity(requested.requested_quantity, line.remaining(), medication.quantity);

        if quantity == 0 {
            log::debug!(
                "Skipping medication {} on prescription {}: remaining {}, available {}",
                requested.medication_id, prescription_id, line.remaining(), medication.quantity
            );
            continue;
        }
        if quantity < requested.requested_quantity {
            log::info!(
                "Capping medication {} on prescription {} from {} to {}",
                requested.medication_id, prescription_id, requested.requested_quantity, quantity
            );
        }

        planned.push(PlannedLine {
            line_id: line.id,
            medication_id: medication.id,
            prescribed_quantity: line.prescribed_quantity,
            quantity,
            unit_price: medication.price,
            lot_number: requested.lot_number.clone(),
        });
    }

    Ok(planned)
}

/// Stock or remaining quantity moved between planning and writing.
fn stale_read_conflict(err: PharmacyError) -> PharmacyError {
    match err {
        PharmacyError::InsufficientStock { medication_id, available, requested } => {
            PharmacyError::ConcurrencyConflict(format!(
                "stock of medication {} dropped to {} while dispensing {}",
                medication_id, available, requested
            ))
        }
        PharmacyError::OverDispensation { line_id, remaining, requested } => {
            PharmacyError::ConcurrencyConflict(format!(
                "prescription line {} has {} remaining while dispensing {}",
                line_id, remaining, requested
            ))
        }
        other => other,
    }
}

async fn try_record(
    pool: &SqlitePool,
    prescription_id: i64,
    actor: &Actor,
    request: &DispensationRequest,
) -> PharmacyResult<DispensationDetail> {
    let mut tx = pool.begin().await?;

    load_prescription(&mut *tx, prescription_id).await?;
    let lines = load_lines(&mut *tx, prescription_id).await?;
    let planned = plan_lines(&mut tx, prescription_id, &lines, request).await?;

    if planned.is_empty() {
        return Err(PharmacyError::NothingToDispense { prescription_id });
    }

    let now = Utc::now();
    let dispensation_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO dispensations (prescription_id, pharmacist_id, dispensed_at, notes, total_amount)
           VALUES (?, ?, ?, ?, 0)
           RETURNING id"#
    )
        .bind(prescription_id)
        .bind(actor.user_id)
        .bind(now)
        .bind(&request.notes)
        .fetch_one(&mut *tx)
        .await?;

    let mut total_amount = 0.0;

    for line in &planned {
        let exit = StockAdjustment::new(
            line.medication_id,
            -line.quantity,
            MovementKind::Exit,
            format!("Dispensation {} (prescription {})", dispensation_id, prescription_id),
        )
            .for_dispensation(dispensation_id);

        adjust_stock(&mut tx, &exit, actor)
            .await
            .map_err(stale_read_conflict)?;

        increment_dispensed(&mut tx, line.line_id, line.quantity)
            .await
            .map_err(stale_read_conflict)?;

        let line_total = line.quantity as f64 * line.unit_price;
        total_amount += line_total;

        sqlx::query(
            r#"INSERT INTO dispensation_lines
               (dispensation_id, medication_id, prescribed_quantity, dispensed_quantity, unit_price, line_total, lot_number)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(dispensation_id)
            .bind(line.medication_id)
            .bind(line.prescribed_quantity)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line_total)
            .bind(&line.lot_number)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("UPDATE dispensations SET total_amount = ? WHERE id = ?")
        .bind(total_amount)
        .bind(dispensation_id)
        .execute(&mut *tx)
        .await?;

    let status = recompute_status(&mut tx, prescription_id).await?;
    let detail = load_detail(&mut tx, dispensation_id).await?;

    tx.commit().await?;

    log::info!(
        "Dispensation {} recorded for prescription {} by user {}: {} line(s), total {:.2}, prescription now {}",
        dispensation_id, prescription_id, actor.user_id, planned.len(), total_amount, status
    );

    Ok(detail)
}

/// Records a dispensation against `prescription_id`.
///
/// On a concurrency conflict the whole attempt is rolled back and replayed,
/// at most `conflict_retries` times, before the conflict is returned.
pub async fn record_dispensation(
    pool: &SqlitePool,
    prescription_id: i64,
    actor: &Actor,
    request: &DispensationRequest,
    conflict_retries: u32,
) -> PharmacyResult<DispensationDetail> {
    request
        .validate()
        .map_err(|e| PharmacyError::Validation(e.to_string()))?;
    let validation = request.custom_validate();
    if !validation.is_valid() {
        return Err(validation.to_pharmacy_error());
    }

    retry_on_conflict(prescription_id, conflict_retries, || {
        try_record(pool, prescription_id, actor, request)
    }).await
}

/// Runs `attempt` once, then replays it up to `conflict_retries` more times
/// while it keeps failing with a concurrency conflict.
async fn retry_on_conflict<T, F, Fut>(
    prescription_id: i64,
    conflict_retries: u32,
    mut attempt: F,
) -> PharmacyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PharmacyResult<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_conflict() && retries < conflict_retries => {
                retries += 1;
                log::warn!(
                    "Retrying dispensation for prescription {} ({}/{}): {}",
                    prescription_id, retries, conflict_retries, e
                );
            }
            result => return result,
        }
    }
}

async fn load_detail(conn: &mut SqliteConnection, dispensation_id: i64) -> PharmacyResult<DispensationDetail> {
    let dispensation = sqlx::query_as::<_, Dispensation>("SELECT * FROM dispensations WHERE id = ?")
        .bind(dispensation_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| PharmacyError::NotFound(format!("Dispensation {} does not exist", dispensation_id)))?;

    let lines = sqlx::query_as::<_, DispensationLine>(
        "SELECT * FROM dispensation_lines WHERE dispensation_id = ? ORDER BY id"
    )
        .bind(dispensation_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(DispensationDetail { dispensation, lines })
}

pub async fn get_dispensation(pool: &SqlitePool, dispensation_id: i64) -> PharmacyResult<DispensationDetail> {
    let mut conn = pool.acquire().await?;
    load_detail(&mut conn, dispensation_id).await
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a DispensationFilter) {
    if let Some(prescription_id) = filter.prescription_id {
        builder.push(" AND prescription_id = ").push_bind(prescription_id);
    }
    if let Some(pharmacist_id) = filter.pharmacist_id {
        builder.push(" AND pharmacist_id = ").push_bind(pharmacist_id);
    }
}

/// Dispensation headers matching `filter`, newest first, with the total count.
pub async fn list_dispensations(
    pool: &SqlitePool,
    filter: &DispensationFilter,
    limit: i64,
    offset: i64,
) -> PharmacyResult<(Vec<Dispensation>, i64)> {
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM dispensations WHERE 1=1");
    push_filters(&mut count, filter);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM dispensations WHERE 1=1");
    push_filters(&mut select, filter);
    select
        .push(" ORDER BY dispensed_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let dispensations = select
        .build_query_as::<Dispensation>()
        .fetch_all(pool)
        .await?;

    Ok((dispensations, total))
}

/// Every dispensation of a prescription with its lines, oldest first.
pub async fn dispensations_for_prescription(
    pool: &SqlitePool,
    prescription_id: i64,
) -> PharmacyResult<Vec<DispensationDetail>> {
    let mut conn = pool.acquire().await?;
    load_prescription(&mut *conn, prescription_id).await?;

    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM dispensations WHERE prescription_id = ? ORDER BY dispensed_at, id"
    )
        .bind(prescription_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut details = Vec::with_capacity(ids.len());
    for id in ids {
        details.push(load_detail(&mut conn, id).await?);
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DispensationLineRequest, PrescriptionStatus, StockStatus};
    use crate::prescription_tracker::get_prescription;
    use crate::stock_ledger::{get_available, movement_history, verify_ledger};
    use crate::test_support::{file_pool, pharmacist, seed_medication, seed_prescription, test_pool};
    use std::cell::Cell;
    use tokio_test::assert_ok;

    fn request(lines: &[(i64, i64)]) -> DispensationRequest {
        DispensationRequest {
            lines: lines
                .iter()
                .map(|&(medication_id, requested_quantity)| DispensationLineRequest {
                    medication_id,
                    requested_quantity,
                    lot_number: Some("L1".to_string()),
                })
                .collect(),
            notes: None,
        }
    }

    async fn medication_status(pool: &SqlitePool, id: i64) -> StockStatus {
        get_active_medication(pool, id).await.unwrap().stock_status()
    }

    #[test]
    fn test_allowed_quantity_is_the_minimum() {
        assert_eq!(allowed_quantity(10, 5, 3), 3);
        assert_eq!(allowed_quantity(2, 5, 3), 2);
        assert_eq!(allowed_quantity(10, 5, 30), 5);
        assert_eq!(allowed_quantity(10, 0, 30), 0);
        assert_eq!(allowed_quantity(10, 5, 0), 0);
    }

    #[actix_rt::test]
    async fn test_partial_dispensation_when_stock_runs_short() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 15, 5, 2.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 20)]).await;

        let detail = assert_ok!(record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 20)]), 1).await);

        assert_eq!(detail.lines.len(), 1);
        assert_eq!(detail.lines[0].dispensed_quantity, 15);
        assert_eq!(detail.lines[0].prescribed_quantity, 20);
        assert_eq!(detail.lines[0].lot_number.as_deref(), Some("L1"));
        assert_eq!(detail.dispensation.total_amount, 30.0);
        assert_eq!(detail.dispensation.pharmacist_id, pharmacist().user_id);

        assert_eq!(get_available(&pool, m1).await.unwrap(), 0);
        assert_eq!(medication_status(&pool, m1).await, StockStatus::OutOfStock);

        let prescription = get_prescription(&pool, p1).await.unwrap();
        assert_eq!(prescription.prescription.status, PrescriptionStatus::Partial);
        assert_eq!(prescription.lines[0].dispensed_quantity, 15);
        assert_eq!(prescription.lines[0].remaining_quantity, 5);

        let (movements, _) = movement_history(&pool, m1, 10, 0).await.unwrap();
        assert_eq!(movements[0].kind, MovementKind::Exit);
        assert_eq!(movements[0].delta, -15);
        assert_eq!(movements[0].dispensation_id, Some(detail.dispensation.id));
        assert!(verify_ledger(&pool).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_full_dispensation_completes_prescription() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 25, 5, 2.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 20)]).await;

        let detail = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 20)]), 1).await.unwrap();

        assert_eq!(detail.lines[0].dispensed_quantity, 20);
        assert_eq!(get_available(&pool, m1).await.unwrap(), 5);
        assert_eq!(medication_status(&pool, m1).await, StockStatus::Alert);

        let prescription = get_prescription(&pool, p1).await.unwrap();
        assert_eq!(prescription.prescription.status, PrescriptionStatus::Complete);

        // Nothing is left to dispense afterwards
        let again = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 1)]), 1).await;
        assert!(matches!(again, Err(PharmacyError::NothingToDispense { prescription_id }) if prescription_id == p1));
    }

    #[actix_rt::test]
    async fn test_request_capped_by_remaining_and_stock() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Ibuprofene", 3, 1, 0.5).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 8)]).await;
        let line_id = load_lines(&pool, p1).await.unwrap()[0].id;
        sqlx::query("UPDATE prescription_lines SET dispensed_quantity = 3 WHERE id = ?")
            .bind(line_id)
            .execute(&pool)
            .await
            .unwrap();

        let detail = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 10)]), 1).await.unwrap();

        assert_eq!(detail.lines[0].dispensed_quantity, 3);
        assert_eq!(get_available(&pool, m1).await.unwrap(), 0);
        let prescription = get_prescription(&pool, p1).await.unwrap();
        assert_eq!(prescription.lines[0].dispensed_quantity, 6);
        assert_eq!(prescription.lines[0].remaining_quantity, 2);
    }

    #[actix_rt::test]
    async fn test_zero_lines_are_omitted_from_the_record() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let m2 = seed_medication(&pool, "Paracetamol", 0, 2, 0.2).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 4), (m2, 4)]).await;

        let detail = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 4), (m2, 4)]), 1).await.unwrap();

        assert_eq!(detail.lines.len(), 1);
        assert_eq!(detail.lines[0].medication_id, m1);
        assert_eq!(detail.dispensation.total_amount, 4.0);

        let prescription = get_prescription(&pool, p1).await.unwrap();
        assert_eq!(prescription.prescription.status, PrescriptionStatus::Partial);
    }

    #[actix_rt::test]
    async fn test_medication_not_on_prescription_changes_nothing() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let m2 = seed_medication(&pool, "Paracetamol", 10, 2, 0.2).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 4)]).await;

        let result = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 4), (m2, 1)]), 1).await;
        match result {
            Err(PharmacyError::LineNotFound { prescription_id, medication_id }) => {
                assert_eq!(prescription_id, p1);
                assert_eq!(medication_id, m2);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert_eq!(get_available(&pool, m1).await.unwrap(), 10);
        assert_eq!(get_available(&pool, m2).await.unwrap(), 10);
        let prescription = get_prescription(&pool, p1).await.unwrap();
        assert_eq!(prescription.prescription.status, PrescriptionStatus::Pending);
        assert_eq!(prescription.lines[0].dispensed_quantity, 0);
        assert!(dispensations_for_prescription(&pool, p1).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_nothing_to_dispense_creates_no_record() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 0, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 4)]).await;

        let result = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 4)]), 1).await;
        assert!(matches!(result, Err(PharmacyError::NothingToDispense { .. })));

        let (_, total) = list_dispensations(&pool, &DispensationFilter::default(), 20, 0).await.unwrap();
        assert_eq!(total, 0);
    }

    #[actix_rt::test]
    async fn test_missing_prescription_and_inactive_medication() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 4)]).await;

        let result = record_dispensation(&pool, 999, &pharmacist(), &request(&[(m1, 4)]), 1).await;
        assert!(matches!(result, Err(PharmacyError::NotFound(_))));

        sqlx::query("UPDATE medications SET is_active = 0 WHERE id = ?")
            .bind(m1)
            .execute(&pool)
            .await
            .unwrap();
        let result = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 4)]), 1).await;
        assert!(matches!(result, Err(PharmacyError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_invalid_requests_are_rejected_before_any_io() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 4)]).await;

        let duplicate = request(&[(m1, 1), (m1, 2)]);
        assert!(matches!(
            record_dispensation(&pool, p1, &pharmacist(), &duplicate, 1).await,
            Err(PharmacyError::Validation(_))
        ));

        let zero = request(&[(m1, 0)]);
        assert!(matches!(
            record_dispensation(&pool, p1, &pharmacist(), &zero, 1).await,
            Err(PharmacyError::Validation(_))
        ));

        let empty = request(&[]);
        assert!(matches!(
            record_dispensation(&pool, p1, &pharmacist(), &empty, 1).await,
            Err(PharmacyError::Validation(_))
        ));
        assert_eq!(get_available(&pool, m1).await.unwrap(), 10);
    }

    #[actix_rt::test]
    async fn test_history_lookups() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 6)]).await;
        let p2 = seed_prescription(&pool, 43, &[(m1, 2)]).await;

        let first = record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 2)]), 1).await.unwrap();
        record_dispensation(&pool, p1, &pharmacist(), &request(&[(m1, 2)]), 1).await.unwrap();
        record_dispensation(&pool, p2, &pharmacist(), &request(&[(m1, 2)]), 1).await.unwrap();

        let history = dispensations_for_prescription(&pool, p1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].dispensation.id, first.dispensation.id);

        let fetched = get_dispensation(&pool, first.dispensation.id).await.unwrap();
        assert_eq!(fetched.lines, first.lines);

        let filter = DispensationFilter { prescription_id: Some(p2), ..Default::default() };
        let (rows, total) = list_dispensations(&pool, &filter, 20, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].prescription_id, p2);

        assert!(matches!(get_dispensation(&pool, 999).await, Err(PharmacyError::NotFound(_))));
        assert!(matches!(dispensations_for_prescription(&pool, 999).await, Err(PharmacyError::NotFound(_))));
    }

    #[actix_rt::test]
    async fn test_concurrent_requests_never_oversell() {
        let pool = test_pool().await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 8)]).await;
        let p2 = seed_prescription(&pool, 43, &[(m1, 8)]).await;

        let actor = pharmacist();
        let req = request(&[(m1, 8)]);
        let (a, b) = tokio::join!(
            record_dispensation(&pool, p1, &actor, &req, 1),
            record_dispensation(&pool, p2, &actor, &req, 1),
        );

        let dispensed: i64 = [a, b]
            .into_iter()
            .filter_map(Result::ok)
            .map(|d| d.lines.iter().map(|l| l.dispensed_quantity).sum::<i64>())
            .sum();

        assert_eq!(dispensed, 10);
        assert_eq!(get_available(&pool, m1).await.unwrap(), 0);
        assert!(verify_ledger(&pool).await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn test_concurrent_requests_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir, 4).await;
        let m1 = seed_medication(&pool, "Amoxicilline", 10, 2, 1.0).await;
        let p1 = seed_prescription(&pool, 42, &[(m1, 8)]).await;
        let p2 = seed_prescription(&pool, 43, &[(m1, 8)]).await;

        let actor = pharmacist();
        let req = request(&[(m1, 8)]);
        let (a, b) = tokio::join!(
            record_dispensation(&pool, p1, &actor, &req, 1),
            record_dispensation(&pool, p2, &actor, &req, 1),
        );

        let mut dispensed = 0;
        for result in [a, b] {
            match result {
                Ok(detail) => dispensed += detail.lines.iter().map(|l| l.dispensed_quantity).sum::<i64>(),
                Err(e) => assert!(
                    e.is_conflict() || matches!(e, PharmacyError::NothingToDispense { .. }),
                    "unexpected error: {:?}",
                    e
                ),
            }
        }

        let available = get_available(&pool, m1).await.unwrap();
        assert!(available >= 0);
        assert_eq!(available + dispensed, 10);
        assert!(dispensed >= 8);
        assert!(verify_ledger(&pool).await.unwrap().is_empty());
    }

    fn conflict() -> PharmacyError {
        PharmacyError::ConcurrencyConflict("database is locked".to_string())
    }

    #[test]
    fn test_write_time_shortfalls_become_conflicts() {
        let err = stale_read_conflict(PharmacyError::InsufficientStock {
            medication_id: 4,
            available: 1,
            requested: 3,
        });
        assert!(err.is_conflict());

        let err = stale_read_conflict(PharmacyError::OverDispensation {
            line_id: 9,
            remaining: 0,
            requested: 2,
        });
        assert!(err.is_conflict());

        let err = stale_read_conflict(PharmacyError::NotFound("Medication 4".to_string()));
        assert!(matches!(err, PharmacyError::NotFound(_)));
        let err = stale_read_conflict(PharmacyError::NothingToDispense { prescription_id: 1 });
        assert!(matches!(err, PharmacyError::NothingToDispense { prescription_id: 1 }));
    }

    #[actix_rt::test]
    async fn test_persistent_conflict_is_retried_then_surfaced() {
        for retries in [0, 1, 3] {
            let calls = Cell::new(0u32);
            let result: PharmacyResult<()> = retry_on_conflict(1, retries, || {
                calls.set(calls.get() + 1);
                async { Err(conflict()) }
            }).await;

            assert!(matches!(result, Err(PharmacyError::ConcurrencyConflict(_))));
            assert_eq!(calls.get(), retries + 1);
        }
    }

    #[actix_rt::test]
    async fn test_conflict_then_success_returns_second_attempt() {
        let calls = Cell::new(0u32);
        let result = retry_on_conflict(1, 1, || {
            let n = calls.get() + 1;
            calls.set(n);
            async move { if n == 1 { Err(conflict()) } else { Ok(n) } }
        }).await;

        assert_eq!(assert_ok!(result), 2);
        assert_eq!(calls.get(), 2);
    }

    #[actix_rt::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result: PharmacyResult<()> = retry_on_conflict(1, 3, || {
            calls.set(calls.get() + 1);
            async { Err(PharmacyError::NothingToDispense { prescription_id: 1 }) }
        }).await;

        assert!(matches!(result, Err(PharmacyError::NothingToDispense { .. })));
        assert_eq!(calls.get(), 1);
    }
}
