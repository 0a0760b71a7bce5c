// src/models/stock_movement.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{EnumString, Display, AsRefStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT")]
pub enum MovementKind {
    #[serde(rename = "entree")]
    #[sqlx(rename = "entree")]
    #[strum(serialize = "entree")]
    Entry,
    #[serde(rename = "sortie")]
    #[sqlx(rename = "sortie")]
    #[strum(serialize = "sortie")]
    Exit,
    #[serde(rename = "ajustement")]
    #[sqlx(rename = "ajustement")]
    #[strum(serialize = "ajustement")]
    Adjustment,
    #[serde(rename = "perte")]
    #[sqlx(rename = "perte")]
    #[strum(serialize = "perte")]
    Loss,
    #[serde(rename = "retour")]
    #[sqlx(rename = "retour")]
    #[strum(serialize = "retour")]
    Return,
}

/// Largest stock change a single movement may carry, in either direction.
pub const MAX_STOCK_DELTA: i64 = 1_000_000_000;

impl MovementKind {
    /// Checks that the sign of `delta` matches what this kind of movement does to stock.
    pub fn check_delta(&self, delta: i64) -> Result<(), String> {
        if delta == 0 {
            return Err("delta cannot be zero".to_string());
        }
        if !(-MAX_STOCK_DELTA..=MAX_STOCK_DELTA).contains(&delta) {
            return Err(format!("delta must be between -{} and {}", MAX_STOCK_DELTA, MAX_STOCK_DELTA));
        }
        match self {
            MovementKind::Entry | MovementKind::Return if delta < 0 => {
                Err(format!("'{}' movements must increase stock", self))
            }
            MovementKind::Exit | MovementKind::Loss if delta > 0 => {
                Err(format!("'{}' movements must decrease stock", self))
            }
            _ => Ok(()),
        }
    }
}

/// One immutable line of the stock ledger.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct StockMovement {
    pub id: i64,
    pub medication_id: i64,
    pub delta: i64,
    pub kind: MovementKind,
    pub reason: String,
    pub actor_id: i64,
    pub quantity_after: i64,
    pub dispensation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StockAdjustmentRequest {
    #[validate(range(min = -1_000_000_000, max = 1_000_000_000, message = "Delta must be between -1000000000 and 1000000000"))]
    pub delta: i64,
    pub kind: MovementKind,
    #[validate(length(min = 1, max = 500, message = "Reason must be between 1 and 500 characters"))]
    pub reason: String,
}

/// Medication whose on-hand quantity no longer matches its movement history.
#[derive(Debug, Serialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct LedgerDiscrepancy {
    pub medication_id: i64,
    pub name: String,
    pub quantity: i64,
    pub ledger_quantity: i64,
}
