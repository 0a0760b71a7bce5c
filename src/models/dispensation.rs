// src/models/dispensation.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Dispensation {
    pub id: i64,
    pub prescription_id: i64,
    pub pharmacist_id: i64,
    pub dispensed_at: DateTime<Utc>,
    pub notes: Option<String>,
    #[serde(rename = "montantTotal")]
    pub total_amount: f64,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct DispensationLine {
    #[serde(skip_serializing)]
    pub id: i64,
    #[serde(skip_serializing)]
    pub dispensation_id: i64,
    #[serde(rename = "medicamentId")]
    pub medication_id: i64,
    #[serde(rename = "quantitePrescrite")]
    pub prescribed_quantity: i64,
    #[serde(rename = "quantiteDispensee")]
    pub dispensed_quantity: i64,
    #[serde(rename = "prixUnitaire")]
    pub unit_price: f64,
    #[serde(rename = "montantTotal")]
    pub line_total: f64,
    #[serde(rename = "numeroLot")]
    pub lot_number: Option<String>,
}

/// A recorded fulfilment event with its applied lines.
#[derive(Debug, Serialize, Clone)]
pub struct DispensationDetail {
    #[serde(flatten)]
    pub dispensation: Dispensation,
    pub lines: Vec<DispensationLine>,
}

// ==================== REQUESTS ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct DispensationLineRequest {
    #[serde(rename = "medicationId", alias = "medicamentId")]
    pub medication_id: i64,
    #[serde(rename = "quantiteDispensee")]
    #[validate(range(min = 1, message = "Requested quantity must be positive"))]
    pub requested_quantity: i64,
    #[serde(rename = "numeroLot", default)]
    #[validate(length(min = 1, max = 100, message = "Lot number must be between 1 and 100 characters"))]
    pub lot_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct DispensationRequest {
    #[validate(length(min = 1, message = "At least one line is required"), nested)]
    pub lines: Vec<DispensationLineRequest>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DispensationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub prescription_id: Option<i64>,
    pub pharmacist_id: Option<i64>,
}
