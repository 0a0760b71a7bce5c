// src/models/prescription.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{EnumString, Display, AsRefStr};

// ==================== STATUS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr)]
#[sqlx(type_name = "TEXT")]
pub enum PrescriptionStatus {
    #[serde(rename = "en_attente")]
    #[sqlx(rename = "en_attente")]
    #[strum(serialize = "en_attente")]
    Pending,
    #[serde(rename = "partielle")]
    #[sqlx(rename = "partielle")]
    #[strum(serialize = "partielle")]
    Partial,
    #[serde(rename = "complete")]
    #[sqlx(rename = "complete")]
    #[strum(serialize = "complete")]
    Complete,
}

impl PrescriptionStatus {
    /// Rolls up `(prescribed, dispensed)` pairs into a prescription status.
    ///
    /// A prescription without lines has nothing dispensed and stays pending.
    pub fn derive<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        let mut any_line = false;
        let mut any_dispensed = false;
        let mut all_complete = true;

        for (prescribed, dispensed) in lines {
            any_line = true;
            if dispensed > 0 {
                any_dispensed = true;
            }
            if dispensed < prescribed {
                all_complete = false;
            }
        }

        if !any_line || !any_dispensed {
            PrescriptionStatus::Pending
        } else if all_complete {
            PrescriptionStatus::Complete
        } else {
            PrescriptionStatus::Partial
        }
    }
}

// ==================== PRESCRIPTION ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Prescription {
    pub id: i64,
    pub patient_id: i64,
    pub prescriber_id: i64,
    pub prescribed_at: DateTime<Utc>,
    pub status: PrescriptionStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PrescriptionLine {
    pub id: i64,
    pub prescription_id: i64,
    pub medication_id: i64,
    pub prescribed_quantity: i64,
    pub dispensed_quantity: i64,
    pub posology: Option<String>,
}

impl PrescriptionLine {
    pub fn remaining(&self) -> i64 {
        (self.prescribed_quantity - self.dispensed_quantity).max(0)
    }
}

/// Prescription line joined with the medication it refers to.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct PrescriptionLineView {
    pub id: i64,
    pub medication_id: i64,
    pub medication_name: String,
    pub dosage: String,
    pub prescribed_quantity: i64,
    pub dispensed_quantity: i64,
    pub remaining_quantity: i64,
    pub posology: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrescriptionDetail {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub lines: Vec<PrescriptionLineView>,
}

// ==================== REQUESTS ====================

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CreatePrescriptionLineRequest {
    pub medication_id: i64,
    #[validate(range(min = 1, message = "Prescribed quantity must be positive"))]
    pub quantity: i64,
    #[validate(length(max = 500, message = "Posology cannot exceed 500 characters"))]
    pub posology: Option<String>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreatePrescriptionRequest {
    pub patient_id: i64,
    pub prescribed_at: Option<DateTime<Utc>>,
    #[validate(length(max = 1000, message = "Notes cannot exceed 1000 characters"))]
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "A prescription needs at least one line"), nested)]
    pub lines: Vec<CreatePrescriptionLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PrescriptionQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub patient_id: Option<i64>,
}
