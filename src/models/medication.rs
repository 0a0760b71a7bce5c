// src/models/medication.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{EnumString, Display, AsRefStr};

// ==================== STOCK STATUS ====================

/// Stock level of a medication relative to its alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum StockStatus {
    #[serde(rename = "normal")]
    #[strum(serialize = "normal")]
    Normal,
    #[serde(rename = "alerte")]
    #[strum(serialize = "alerte")]
    Alert,
    #[serde(rename = "rupture")]
    #[strum(serialize = "rupture")]
    OutOfStock,
}

impl StockStatus {
    pub fn from_levels(quantity: i64, alert_threshold: i64) -> Self {
        if quantity <= 0 {
            StockStatus::OutOfStock
        } else if quantity <= alert_threshold {
            StockStatus::Alert
        } else {
            StockStatus::Normal
        }
    }

    /// SQL predicate selecting medications (alias `m`) in this status
    pub fn sql_condition(&self) -> &'static str {
        match self {
            StockStatus::Normal => "m.quantity > m.alert_threshold",
            StockStatus::Alert => "m.quantity > 0 AND m.quantity <= m.alert_threshold",
            StockStatus::OutOfStock => "m.quantity = 0",
        }
    }
}

// ==================== MEDICATION ====================

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Medication {
    pub id: i64,
    pub name: String,
    pub dosage: String,
    pub form: String,
    pub price: f64,
    pub quantity: i64,
    pub alert_threshold: i64,
    pub expiration_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Medication {
    pub fn stock_status(&self) -> StockStatus {
        StockStatus::from_levels(self.quantity, self.alert_threshold)
    }
}

const EXPIRY_CRITICAL_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
pub struct MedicationResponse {
    #[serde(flatten)]
    pub medication: Medication,
    pub stock_status: StockStatus,
    pub expiration_status: String,
    pub days_until_expiration: Option<i64>,
}

impl MedicationResponse {
    pub fn new(medication: Medication, expiry_warning_days: i64) -> Self {
        let (expiration_status, days_until_expiration) =
            calculate_expiration_status(medication.expiration_date, expiry_warning_days);
        Self {
            stock_status: medication.stock_status(),
            medication,
            expiration_status,
            days_until_expiration,
        }
    }
}

pub fn calculate_expiration_status(
    expiration_date: Option<DateTime<Utc>>,
    warning_days: i64,
) -> (String, Option<i64>) {
    match expiration_date {
        None => ("unknown".to_string(), None),
        Some(date) => {
            let days = (date - Utc::now()).num_days();
            let status = if date < Utc::now() {
                "expired"
            } else if days <= EXPIRY_CRITICAL_DAYS {
                "expiring_critical"
            } else if days <= warning_days {
                "expiring_soon"
            } else {
                "ok"
            };
            (status.to_string(), Some(days))
        }
    }
}

// ==================== REQUESTS ====================

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateMedicationRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(max = 100, message = "Dosage cannot exceed 100 characters"))]
    pub dosage: String,
    #[validate(length(max = 100, message = "Form cannot exceed 100 characters"))]
    pub form: String,
    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: f64,
    #[validate(range(min = 0, message = "Initial quantity must be non-negative"))]
    pub initial_quantity: Option<i64>,
    #[validate(range(min = 0, message = "Alert threshold must be non-negative"))]
    pub alert_threshold: Option<i64>,
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate, Default)]
pub struct UpdateMedicationRequest {
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 100, message = "Dosage cannot exceed 100 characters"))]
    pub dosage: Option<String>,
    #[validate(length(max = 100, message = "Form cannot exceed 100 characters"))]
    pub form: Option<String>,
    #[validate(range(min = 0.0, message = "Price must be non-negative"))]
    pub price: Option<f64>,
    #[validate(range(min = 0, message = "Alert threshold must be non-negative"))]
    pub alert_threshold: Option<i64>,
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct MedicationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}
