// src/models/mod.rs

pub mod dispensation;
pub mod medication;
pub mod prescription;
pub mod stock_movement;

// Re-export so structs are reachable as crate::models::StructName
pub use dispensation::*;
pub use medication::*;
pub use prescription::*;
pub use stock_movement::*;

use serde::Serialize;

// ==================== COMMON / SHARED ====================

/// Pharmacy dashboard counters
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub active_medications: i64,
    pub alert_medications: i64,
    pub out_of_stock_medications: i64,
    pub expired_medications: i64,
    pub pending_prescriptions: i64,
    pub partial_prescriptions: i64,
    pub dispensations_today: i64,
    pub dispensed_amount_today: f64,
}
