// src/validator.rs - Cross-field validation on top of the `validator` derives
use std::collections::{HashMap, HashSet};
use serde::Serialize;
use regex::Regex;
use lazy_static::lazy_static;
use chrono::{DateTime, Utc};
use crate::error::{ApiError, PharmacyError};
use crate::models::*;

lazy_static! {
    static ref LOT_NUMBER_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap();
}

// ==================== VALIDATION RESULT ====================

#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub errors: HashMap<String, Vec<String>>,
    pub warnings: HashMap<String, Vec<String>>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        for (field, errors) in other.errors {
            self.errors.entry(field).or_default().extend(errors);
        }
        for (field, warnings) in other.warnings {
            self.warnings.entry(field).or_default().extend(warnings);
        }
    }

    fn message(&self) -> String {
        let mut fields: Vec<_> = self.errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
            .into_iter()
            .map(|(field, errors)| format!("{}: {}", field, errors.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::ValidationError(self.message())
    }

    pub fn to_pharmacy_error(&self) -> PharmacyError {
        PharmacyError::Validation(self.message())
    }
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    pub fn not_blank(value: &str, field: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            Err(format!("{} cannot be blank", field))
        } else {
            Ok(())
        }
    }

    pub fn lot_number(value: &str) -> Result<(), String> {
        if LOT_NUMBER_REGEX.is_match(value) {
            Ok(())
        } else {
            Err(format!("Invalid lot number '{}'", value))
        }
    }

    pub fn expiration_date(value: Option<&DateTime<Utc>>, warn_days: i64) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(date) = value {
            let days_until = (*date - Utc::now()).num_days();

            if *date < Utc::now() {
                result.add_warning("expiration_date", "Medication has already expired");
            } else if days_until <= warn_days {
                result.add_warning("expiration_date", format!("Expires in {} days", days_until));
            }
        }

        result
    }

    /// Reports every medication id that appears more than once.
    pub fn unique_medications<I>(ids: I, field: &str) -> ValidationResult
    where
        I: IntoIterator<Item = i64>,
    {
        let mut result = ValidationResult::new();
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();

        for id in ids {
            if !seen.insert(id) && reported.insert(id) {
                result.add_error(field, format!("Medication {} is listed more than once", id));
            }
        }

        result
    }
}

// ==================== CUSTOM VALIDATE ====================

pub trait CustomValidate {
    fn custom_validate(&self) -> ValidationResult;
}

impl CustomValidate for CreateMedicationRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = FieldValidator::not_blank(&self.name, "Name") {
            result.add_error("name", e);
        }
        if !self.price.is_finite() {
            result.add_error("price", "Price must be a finite amount");
        }
        result.merge(FieldValidator::expiration_date(self.expiration_date.as_ref(), 30));

        result
    }
}

impl CustomValidate for CreatePrescriptionRequest {
    fn custom_validate(&self) -> ValidationResult {
        FieldValidator::unique_medications(self.lines.iter().map(|l| l.medication_id), "lines")
    }
}

impl CustomValidate for DispensationRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result =
            FieldValidator::unique_medications(self.lines.iter().map(|l| l.medication_id), "lines");

        for line in &self.lines {
            if let Some(ref lot) = line.lot_number {
                if let Err(e) = FieldValidator::lot_number(lot) {
                    result.add_error("numeroLot", e);
                }
            }
        }

        result
    }
}

impl CustomValidate for StockAdjustmentRequest {
    fn custom_validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(e) = self.kind.check_delta(self.delta) {
            result.add_error("delta", e);
        }
        if let Err(e) = FieldValidator::not_blank(&self.reason, "Reason") {
            result.add_error("reason", e);
        }

        result
    }
}
