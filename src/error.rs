// src/error.rs
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

// ==================== API ERROR ====================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl ApiError {
    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn medication_not_found(id: i64) -> Self {
        ApiError::NotFound(format!("Medication with ID '{}' not found", id))
    }

    pub fn medication_already_exists(name: &str, dosage: &str, form: &str) -> Self {
        ApiError::BadRequest(format!("Medication '{} {} ({})' already exists", name, dosage, form))
    }
}

// ==================== PHARMACY ERROR ====================

/// Failures of the stock ledger, prescription tracker and dispensation recorder.
///
/// Every variant is raised before or during the single transactional commit,
/// so none of them leaves persisted side effects behind.
#[derive(Debug)]
pub enum PharmacyError {
    /// Prescription or medication missing, or medication deactivated.
    NotFound(String),
    LineNotFound { prescription_id: i64, medication_id: i64 },
    InsufficientStock { medication_id: i64, available: i64, requested: i64 },
    /// Contract violation: callers are expected to cap before applying.
    OverDispensation { line_id: i64, remaining: i64, requested: i64 },
    NothingToDispense { prescription_id: i64 },
    ConcurrencyConflict(String),
    InvalidMovement(String),
    Validation(String),
    Database(sqlx::Error),
}

pub type PharmacyResult<T> = Result<T, PharmacyError>;

// SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
const SQLITE_CONFLICT_CODES: [&str; 3] = ["5", "6", "517"];

impl PharmacyError {
    pub fn medication_not_found(id: i64) -> Self {
        PharmacyError::NotFound(format!("Medication {} does not exist or is inactive", id))
    }

    pub fn prescription_not_found(id: i64) -> Self {
        PharmacyError::NotFound(format!("Prescription {} does not exist", id))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PharmacyError::ConcurrencyConflict(_))
    }
}

impl fmt::Display for PharmacyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PharmacyError::NotFound(msg) => write!(f, "{}", msg),
            PharmacyError::LineNotFound { prescription_id, medication_id } => write!(
                f,
                "Medication {} is not part of prescription {}",
                medication_id, prescription_id
            ),
            PharmacyError::InsufficientStock { medication_id, available, requested } => write!(
                f,
                "Insufficient stock for medication {}. Available: {}, Requested: {}",
                medication_id, available, requested
            ),
            PharmacyError::OverDispensation { line_id, remaining, requested } => write!(
                f,
                "Prescription line {} has {} remaining, cannot dispense {}",
                line_id, remaining, requested
            ),
            PharmacyError::NothingToDispense { prescription_id } => write!(
                f,
                "Nothing can be dispensed for prescription {}: every requested line is out of stock or already dispensed",
                prescription_id
            ),
            PharmacyError::ConcurrencyConflict(msg) => write!(f, "Concurrent update detected: {}", msg),
            PharmacyError::InvalidMovement(msg) => write!(f, "Invalid stock movement: {}", msg),
            PharmacyError::Validation(msg) => write!(f, "{}", msg),
            PharmacyError::Database(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for PharmacyError {}

impl From<sqlx::Error> for PharmacyError {
    fn from(err: sqlx::Error) -> Self {
        let is_conflict = err
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| SQLITE_CONFLICT_CODES.contains(&code.as_ref()))
            .unwrap_or(false);

        if is_conflict {
            PharmacyError::ConcurrencyConflict(err.to_string())
        } else {
            PharmacyError::Database(err)
        }
    }
}

impl From<PharmacyError> for ApiError {
    fn from(err: PharmacyError) -> Self {
        match err {
            PharmacyError::NotFound(msg) => ApiError::NotFound(msg),
            e @ PharmacyError::LineNotFound { .. } => ApiError::BadRequest(e.to_string()),
            e @ PharmacyError::InsufficientStock { .. } => ApiError::BadRequest(e.to_string()),
            e @ PharmacyError::NothingToDispense { .. } => ApiError::BadRequest(e.to_string()),
            e @ PharmacyError::InvalidMovement(_) => ApiError::BadRequest(e.to_string()),
            PharmacyError::Validation(msg) => ApiError::ValidationError(msg),
            e @ PharmacyError::ConcurrencyConflict(_) => {
                log::warn!("{}", e);
                ApiError::Conflict("The stock changed while the request was processed, please retry".to_string())
            }
            e @ PharmacyError::OverDispensation { .. } => {
                log::error!("Dispensation contract violated: {}", e);
                ApiError::InternalServerError(e.to_string())
            }
            PharmacyError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_pharmacy_error_status_codes() {
        let cases = vec![
            (PharmacyError::medication_not_found(1), StatusCode::NOT_FOUND),
            (PharmacyError::LineNotFound { prescription_id: 1, medication_id: 2 }, StatusCode::BAD_REQUEST),
            (PharmacyError::InsufficientStock { medication_id: 1, available: 2, requested: 3 }, StatusCode::BAD_REQUEST),
            (PharmacyError::NothingToDispense { prescription_id: 1 }, StatusCode::BAD_REQUEST),
            (PharmacyError::ConcurrencyConflict("busy".to_string()), StatusCode::CONFLICT),
            (PharmacyError::OverDispensation { line_id: 1, remaining: 0, requested: 1 }, StatusCode::INTERNAL_SERVER_ERROR),
            (PharmacyError::Validation("bad".to_string()), StatusCode::UNPROCESSABLE_ENTITY),
        ];

        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.error_response().status(), expected, "{}", api);
        }
    }

    #[test]
    fn test_non_database_sqlx_error_is_not_conflict() {
        let err: PharmacyError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_conflict());
        assert!(matches!(err, PharmacyError::Database(_)));
    }

    #[test]
    fn test_line_not_found_message() {
        let err = PharmacyError::LineNotFound { prescription_id: 4, medication_id: 9 };
        assert_eq!(err.to_string(), "Medication 9 is not part of prescription 4");
    }

    #[test]
    fn test_duplicate_medication_names_form() {
        let err = ApiError::medication_already_exists("Amoxicilline", "500mg", "gelule");
        assert_eq!(err.to_string(), "Bad Request: Medication 'Amoxicilline 500mg (gelule)' already exists");
        assert_eq!(err.error_response().status(), StatusCode::BAD_REQUEST);
    }
}
