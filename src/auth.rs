use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{Duration, Utc};
use actix_web::web;
use actix_web::HttpMessage;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use strum::{EnumString, Display, AsRefStr};
use crate::error::{ApiError, ApiResult};

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum UserRole {
    #[serde(rename = "admin")]
    #[strum(serialize = "admin")]
    Admin,
    #[serde(rename = "medecin")]
    #[strum(serialize = "medecin")]
    Doctor,
    #[serde(rename = "pharmacien")]
    #[strum(serialize = "pharmacien")]
    Pharmacist,
    #[serde(rename = "infirmier")]
    #[strum(serialize = "infirmier")]
    Nurse,
    #[serde(rename = "receptionniste")]
    #[strum(serialize = "receptionniste")]
    Receptionist,
}

impl UserRole {
    // ======== STOCK PERMISSIONS ========
    pub fn can_view_stock(&self) -> bool {
        !matches!(self, UserRole::Receptionist)
    }

    pub fn can_manage_stock(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Pharmacist)
    }

    pub fn can_verify_ledger(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Pharmacist)
    }

    pub fn can_export_data(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Pharmacist)
    }

    // ======== PRESCRIPTION PERMISSIONS ========
    pub fn can_prescribe(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Doctor)
    }

    pub fn can_view_prescriptions(&self) -> bool {
        !matches!(self, UserRole::Receptionist)
    }

    pub fn can_dispense(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Pharmacist)
    }
}

// ======== CLAIMS / ACTOR ========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64, // user id
    pub username: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

/// Identity of the user performing a pharmacy operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: i64, role: UserRole) -> Self {
        Self { user_id, role }
    }
}

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Actor::new(claims.sub, claims.role)
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiration_hours: i64,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_expiration_hours,
        }
    }

    /// Tokens are normally issued by the hospital identity provider sharing the secret.
    pub fn generate_token(&self, user_id: i64, username: &str, role: UserRole) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_expiration_hours);

        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

/// Resolve the caller and check a role permission in one step
pub fn require_permission(req: &HttpRequest, permission_check: fn(&UserRole) -> bool) -> ApiResult<Actor> {
    let claims = get_current_user(req)?;
    check_permission(&claims, permission_check)?;
    Ok(Actor::from(&claims))
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const SECRET: &str = "unit_test_secret_with_enough_length_123";

    #[test]
    fn test_role_wire_names() {
        assert_eq!(UserRole::from_str("pharmacien").unwrap(), UserRole::Pharmacist);
        assert_eq!(UserRole::from_str("medecin").unwrap(), UserRole::Doctor);
        assert!(UserRole::from_str("pharmacist").is_err());
        assert_eq!(UserRole::Nurse.as_ref(), "infirmier");
        assert_eq!(UserRole::Admin.to_string(), "admin");
        assert_eq!(serde_json::to_string(&UserRole::Receptionist).unwrap(), "\"receptionniste\"");
    }

    #[test]
    fn test_role_permissions() {
        assert!(UserRole::Pharmacist.can_dispense());
        assert!(UserRole::Admin.can_dispense());
        assert!(!UserRole::Doctor.can_dispense());
        assert!(!UserRole::Nurse.can_manage_stock());
        assert!(UserRole::Doctor.can_prescribe());
        assert!(!UserRole::Pharmacist.can_prescribe());
        assert!(!UserRole::Receptionist.can_view_stock());
        assert!(UserRole::Nurse.can_view_prescriptions());
    }

    #[test]
    fn test_token_round_trip() {
        let service = AuthService::new(SECRET, 1);
        let token = service.generate_token(7, "pharma", UserRole::Pharmacist).unwrap();
        let claims = service.verify_token(&token).unwrap();

        assert_eq!(claims.sub, 7);
        assert_eq!(claims.username, "pharma");
        assert_eq!(claims.role, UserRole::Pharmacist);
        assert_eq!(Actor::from(&claims), Actor::new(7, UserRole::Pharmacist));
    }

    #[test]
    fn test_token_with_other_secret_is_rejected() {
        let issuer = AuthService::new(SECRET, 1);
        let verifier = AuthService::new("another_secret_with_enough_length_456", 1);
        let token = issuer.generate_token(1, "admin", UserRole::Admin).unwrap();

        assert!(matches!(verifier.verify_token(&token), Err(ApiError::AuthError(_))));
    }

    #[test]
    fn test_check_permission() {
        let claims = Claims {
            sub: 3,
            username: "nurse".to_string(),
            role: UserRole::Nurse,
            exp: 0,
            iat: 0,
        };
        assert!(check_permission(&claims, UserRole::can_view_stock).is_ok());
        assert!(matches!(
            check_permission(&claims, UserRole::can_dispense),
            Err(ApiError::Forbidden(_))
        ));
    }
}
