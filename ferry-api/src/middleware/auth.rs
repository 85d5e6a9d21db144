use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Operator,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Customer id for `CUSTOMER`, staff id for `OPERATOR`.
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    /// Operators see everything; customers only their own bookings.
    pub fn may_access(&self, owner: Uuid) -> bool {
        self.is_operator() || self.sub == owner
    }
}

impl AuthConfig {
    /// Signs a token valid for the configured lifetime. The identity store
    /// normally does this; the API only verifies.
    pub fn issue(&self, sub: Uuid, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        let ttl = chrono::Duration::seconds(i64::try_from(self.expiration).unwrap_or(86_400));
        let claims = Claims {
            sub,
            role,
            exp: usize::try_from((chrono::Utc::now() + ttl).timestamp()).unwrap_or(usize::MAX),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Verifies the bearer token and injects its [`Claims`] into the request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::AuthenticationError("missing bearer token".into()))?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::AuthenticationError(format!("invalid token: {}", e)))?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Layered after [`auth_middleware`]: only `OPERATOR` tokens pass.
pub async fn operator_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.is_operator() => Ok(next.run(req).await),
        Some(_) => Err(AppError::AuthorizationError("operator role required".into())),
        None => Err(AppError::AuthenticationError("missing bearer token".into())),
    }
}
