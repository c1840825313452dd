//! Bearer token identity
//!
//! When authentication is enabled, `/api` requests must carry a token whose
//! claims name the participant and their role. The resolved identity is put
//! into the request extensions for handlers to pick up.

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::api::server::AppState;
use crate::error::{ClassroomError, Result};
use crate::models::{Role, UserIdentity};

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (participant id)
    pub sub: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn new(identity: &UserIdentity, expiry_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: identity.id.clone(),
            role: identity.role,
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity::new(self.sub.clone(), self.role)
    }
}

/// Token signer and validator
#[derive(Clone)]
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtAuth {
    /// Create a new JWT auth handler
    ///
    /// An empty secret is replaced by 32 random bytes from the OS.
    pub fn new(secret: &str) -> Result<Self> {
        let key = if secret.is_empty() {
            let mut key_bytes = [0u8; 32];
            OsRng.try_fill_bytes(&mut key_bytes).map_err(|e| {
                ClassroomError::Internal(format!("failed to generate JWT secret: {}", e))
            })?;

            debug!("Generated random JWT secret");
            key_bytes.to_vec()
        } else {
            secret.as_bytes().to_vec()
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
        })
    }

    pub fn generate_token(
        &self,
        identity: &UserIdentity,
        expiry_hours: i64,
    ) -> std::result::Result<String, AuthError> {
        let claims = Claims::new(identity, expiry_hours);

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate JWT: {}", e);
            AuthError::TokenCreation
        })
    }

    pub fn validate_token(&self, token: &str) -> std::result::Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Extract token from an Authorization header value
    pub fn extract_token(authorization: &str) -> Option<&str> {
        authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Resolve the caller from request headers
    pub fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<AuthenticatedUser, AuthError> {
        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;

        let token = Self::extract_token(auth_header).ok_or(AuthError::InvalidToken)?;
        let claims = self.validate_token(token)?;

        Ok(AuthenticatedUser {
            identity: claims.identity(),
            claims,
        })
    }
}

/// Authentication error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    TokenCreation,
    InvalidToken,
    MissingToken,
}

impl From<AuthError> for ClassroomError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation => ClassroomError::Internal("Failed to create token".into()),
            AuthError::InvalidToken => ClassroomError::Unauthorized("Invalid token".into()),
            AuthError::MissingToken => {
                ClassroomError::Unauthorized("Missing authorization token".into())
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ClassroomError::from(self).into_response()
    }
}

/// Identity attached to a request by [`require_identity`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity: UserIdentity,
    pub claims: Claims,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Route middleware that rejects unauthenticated `/api` requests when auth is enabled
pub async fn require_identity(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> std::result::Result<Response, AuthError> {
    if state.config.auth_enabled {
        let user = state.jwt_auth.authenticate(req.headers())?;
        debug!(participant = %user.identity.id, role = %user.identity.role, "Request authenticated");
        req.extensions_mut().insert(user);
    }

    Ok(next.run(req).await)
}
