//! JWT authentication middleware.
//!
//! Principals are managed outside this plugin; requests arrive with a JWT
//! whose role claim maps onto the permissions the handlers gate on. The
//! viewer's permission is always passed explicitly into the rendering
//! layer rather than read ambiently.

use std::str::FromStr;
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::web::error::ApiError;

/// Principal roles, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Guest,
    Viewer,
    Submitter,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Viewer => "viewer",
            Role::Submitter => "submitter",
            Role::Admin => "admin",
        }
    }

    /// Whether this role holds the given permission.
    pub fn can(&self, permission: Permission) -> bool {
        match permission {
            Permission::View => *self >= Role::Viewer,
            Permission::Edit | Permission::Add => *self >= Role::Submitter,
            Permission::Index | Permission::Unvalidated => *self >= Role::Admin,
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "viewer" => Ok(Role::Viewer),
            "submitter" => Ok(Role::Submitter),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// Permissions the handlers gate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    View,
    Edit,
    Add,
    /// Dry-run validation (`check_only=true`).
    Index,
    /// Validator bypass (`validate=false`).
    Unvalidated,
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (principal uuid).
    pub sub: String,
    /// Principal name.
    pub username: String,
    /// Principal role.
    pub role: String,
    /// Group memberships, reported to analytics.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Issued at timestamp.
    pub iat: u64,
    /// Expiration timestamp.
    pub exp: u64,
}

/// Application state for JWT verification.
#[derive(Clone)]
pub struct JwtState {
    /// Decoding key for JWT verification.
    pub decoding_key: DecodingKey,
    /// Validation settings.
    pub validation: Validation,
}

impl JwtState {
    /// Create a new JWT state from a secret key.
    pub fn new(secret: &str) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        Self {
            decoding_key,
            validation,
        }
    }
}

/// Extractor for authenticated users.
///
/// Requires a valid Bearer token; handlers then check the concrete
/// permission with [`AuthUser::require`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub JwtClaims);

impl AuthUser {
    /// The principal's role; unknown roles fall back to guest.
    pub fn role(&self) -> Role {
        self.0.role.parse().unwrap_or(Role::Guest)
    }

    /// Check a permission, failing with 403 when it is not held.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.role().can(permission) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Access denied"))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jwt_state = parts
            .extensions
            .get::<Arc<JwtState>>()
            .cloned()
            .ok_or_else(|| ApiError::internal("JWT state not configured"))?;

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

        let token_data = decode::<JwtClaims>(token, &jwt_state.decoding_key, &jwt_state.validation)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

        Ok(AuthUser(token_data.claims))
    }
}
