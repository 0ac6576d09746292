//! Middleware for the DEPOT Web API.

mod auth;
mod cors;

pub use auth::{AuthUser, JwtClaims, JwtState, Permission, Role};
pub use cors::create_cors_layer;
