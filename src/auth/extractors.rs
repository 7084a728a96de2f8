use std::fmt;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;
use uuid::Uuid;

use super::{claims::TokenKind, jwt::JwtKeys};
use crate::error::Error;

/// Anonymous session identifier: 32 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestSessionId(String);

impl GuestSessionId {
    pub fn new() -> Self {
        Self::from(Uuid::new_v4())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GuestSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for GuestSessionId {
    fn from(id: Uuid) -> Self {
        Self(id.simple().to_string())
    }
}

impl fmt::Display for GuestSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(Uuid),
    Guest(GuestSessionId),
}

/// Signed-in user; guest tokens are rejected.
pub struct AuthUser(pub Uuid);

fn bearer_token(parts: &Parts) -> Result<&str, Error> {
    let auth = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| Error::auth("Sign in or continue as guest"))?;

    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .ok_or_else(|| Error::auth("Invalid Authorization header"))
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer_token(parts)?;

        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired token");
            Error::auth("Invalid or expired token")
        })?;

        match claims.kind {
            TokenKind::Access => Ok(Caller::User(claims.sub)),
            TokenKind::Guest => Ok(Caller::Guest(GuestSessionId::from(claims.sub))),
            TokenKind::Refresh => Err(Error::auth("Access token required")),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Caller::from_request_parts(parts, state).await? {
            Caller::User(id) => Ok(AuthUser(id)),
            Caller::Guest(_) => Err(Error::auth("Sign in to access your account")),
        }
    }
}
