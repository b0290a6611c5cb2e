//! Cron and operator authorization
//!
//! The external cron presents `Authorization: Bearer <cron_secret>`. Operators
//! may instead send `X-Admin-Token`. Both comparisons are constant-time.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use subtle::ConstantTimeEq;

use crate::config::AuthSettings;
use crate::error::ApiError;
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Who was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Cron,
    Operator,
}

impl Caller {
    pub fn as_str(&self) -> &'static str {
        match self {
            Caller::Cron => "cron",
            Caller::Operator => "operator",
        }
    }
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Check the request headers against the configured secrets
pub fn authorize(headers: &HeaderMap, auth: &AuthSettings) -> Result<Caller, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if let Some(token) = bearer {
        if secrets_match(token, &auth.cron_secret) {
            return Ok(Caller::Cron);
        }
    }

    let admin = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if let (Some(token), Some(expected)) = (admin, auth.admin_token.as_deref()) {
        if secrets_match(token, expected) {
            return Ok(Caller::Operator);
        }
    }

    Err(ApiError::Unauthorized)
}

/// Extractor guarding cron and admin routes
#[derive(Debug, Clone, Copy)]
pub struct Authorized(pub Caller);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authorized {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match authorize(&parts.headers, &state.auth) {
            Ok(caller) => Ok(Self(caller)),
            Err(e) => {
                tracing::warn!(path = %parts.uri.path(), "Rejected unauthorized request");
                Err(e)
            }
        }
    }
}
