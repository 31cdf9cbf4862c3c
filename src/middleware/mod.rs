use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Error;
use crate::services::gateway::constant_time_eq;

/// Identity asserted by the upstream auth proxy. Session issuance and
/// credential checks happen there; this service only trusts the forwarded
/// `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(&parts.headers, "x-user-id")
            .ok_or_else(|| Error::Unauthorized("missing X-User-Id header".to_string()))?;
        let user_id = user_id
            .parse::<Uuid>()
            .map_err(|_| Error::Unauthorized("malformed X-User-Id header".to_string()))?;
        Ok(AuthUser { user_id })
    }
}

/// Shared-token guard for the admin override endpoint.
#[derive(Debug, Clone)]
pub struct AdminAuth;

impl FromRequestParts<Arc<crate::AppState>> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = header_value(&parts.headers, "x-admin-token")
            .ok_or_else(|| Error::Unauthorized("missing X-Admin-Token header".to_string()))?;
        if !constant_time_eq(token, &state.config.admin.api_token) {
            return Err(Error::Unauthorized("invalid admin token".to_string()));
        }
        Ok(AdminAuth)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
