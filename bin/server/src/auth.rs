//! Caller identity extraction.
//!
//! Authentication happens in front of this server. The authenticating proxy
//! forwards the caller's user ID in the `X-User-Id` header.

use axum::{extract::FromRequestParts, http::request::Parts};
use conduit_core::UserId;

use crate::error::ApiError;

/// Header carrying the authenticated caller's user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extractor for requiring a caller identity.
///
/// Rejects with 401 when the header is missing or is not a valid user ID.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(ApiError::Unauthorized)?;
        let user_id = value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<UserId>().ok())
            .ok_or_else(|| {
                tracing::debug!("Rejected malformed caller identity");
                ApiError::Unauthorized
            })?;
        Ok(Caller(user_id))
    }
}
